//! Recovery CLI (C12): reads a pool through a transport, finds the MOS,
//! discovers datasets, and exports them as a tar archive and/or a file
//! listing.
//!
//! Grounded on the teacher's (deleted) `main.rs` argument parsing and
//! `zfs/rescue.py`'s flag names from the original implementation.

use std::env;
use std::path::PathBuf;

use szfs::ansi_color::*;
use szfs::dataset::Dataset;
use szfs::driver;
use szfs::transport::{FileTransport, NetworkTransport, Transport};

struct Args {
    verbosity: u32,
    transport_config: Option<PathBuf>,
    seed_disk: String,
    txg: Option<u64>,
    csv_path: Option<PathBuf>,
    tar_path: Option<PathBuf>,
    datasets: Vec<String>,
}

const DEFAULT_SEED_DISK: &str = "/dev/dsk/c3t0d0s7";

fn print_usage() {
    println!("Usage: zfs-rescue [-v]... [-f <transport-config>] [-l <seed-disk>] [-t <txg>] [--csv <path>] [--tar <path>] [dataset ...]");
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        verbosity: 0,
        transport_config: None,
        seed_disk: DEFAULT_SEED_DISK.to_string(),
        txg: None,
        csv_path: None,
        tar_path: None,
        datasets: Vec::new(),
    };

    let raw: Vec<String> = env::args().skip(1).collect();
    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-v" => args.verbosity += 1,
            "-f" => args.transport_config = Some(PathBuf::from(it.next()?)),
            "-l" => args.seed_disk = it.next()?,
            "-t" => args.txg = Some(it.next()?.parse::<u64>().ok()?),
            "--csv" => args.csv_path = Some(PathBuf::from(it.next()?)),
            "--tar" => args.tar_path = Some(PathBuf::from(it.next()?)),
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                println!("{RED}Fatal{WHITE}: unknown flag '{}'", other);
                return None;
            }
            other => args.datasets.push(other.to_string()),
        }
    }
    Some(args)
}

fn make_transport(config: Option<PathBuf>) -> Box<dyn Transport> {
    match config {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => Box::new(FileTransport::from_config_str(&text)),
            Err(e) => {
                println!("{RED}Fatal{WHITE}: could not read transport config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Box::new(NetworkTransport::new("127.0.0.1", szfs::transport::DEFAULT_PORT)),
    }
}

fn main() {
    let Some(args) = parse_args() else {
        print_usage();
        std::process::exit(1);
    };
    if args.verbosity > 0 {
        println!("{CYAN}Info{WHITE}: seed disk: {}", args.seed_disk);
    }

    let config = args.transport_config.clone();
    let (mut pool, ub) = match driver::open_pool(|| make_transport(config.clone()), &args.seed_disk, args.txg) {
        Ok(v) => v,
        Err(e) => {
            println!("{RED}Fatal{WHITE}: could not open pool: {}", e);
            std::process::exit(1);
        }
    };

    if args.verbosity > 0 {
        println!(
            "{CYAN}Info{WHITE}: using uberblock with txg {} (guid sum {:#x})",
            ub.txg, ub.guid_sum
        );
    }

    let mut mos = match driver::open_mos(&ub, &mut pool) {
        Ok(m) => m,
        Err(e) => {
            println!("{RED}Fatal{WHITE}: could not open the meta object set: {}", e);
            std::process::exit(1);
        }
    };

    let discovered = driver::discover_datasets(&mut mos, &mut pool);
    if discovered.is_empty() {
        println!("{RED}Fatal{WHITE}: no DSL datasets found in this pool!");
        std::process::exit(1);
    }
    if args.verbosity > 0 {
        println!("{CYAN}Info{WHITE}: found {} dataset(s)", discovered.len());
    }

    let wanted: Vec<usize> = if args.datasets.is_empty() {
        discovered.iter().map(|d| d.dnode_id).collect()
    } else {
        args.datasets
            .iter()
            .filter_map(|s| s.parse::<usize>().ok())
            .collect()
    };

    let mut failures = 0u32;
    for dnode_id in wanted {
        let Some(entry) = discovered.iter().find(|d| d.dnode_id == dnode_id) else {
            println!("{YELLOW}Warning{WHITE}: requested dataset #{} was not discovered, skipping!", dnode_id);
            failures += 1;
            continue;
        };

        let objset = match driver::open_dataset_objset(*entry, &mut mos, &mut pool) {
            Ok(o) => o,
            Err(e) => {
                println!("{YELLOW}Warning{WHITE}: could not open object set of dataset #{}: {}, skipping!", dnode_id, e);
                failures += 1;
                continue;
            }
        };

        let mut dataset = Dataset::new(objset);
        let mut vdevs = pool.vdevs();
        if dataset.analyse(&mut vdevs).is_err() {
            failures += 1;
            continue;
        }
        let Some(root_id) = dataset.root_dir_id() else {
            failures += 1;
            continue;
        };

        if args.verbosity > 1 {
            dataset.traverse_dir(root_id, usize::MAX, &mut vdevs);
        }

        if let Some(csv) = &args.csv_path {
            let path = numbered_path(csv, dnode_id, wanted_len(&discovered));
            if dataset.export_file_list(&path, &mut vdevs).is_err() {
                println!("{YELLOW}Warning{WHITE}: failed to write file list for dataset #{}", dnode_id);
                failures += 1;
            }
        }

        if let Some(tar_path) = &args.tar_path {
            let path = numbered_path(tar_path, dnode_id, wanted_len(&discovered));
            if dataset.archive(&path, root_id, &[], &mut vdevs).is_err() {
                println!("{YELLOW}Warning{WHITE}: failed to archive dataset #{}", dnode_id);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}

fn wanted_len(discovered: &[driver::DiscoveredDataset]) -> usize {
    discovered.len()
}

/// When more than one dataset is being exported, disambiguates the output
/// path by splicing the dataset id ahead of the extension; a single
/// dataset gets the path exactly as given.
fn numbered_path(base: &PathBuf, dnode_id: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return base.clone();
    }
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let ext = base.extension().and_then(|s| s.to_str());
    let name = match ext {
        Some(ext) => format!("{}-{}.{}", stem, dnode_id, ext),
        None => format!("{}-{}", stem, dnode_id),
    };
    base.with_file_name(name)
}
