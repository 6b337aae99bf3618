//! Driver (C11): wires label -> active uberblock -> MOS object set ->
//! discovered datasets, the glue the CLI front-end drives.
//!
//! Grounded on the teacher's (deleted) `recover.rs`/`fs-walker.rs` pipeline
//! and `zfs/driver.py`'s `find_mos`/`find_datasets` flow from the original
//! implementation.

use std::collections::HashMap;

use crate::ansi_color::*;
use crate::dmu::{DNode, ObjSet};
use crate::error::DriverError;
use crate::label::Label;
use crate::nvlist::{NVList, Value};
use crate::transport::Transport;
use crate::vdev::{Vdev, VdevFile, VdevMirror, VdevRaidz};
use crate::zio::Vdevs;
use crate::Uberblock;

/// A DSL dataset dnode found in the MOS, identified by its own dnode id
/// (used to re-derive its head dataset's block pointer and re-open its
/// object set).
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredDataset {
    pub dnode_id: usize,
}

/// The pool's single top-level vdev, reachable through the `Vdevs` map
/// every block pointer dereference needs.
pub struct Pool {
    vdev: Box<dyn Vdev>,
}

impl Pool {
    /// Builds the `Vdevs` map `BlockPointer::dereference` expects. Every DVA
    /// this reader follows addresses a single top-level vdev at id 0
    /// (multi-top-level-vdev pools are a non-goal, see SPEC_FULL.md).
    pub fn vdevs(&mut self) -> Vdevs {
        let mut map: Vdevs = HashMap::new();
        map.insert(0, self.vdev.as_mut());
        map
    }
}

fn children_paths(vdev_tree: &NVList) -> Vec<String> {
    let Some(children) = vdev_tree.get("children") else {
        return match vdev_tree.get("path") {
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
    };
    match children {
        Value::NVListArray(items) => items
            .iter()
            .filter_map(|child| match child.get("path") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Value::NVList(single) => match single.get("path") {
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Reads the vdev geometry out of a label's config nvlist and builds the
/// corresponding top-level vdev (mirror, single-parity RAID-Z, or a lone
/// disk).
fn build_pool_vdev(
    config: &NVList,
    ashift: u32,
    make_transport: &dyn Fn() -> Box<dyn Transport>,
) -> Result<Box<dyn Vdev>, DriverError> {
    let Some(Value::NVList(vdev_tree)) = config.get("vdev_tree") else {
        println!("{RED}Fatal{WHITE}: label config has no vdev_tree!");
        return Err(DriverError::UnsupportedGeometry("label config has no vdev_tree"));
    };
    let kind = match vdev_tree.get("type") {
        Some(Value::String(s)) => s.as_str(),
        _ => "disk",
    };
    let disks = children_paths(vdev_tree);

    match kind {
        "mirror" => Ok(Box::new(VdevMirror::new(make_transport(), disks, ashift))),
        "raidz" => {
            let nparity = match vdev_tree.get("nparity") {
                Some(Value::U64(n)) => *n as usize,
                _ => 1,
            };
            let vdev = VdevRaidz::new(make_transport(), disks, ashift, nparity, Vec::new(), false)
                .map_err(|_| DriverError::UnsupportedGeometry("raidz with nparity != 1"))?;
            Ok(Box::new(vdev))
        }
        _ => {
            let device = disks.into_iter().next().ok_or_else(|| {
                println!("{RED}Fatal{WHITE}: vdev_tree has no child disk path!");
                DriverError::UnsupportedGeometry("vdev_tree has no child disk path")
            })?;
            Ok(Box::new(VdevFile::new(make_transport(), device, ashift)))
        }
    }
}

/// Reads the seed disk's label 0, builds the pool vdev and returns the
/// chosen uberblock (pinned to `txg` if given, else the label's active
/// one).
pub fn open_pool(
    make_transport: impl Fn() -> Box<dyn Transport>,
    seed_disk: &str,
    txg: Option<u64>,
) -> Result<(Pool, Uberblock), DriverError> {
    let mut seed = VdevFile::new(make_transport(), seed_disk, 9);
    let raw_label = seed.read_raw_label(0).map_err(|_| DriverError::NoValidLabel)?;
    let label = Label::from_bytes(0, &raw_label).ok_or_else(|| {
        println!(
            "{RED}Fatal{WHITE}: could not parse label 0 on seed disk '{}'!",
            seed_disk
        );
        DriverError::NoValidLabel
    })?;

    let ashift = label.ashift();

    let ub = match txg {
        Some(t) => label.find_ub_txg(t).ok_or_else(|| {
            println!("{RED}Fatal{WHITE}: no uberblock with txg {} on seed disk!", t);
            DriverError::NoActiveUberblock
        })?,
        None => label.find_active_ub().ok_or_else(|| {
            println!("{RED}Fatal{WHITE}: seed disk has no active uberblock!");
            DriverError::NoActiveUberblock
        })?,
    };

    for disk in label.get_vdev_disks() {
        println!("{CYAN}Info{WHITE}: pool child disk: {}", disk);
    }

    let vdev = build_pool_vdev(&label.config, ashift, &make_transport)?;
    Ok((Pool { vdev }, ub))
}

/// Reads a child disk's own label 0 and reports its active uberblock, for
/// the `-v` diagnostics dump -- this reader otherwise only ever trusts the
/// seed disk's uberblock array.
pub fn diagnose_child(
    make_transport: impl Fn() -> Box<dyn Transport>,
    device_name: &str,
) -> Option<(u64, u64)> {
    let mut vdev = VdevFile::new(make_transport(), device_name, 9);
    let raw = vdev.read_raw_label(0).ok()?;
    let label = Label::from_bytes(0, &raw)?;
    let ub = label.find_active_ub()?;
    Some((ub.txg, ub.guid_sum))
}

/// Dereferences the uberblock's root block pointer and parses the MOS
/// object set.
pub fn open_mos(ub: &Uberblock, pool: &mut Pool) -> Result<ObjSet, DriverError> {
    let mut vdevs = pool.vdevs();
    let raw = ub.rootbp.dereference(&mut vdevs).map_err(|_| DriverError::UnreachableMos)?;
    ObjSet::from_bytes_le(&mut raw.iter().copied()).ok_or_else(|| {
        println!("{RED}Fatal{WHITE}: MOS block pointer did not decode to a valid object set!");
        DriverError::UnreachableMos
    })
}

/// The pool directory object is always dnode 1 in the MOS
/// (`DMU_POOL_DIRECTORY_OBJECT`).
const POOL_DIRECTORY_OBJECT: usize = 1;

/// Walks the DSL directory rooted at `dir_obj`'s head dataset plus every
/// child directory reachable through its child-map ZAP, pushing every head
/// dataset dnode id it finds into `found`. `visited` guards against cycles
/// a corrupted pool could otherwise loop on forever.
fn walk_dsl_directory(
    dir_obj: u64,
    mos: &mut ObjSet,
    vdevs: &mut Vdevs,
    found: &mut Vec<DiscoveredDataset>,
    visited: &mut std::collections::HashSet<u64>,
) {
    if !visited.insert(dir_obj) {
        return;
    }
    let Some(DNode::DSLDirectory(mut dir)) = mos.get_dnode_at(dir_obj as usize, vdevs) else {
        return;
    };
    let Some(data) = dir.parse_bonus_data() else {
        return;
    };
    let head_dataset = data.get_head_dataset_object_number();
    let children_zap_obj = data.get_children_directory_object_number();

    if head_dataset != 0
        && !found.iter().any(|d| d.dnode_id == head_dataset as usize)
        && matches!(
            mos.get_dnode_at(head_dataset as usize, vdevs),
            Some(DNode::DSLDataset(_))
        )
    {
        found.push(DiscoveredDataset {
            dnode_id: head_dataset as usize,
        });
    }

    if children_zap_obj == 0 {
        return;
    }
    let Some(DNode::DSLDatasetChildMap(mut child_map)) =
        mos.get_dnode_at(children_zap_obj as usize, vdevs)
    else {
        return;
    };
    let Some(entries) = child_map.dump_zap_contents(vdevs) else {
        return;
    };
    for (name, value) in entries {
        // Snapshot names live in a separate snapshot-names ZAP, never here;
        // defensively skip anything that looks like one anyway.
        if name.starts_with('%') || name.starts_with('@') {
            continue;
        }
        if let crate::zap::Value::U64(child_obj) = value {
            walk_dsl_directory(child_obj, mos, vdevs, found, visited);
        }
    }
}

/// Discovers datasets two ways (SPEC_FULL.md section 4.11): an exhaustive
/// scan of every MOS dnode slot for a DSL dataset dnode (step 3), and a
/// walk from the pool directory's `"root_dataset"` entry through the DSL
/// directory tree's child-map ZAPs (step 4). The two are merged and
/// de-duplicated by dnode id.
pub fn discover_datasets(mos: &mut ObjSet, pool: &mut Pool) -> Vec<DiscoveredDataset> {
    let mut vdevs = pool.vdevs();
    let mut found = Vec::new();

    if let Some(DNode::ObjectDirectory(mut obj_dir)) =
        mos.get_dnode_at(POOL_DIRECTORY_OBJECT, &mut vdevs)
    {
        if let Some(entries) = obj_dir.dump_zap_contents(&mut vdevs) {
            if let Some(crate::zap::Value::U64(root_dir_obj)) = entries.get("root_dataset") {
                let mut visited = std::collections::HashSet::new();
                walk_dsl_directory(*root_dir_obj, mos, &mut vdevs, &mut found, &mut visited);
            } else {
                println!("{YELLOW}Warning{WHITE}: pool directory has no 'root_dataset' entry!");
            }
        }
    }

    for id in 0..=mos.max_dnode_id() {
        if let Some(DNode::DSLDataset(_)) = mos.get_dnode_at(id, &mut vdevs) {
            if !found.iter().any(|d| d.dnode_id == id) {
                found.push(DiscoveredDataset { dnode_id: id });
            }
        }
    }
    found
}

/// Dereferences a discovered dataset's block pointer and parses its own
/// object set -- the one `Dataset::new` consumes.
pub fn open_dataset_objset(
    dataset: DiscoveredDataset,
    mos: &mut ObjSet,
    pool: &mut Pool,
) -> Result<ObjSet, DriverError> {
    let mut vdevs = pool.vdevs();
    let DNode::DSLDataset(node) = mos
        .get_dnode_at(dataset.dnode_id, &mut vdevs)
        .ok_or(DriverError::UnreachableMos)?
    else {
        return Err(DriverError::UnreachableMos);
    };
    let mut data = node.parse_bonus_data().ok_or(DriverError::UnreachableMos)?;
    let raw = data
        .get_block_pointer()
        .dereference(&mut vdevs)
        .map_err(|_| DriverError::UnreachableMos)?;
    ObjSet::from_bytes_le(&mut raw.iter().copied()).ok_or(DriverError::UnreachableMos)
}
