//! Standalone counterpart of `transport::NetworkTransport`: serves byte
//! ranges of local files over the framed TCP protocol described in
//! SPEC_FULL.md section 4.1.
//!
//! Grounded on `block_server/server.py` (`BlockTCPHandler`, chunked
//! `'n'`/`'e'`/`'l'` reply framing, `SERVER_PORT`).

use std::env;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;

use szfs::ansi_color::*;
use szfs::transport::DEFAULT_PORT;

const CHUNK_SIZE: usize = 4096 * 64;

fn serve_read(stream: &mut TcpStream, root: &PathBuf, path: &str, offset: u64, count: u64) -> std::io::Result<()> {
    let result = File::open(root.join(path)).and_then(|mut f| {
        f.seek(SeekFrom::Start(offset))?;
        let mut remaining = count;
        let mut pos = offset;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let mut buf = vec![0u8; want];
            f.read_exact(&mut buf)?;
            send_frame(stream, b'n', pos, &buf)?;
            pos += want as u64;
            remaining -= want as u64;
        }
        Ok(())
    });

    if let Err(e) = result {
        println!("{YELLOW}Warning{WHITE}: read of '{path}' failed: {e}");
        send_frame(stream, b'e', offset, &[])?;
    }
    send_frame(stream, b'l', offset, &(count.to_le_bytes()))
}

fn send_frame(stream: &mut TcpStream, op: u8, offset: u64, data: &[u8]) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(17);
    header.push(op);
    header.extend_from_slice(&offset.to_le_bytes());
    header.extend_from_slice(&(data.len() as u64).to_le_bytes());
    stream.write_all(&header)?;
    stream.write_all(data)
}

fn read_request_header(stream: &mut TcpStream) -> std::io::Result<(u64, u64, String)> {
    let mut buf = [0u8; 17];
    stream.read_exact(&mut buf)?;
    let offset = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let count = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let pathlen = buf[16] as usize;
    let mut path_buf = vec![0u8; pathlen];
    stream.read_exact(&mut path_buf)?;
    Ok((offset, count, String::from_utf8_lossy(&path_buf).into_owned()))
}

fn handle_client(mut stream: TcpStream, root: PathBuf) {
    let mut op = [0u8; 1];
    if stream.read_exact(&mut op).is_err() {
        return;
    }
    match op[0] {
        1 => {
            if let Ok((offset, count, path)) = read_request_header(&mut stream) {
                let _ = serve_read(&mut stream, &root, &path, offset, count);
            }
        }
        2 => {
            let mut nbuf = [0u8; 1];
            if stream.read_exact(&mut nbuf).is_err() {
                return;
            }
            for _ in 0..nbuf[0] {
                if let Ok((offset, count, path)) = read_request_header(&mut stream) {
                    if serve_read(&mut stream, &root, &path, offset, count).is_err() {
                        return;
                    }
                }
            }
        }
        other => {
            println!("{YELLOW}Warning{WHITE}: Unknown request opcode {other}, dropping connection!");
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("{RED}Fatal{WHITE}: Usage: block-server <root-dir> [port]");
        std::process::exit(1);
    }
    let root = PathBuf::from(&args[1]);
    let port: u16 = args
        .get(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            println!("{RED}Fatal{WHITE}: Could not bind port {port}: {e}");
            std::process::exit(1);
        }
    };
    println!("{CYAN}Info{WHITE}: Serving '{}' on port {port}", root.display());

    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let root = root.clone();
                thread::spawn(move || handle_client(stream, root));
            }
            Err(e) => println!("{YELLOW}Warning{WHITE}: Accept failed: {e}"),
        }
    }
}
