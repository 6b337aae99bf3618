#![allow(dead_code)]
#![allow(
    clippy::identity_op,
    clippy::result_unit_err,
    clippy::collapsible_if,
    clippy::needless_range_loop,
    clippy::needless_return,
    clippy::unusual_byte_groupings
)]

use byte_iter::ByteIter;

pub mod blktree;
pub mod byte_iter;
pub mod dataset;
pub mod dmu;
pub mod driver;
pub mod dsl;
pub mod error;
pub mod fletcher;
pub mod label;
pub mod lz4;
pub mod lzjb;
pub mod nvlist;
pub mod transport;
pub mod vdev;
pub mod zap;
pub mod zil;
pub mod zio;
pub mod zpl;

pub mod ansi_color {
    pub const RED: &str = "\u{001b}[31m";
    pub const YELLOW: &str = "\u{001b}[33m";
    pub const CYAN: &str = "\u{001b}[36m";
    pub const WHITE: &str = "\u{001b}[0m";
    pub const MAGENTA: &str = "\u{001b}[35m";
}

pub const UBERBLOCK_MAGIC: u64 = 0x00bab10c;

/// The fixed-size record living at the start of each uberblock-array slot.
/// Only little-endian pools are handled; a big-endian magic is reported as
/// an unreadable slot rather than attempted (see SPEC_FULL.md section 4.6).
#[derive(Debug, Clone)]
pub struct Uberblock {
    pub version: u64,
    pub txg: u64,
    pub guid_sum: u64,
    pub timestamp: u64,
    pub rootbp: zio::BlockPointer,
}

impl Uberblock {
    pub fn get_ondisk_size() -> usize {
        8 * 5 + zio::BlockPointer::get_ondisk_size()
    }

    /// `None` when the magic doesn't match in either endianness, or the
    /// slot is simply zeroed (an unused array entry).
    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<Uberblock> {
        let magic = data.read_u64_le()?;
        if magic != UBERBLOCK_MAGIC {
            if magic != 0 {
                use crate::ansi_color::*;
                println!("{YELLOW}Warning{WHITE}: Uberblock has an invalid magic, skipping!");
            }
            return None;
        }

        Some(Uberblock {
            version: data.read_u64_le()?,
            txg: data.read_u64_le()?,
            guid_sum: data.read_u64_le()?,
            timestamp: data.read_u64_le()?,
            rootbp: zio::BlockPointer::from_bytes_le(data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uberblock_rejects_zeroed_slot() {
        let data = vec![0u8; Uberblock::get_ondisk_size()];
        assert!(Uberblock::from_bytes_le(&mut data.into_iter()).is_none());
    }
}
