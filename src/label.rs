//! Vdev label (C6): the 256 KiB blob present four times per child disk,
//! holding the pool's configuration nvlist and the uberblock array.
//!
//! Grounded on the teacher's `VdevLabel` (offsets, uberblock slicing) and
//! `zfs/label.py::Label` (label 2/3 fallback to label 0, `find_active_ub`'s
//! highest-wins tie-breaking, `get_vdev_disks`).

use crate::nvlist::{self, NVList, Value};
use crate::{ansi_color::*, Uberblock};

pub const LABEL_SIZE: usize = 256 * 1024;
const NVLIST_OFFSET: usize = 16 * 1024;
const NVLIST_SIZE: usize = (128 - 16) * 1024;
const UBARRAY_OFFSET: usize = 128 * 1024;
const UBARRAY_SIZE: usize = 128 * 1024;
/// Minimum slot stride of the uberblock array; the real stride is
/// `max(MIN_UBERBLOCK_SLOT_SIZE, 1 << ashift)` (spec.md:124), since each
/// uberblock is written to its own top-level-vdev sector.
const MIN_UBERBLOCK_SLOT_SIZE: usize = 1024;
const DEFAULT_ASHIFT: u32 = 9;

pub struct Label {
    pub which: usize,
    pub config: NVList,
    ashift: u32,
    uberblocks_raw: Vec<u8>,
}

impl Label {
    /// Parses a single 256 KiB label blob. `which` identifies which of the
    /// four on-disk slots this came from (0-3); labels 2 and 3 live at the
    /// end of the disk but this reader, like the source, only ever passes
    /// it label 0's bytes for those slots (see SPEC_FULL.md section 9).
    pub fn from_bytes(which: usize, data: &[u8]) -> Option<Label> {
        if data.len() < LABEL_SIZE {
            return None;
        }

        let nvlist_region = &data[NVLIST_OFFSET..NVLIST_OFFSET + NVLIST_SIZE];
        // First 4 bytes of the region are the nvlist encoding header the
        // on-disk format prefixes ahead of the XDR stream.
        let mut it = nvlist_region[4..].iter().copied();
        let config = nvlist::from_bytes_xdr(&mut it)?;

        let ashift = match config.get("ashift") {
            Some(Value::U64(v)) => *v as u32,
            _ => DEFAULT_ASHIFT,
        };

        let uberblocks_raw = data[UBARRAY_OFFSET..UBARRAY_OFFSET + UBARRAY_SIZE].to_vec();

        Some(Label {
            which,
            config,
            ashift,
            uberblocks_raw,
        })
    }

    pub fn ashift(&self) -> u32 {
        self.ashift
    }

    fn slot_size(&self) -> usize {
        MIN_UBERBLOCK_SLOT_SIZE.max(1usize << self.ashift)
    }

    fn slot_count(&self) -> usize {
        self.uberblocks_raw.len() / self.slot_size()
    }

    fn read_slot(&self, index: usize) -> Option<Uberblock> {
        let slot_size = self.slot_size();
        let start = index * slot_size;
        let end = start + slot_size;
        let slot = self.uberblocks_raw.get(start..end)?;
        Uberblock::from_bytes_le(&mut slot.iter().copied())
    }

    /// Chooses the active uberblock: iterates slots in index order, keeping
    /// whichever has the highest `txg`, with `>=` so later indices win a
    /// tie against an earlier slot with the same `txg`.
    pub fn find_active_ub(&self) -> Option<Uberblock> {
        let mut best: Option<Uberblock> = None;
        let mut threshold = self.config_txg().unwrap_or(0);
        for i in 0..self.slot_count() {
            if let Some(ub) = self.read_slot(i) {
                if ub.txg >= threshold {
                    threshold = ub.txg;
                    best = Some(ub);
                }
            }
        }
        best
    }

    pub fn find_ub_txg(&self, txg: u64) -> Option<Uberblock> {
        for i in 0..self.slot_count() {
            if let Some(ub) = self.read_slot(i) {
                if ub.txg == txg {
                    return Some(ub);
                }
            }
        }
        None
    }

    pub fn config_txg(&self) -> Option<u64> {
        match self.config.get("txg")? {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Paths of the child disks listed under `vdev_tree.children`, in the
    /// order the config recorded them.
    pub fn get_vdev_disks(&self) -> Vec<String> {
        let Some(Value::NVList(vdev_tree)) = self.config.get("vdev_tree") else {
            warn_missing("vdev_tree");
            return Vec::new();
        };
        let Some(children) = vdev_tree.get("children") else {
            warn_missing("vdev_tree.children");
            return Vec::new();
        };
        let paths = match children {
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
        };
        paths
    }
}

fn warn_missing(what: &str) {
    println!("{YELLOW}Warning{WHITE}: Label config is missing '{what}'!");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_label_bytes() -> Vec<u8> {
        vec![0u8; LABEL_SIZE]
    }

    #[test]
    fn zeroed_uberblock_array_has_no_active_slot() {
        let label = Label {
            which: 0,
            config: NVList::new(),
            ashift: DEFAULT_ASHIFT,
            uberblocks_raw: vec![0u8; UBARRAY_SIZE],
        };
        assert!(label.find_active_ub().is_none());
    }

    #[test]
    fn from_bytes_rejects_truncated_blob() {
        assert!(Label::from_bytes(0, &blank_label_bytes()[..100]).is_none());
    }

    #[test]
    fn slot_count_matches_fixed_stride_at_default_ashift() {
        let label = Label {
            which: 1,
            config: NVList::new(),
            ashift: DEFAULT_ASHIFT,
            uberblocks_raw: vec![0u8; UBARRAY_SIZE],
        };
        assert_eq!(label.slot_count(), UBARRAY_SIZE / MIN_UBERBLOCK_SLOT_SIZE);
    }

    #[test]
    fn slot_count_shrinks_for_4kn_ashift() {
        let label = Label {
            which: 1,
            config: NVList::new(),
            ashift: 12,
            uberblocks_raw: vec![0u8; UBARRAY_SIZE],
        };
        assert_eq!(label.slot_count(), UBARRAY_SIZE / 4096);
    }
}
