//! Indirect block tree (C7): walks a chain of indirect blocks down to a
//! leaf data block, given the object's root block pointer and its dnode
//! level count.
//!
//! Grounded on `zfs/blocktree.py::BlockTree`. That Python implementation
//! (and the teacher's own indirect-block walker in `dmu.rs`) key their
//! block cache by tree depth and index-at-that-depth; this module instead
//! keys by the full path of child indices from the root, since two
//! different blocks at the same depth are different blocks (SPEC_FULL.md
//! section 9 -- the teacher's depth-only keying is a latent bug this
//! reader does not repeat).

use std::collections::HashMap;

use crate::byte_iter::ByteIter;
use crate::zio::{BlockPointer, Vdevs};

pub struct BlockTree {
    levels: usize,
    root: BlockPointer,
    blocks_per_indirect: usize,
    cache: HashMap<Vec<usize>, Vec<u8>>,
}

impl BlockTree {
    pub fn new(levels: usize, root: BlockPointer, indirect_block_size: usize) -> BlockTree {
        BlockTree {
            levels,
            root,
            blocks_per_indirect: indirect_block_size / BlockPointer::get_ondisk_size(),
            cache: HashMap::new(),
        }
    }

    /// Per-level child index, root to leaf, for the given logical block id.
    fn path_for_blockid(&self, blockid: usize) -> Vec<usize> {
        let mut indices = Vec::with_capacity(self.levels.saturating_sub(1));
        let mut remaining = blockid;
        for _ in 1..self.levels {
            indices.push(remaining % self.blocks_per_indirect);
            remaining /= self.blocks_per_indirect;
        }
        indices.reverse();
        indices
    }

    fn load_block(&mut self, vdevs: &mut Vdevs, path: &[usize]) -> Result<Vec<u8>, ()> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }

        let mut bp = self.root.clone();
        let mut prefix: Vec<usize> = Vec::with_capacity(path.len());
        for &index in path {
            let raw = if let Some(cached) = self.cache.get(&prefix) {
                cached.clone()
            } else {
                let data = bp.dereference(vdevs)?;
                self.cache.insert(prefix.clone(), data.clone());
                data
            };
            let mut iter = raw
                .iter()
                .copied()
                .skip(index * BlockPointer::get_ondisk_size());
            bp = BlockPointer::from_bytes_le(&mut iter).ok_or(())?;
            prefix.push(index);
        }

        let data = bp.dereference(vdevs)?;
        self.cache.insert(path.to_vec(), data.clone());
        Ok(data)
    }

    /// Returns the raw (decompressed) bytes of the data block with the
    /// given logical block id within the object.
    pub fn get_block(&mut self, vdevs: &mut Vdevs, blockid: usize) -> Result<Vec<u8>, ()> {
        if self.levels == 1 {
            return self.root.clone().dereference(vdevs);
        }
        let path = self.path_for_blockid(blockid);
        self.load_block(vdevs, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_for_blockid_single_level_tree_is_empty() {
        let dummy = dummy_embedded_bp();
        let tree = BlockTree::new(1, dummy, 128 * 1024);
        assert_eq!(tree.path_for_blockid(5), Vec::<usize>::new());
    }

    #[test]
    fn path_for_blockid_decomposes_by_fanout() {
        let dummy = dummy_embedded_bp();
        let tree = BlockTree::new(3, dummy, 128 * 1024);
        let fanout = tree.blocks_per_indirect;
        let blockid = fanout * 2 + 3;
        let path = tree.path_for_blockid(blockid);
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], 2);
        assert_eq!(path[1], 3);
    }

    fn dummy_embedded_bp() -> BlockPointer {
        // An embedded BP with an empty payload is enough to exercise the
        // path arithmetic above without needing a vdev. The info qword
        // starts at byte 88; its embedded bit (bit 39) lands in byte 92.
        let mut bytes = [0u8; 128];
        bytes[92] = 1 << 7;
        BlockPointer::from_bytes_le(&mut bytes.iter().copied()).expect("valid embedded bp")
    }
}
