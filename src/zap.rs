use crate::byte_iter::ByteIter;

#[derive(Debug, PartialEq)]
#[repr(u64)]
enum ZapType {
    MicroZap = (1u64 << 63) + 3,
    FatZapHeader = (1u64 << 63) + 1,
    FatZapLeaf = (1u64 << 63) + 0,
}

impl ZapType {
    pub fn from_value(value: u64) -> Option<ZapType> {
        Some(if value == (1u64 << 63) + 3 {
            Self::MicroZap
        } else if value == (1u64 << 63) + 1 {
            Self::FatZapHeader
        } else if value == (1u64 << 63) + 0 {
            Self::FatZapLeaf
        } else {
            return None;
        })
    }
}

#[derive(Debug, PartialEq)]
#[repr(u8)]
pub enum ZapLeafChunkType {
    Entry = 252,
    Array = 251,
    Free = 253,
}

impl ZapLeafChunkType {
    pub fn from_value(value: u8) -> Option<ZapLeafChunkType> {
        Some(match value {
            252 => Self::Entry,
            251 => Self::Array,
            253 => Self::Free,
            _ => return None
        })
    }
}

#[derive(Debug)]
pub struct ZapLeaf {
    header: ZapLeafHeader,
    hash_table: Vec<u16>,
    chunks: Vec<ZapLeafChunk>,
}

impl ZapLeaf {
    fn get_hash_table_numentries(block_size: usize) -> usize {
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L77
        block_size/32
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>, block_size: usize) -> Option<ZapLeaf> {
        let header = ZapLeafHeader::from_bytes_le(data)?;
        let mut hash_table = vec![0u16; Self::get_hash_table_numentries(block_size)];
        for value in hash_table.iter_mut() {
            *value = data.read_u16_le()?;
        }

        // Calculate length of chunk array
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L45
        let remaining_bytes = block_size - ZapLeafHeader::get_ondisk_size() - Self::get_hash_table_numentries(block_size)*core::mem::size_of::<u16>();
        let nchunks = remaining_bytes/ZapLeafChunk::get_ondisk_size();
        let mut chunks = Vec::<ZapLeafChunk>::new();
        for _ in 0..nchunks{
            chunks.push(ZapLeafChunk::from_bytes_le(data)?);
        }
        
        Some(ZapLeaf { header, hash_table, chunks })
    }
}

#[derive(Debug)]
pub struct ZapLeafHeader {
    next_leaf: u64,
    prefix: u64,
    nfree: u16,
    nentries: u16,
    prefix_len: u16,
    freelist: u16
}

impl ZapLeafHeader {
    pub fn get_ondisk_size() -> usize {
        48
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapLeafHeader> {
        let zap_type = ZapType::from_value(data.read_u64_le()?)?;
        if zap_type != ZapType::FatZapLeaf { println!("Attempted to parse a zap structure as a leaf, it was not a leaf!"); return None; };
        let next_leaf = data.read_u64_le()?;
        let prefix = data.read_u64_le()?;
        let magic = data.read_u32_le()?;
        assert!(magic == 0x2AB1EAF);
        let nfree = data.read_u16_le()?;
        let nentries = data.read_u16_le()?;
        let prefix_len = data.read_u16_le()?;
        let freelist = data.read_u16_le()?;
        data.skip_n_bytes(12)?;
        Some(ZapLeafHeader { 
            next_leaf, 
            prefix, 
            nfree, 
            nentries, 
            prefix_len, 
            freelist 
        })
    }
}

#[derive(Debug)]
pub enum ZapLeafChunk {
    Entry {
        int_size: u8,
        next_chunk: u16,
        name_chunk: u16,
        name_length: u16,
        value_chunk: u16,
        value_length: u16,
        collision_differentiator: u16,
        hash: u64
    },
    Array{
        array: Vec<u8>,
        next_chunk: u16,
    },
    Free{
        next_chunk: u16
    }
}

impl ZapLeafChunk {
    pub fn get_ondisk_size() -> usize {
        // Source: https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L42
        24
    }

    pub fn get_byte_array_size() -> usize {
        // https://github.com/openzfs/zfs/blob/master/include/sys/zap_leaf.h#L62
        Self::get_ondisk_size()-3
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapLeafChunk> {
        let chunk_type = ZapLeafChunkType::from_value(data.read_u8()?)?;
        match chunk_type {
            ZapLeafChunkType::Entry => {
                let int_size = data.read_u8()?;
                let next_chunk = data.read_u16_le()?;
                let name_chunk = data.read_u16_le()?;
                let name_length = data.read_u16_le()?;
                let value_chunk = data.read_u16_le()?;
                let value_length = data.read_u16_le()?;
                let collision_differentiator = data.read_u16_le()?;
                data.skip_n_bytes(2)?; // padding
                let hash = data.read_u64_le()?;
                Some(ZapLeafChunk::Entry { 
                    int_size, 
                    next_chunk, 
                    name_chunk, 
                    name_length, 
                    value_chunk, 
                    value_length, 
                    collision_differentiator, 
                    hash 
                })
            },
            ZapLeafChunkType::Array => {
                let mut array = vec![0u8; Self::get_byte_array_size()];
                for byte in array.iter_mut() {
                    *byte = data.read_u8()?;
                }
                let next_chunk = data.read_u16_le()?;
                Some(ZapLeafChunk::Array { array, next_chunk })
            },
            ZapLeafChunkType::Free => {
                data.skip_n_bytes(Self::get_byte_array_size())?;
                let next_chunk = data.read_u16_le()?;
                Some(ZapLeafChunk::Free { next_chunk })
            },
        }
    }
}

#[derive(Debug)]
pub struct ZapPointerTable {
    block_id: u64,
    num_blocks: u64,
    shift: u64,
    next_block: u64,
    blocks_copied: u64
}

impl ZapPointerTable {
    pub fn get_ondisk_size() -> usize {
        core::mem::size_of::<u64>()*5
    }

    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>) -> Option<ZapPointerTable> {
        Some(ZapPointerTable { 
            block_id: data.read_u64_le()?, 
            num_blocks: data.read_u64_le()?, 
            shift: data.read_u64_le()?, 
            next_block: data.read_u64_le()?, 
            blocks_copied: data.read_u64_le()? 
        })
    }
}

#[derive(Debug)]

pub struct FatZapHeader {
    free_blocks: u64,
    num_leafs: u64,
    num_entries: u64,
    table: ZapPointerTable,
    embbeded_leafs_pointer_table: Vec<u64>
}

impl FatZapHeader {
    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>, block_size: usize) -> Option<FatZapHeader> {
        let zap_magic = data.read_u64_le()?;
        assert!(zap_magic == 0x2F52AB2AB);
        let table = ZapPointerTable::from_bytes_le(data)?;
        let free_blocks = data.read_u64_le()?;
        let num_leafs = data.read_u64_le()?;
        let num_entries = data.read_u64_le()?;
        let _salt = data.read_u64_le()?;
        data.skip_n_bytes(block_size/2-(core::mem::size_of::<u64>()*6+ZapPointerTable::get_ondisk_size()))?;
        let mut embbeded_leafs_pointer_table = vec![0u64; block_size/2/core::mem::size_of::<u64>()];
        for value in embbeded_leafs_pointer_table.iter_mut() {
            *value = data.read_u64_le()?;
        }

        Some(FatZapHeader{
            free_blocks, 
            num_leafs, 
            num_entries, 
            table, 
            embbeded_leafs_pointer_table 
        })
    }

    pub fn read_hash_table_at(&self, index: usize) -> u64 {
        if self.table.block_id == 0 {
            return self.embbeded_leafs_pointer_table[index];
        } else { todo!("Implement non-embedded fat zap tables!"); }
    }
}

#[derive(Debug)]
pub enum ZapHeader {
    FatZap(FatZapHeader),
    MicroZap
}

impl ZapHeader{
    pub fn from_bytes_le(data: &mut impl Iterator<Item = u8>, block_size: usize) -> Option<ZapHeader> {
        let zap_type = ZapType::from_value(data.read_u64_le()?)?;
        return match zap_type {
            ZapType::FatZapHeader => {
                FatZapHeader::from_bytes_le(data, block_size)
                .map(|header| ZapHeader::FatZap(header))
            },

            ZapType::MicroZap => {
                data.skip_n_bytes(128-core::mem::size_of::<u64>())?;
                Some(Self::MicroZap)
            },

            ZapType::FatZapLeaf => None
        };
    }

    pub fn unwrap_fat(self) -> FatZapHeader {
        match self {
            Self::FatZap(header) => header,
            _ => panic!("Expected to get a fat zap, got a micro zap!")
        }
    }
}

/// Decodes a ZAP entry name/value byte string, trying UTF-8 first and
/// falling back to Latin-1 (every byte is a valid Latin-1 codepoint, so
/// this never fails) -- mirrors `zap.py::safe_decode_string`'s intent of
/// always returning *something* printable for a corrupted or foreign-locale
/// name instead of propagating a decode error up through the whole walk.
pub fn safe_decode_string(raw: &[u8]) -> String {
    match String::from_utf8(raw.to_vec()) {
        Ok(s) => s,
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

fn trim_nul(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == 0) {
        Some(pos) => &raw[..pos],
        None => raw,
    }
}

pub const MZAP_ENT_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct MicroZapEntry {
    pub value: u64,
    pub cd: u32,
    pub name: String,
}

/// Parses the entries of a microzap object directly out of its sole data
/// block, at a fixed 64-byte stride starting right after the 64-byte
/// header (`zap.py::MicroZap.parse`).
pub fn parse_microzap_entries(block: &[u8]) -> Vec<MicroZapEntry> {
    let mut entries = Vec::new();
    let mut offset = MZAP_ENT_LEN;
    while offset + MZAP_ENT_LEN <= block.len() {
        let entry = &block[offset..offset + MZAP_ENT_LEN];
        offset += MZAP_ENT_LEN;

        let value = u64::from_le_bytes(entry[0..8].try_into().unwrap());
        let cd = u32::from_le_bytes(entry[8..12].try_into().unwrap());
        let name_raw = trim_nul(&entry[16..64]);
        if name_raw.is_empty() {
            continue;
        }
        entries.push(MicroZapEntry {
            value,
            cd,
            name: safe_decode_string(name_raw),
        });
    }
    entries
}

/// A decoded ZAP entry value, shaped to match what callers (system
/// attributes, in particular) expect: a scalar for `int_size == 8` with a
/// single value, an array of 16-bit words for `int_size == 2` (the shape
/// the SA layout/registration zaps use), and a generic 64-bit array for
/// anything wider that isn't a bare scalar.
#[derive(Debug, Clone)]
pub enum Value {
    U64(u64),
    U64Array(Vec<u64>),
    U16Array(Vec<u16>),
}

impl Value {
    fn decode(int_size: u8, raw: &[u8]) -> Value {
        let stride = int_size.max(1) as usize;
        match stride {
            2 => Value::U16Array(
                raw.chunks(2)
                    .map(|c| {
                        let mut buf = [0u8; 2];
                        buf[..c.len()].copy_from_slice(c);
                        u16::from_be_bytes(buf)
                    })
                    .collect(),
            ),
            _ => {
                let values: Vec<u64> = raw
                    .chunks(8)
                    .map(|c| {
                        let mut buf = [0u8; 8];
                        buf[..c.len()].copy_from_slice(c);
                        u64::from_be_bytes(buf)
                    })
                    .collect();
                if values.len() == 1 {
                    Value::U64(values[0])
                } else {
                    Value::U64Array(values)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FatZapEntry {
    pub name: String,
    pub int_size: u8,
    pub raw_value: Vec<u8>,
}

impl FatZapEntry {
    pub fn value(&self) -> Value {
        Value::decode(self.int_size, &self.raw_value)
    }
}

impl FatZapHeader {
    fn leaf_block_ids(&self) -> Vec<u64> {
        if self.table.block_id != 0 {
            // Only the embedded (in-header) pointer table is supported;
            // ZAPs that outgrew it need an indirect pointer-table block,
            // which this reader does not chase (see SPEC_FULL.md section 9).
            println!("Warning: Fat zap pointer table is not embedded, some entries will be missing!");
            return Vec::new();
        }
        let mut ids: Vec<u64> = self.embbeded_leafs_pointer_table.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Reads every leaf reachable from the embedded pointer table and
    /// returns the flattened (name, value) entries, following each entry's
    /// name/value chunk lists and any collision chain off `next_chunk`
    /// (`zap.py::FatZap._follow_collision_chain` / `_follow_chunk_list`).
    pub fn entries(
        &self,
        block_size: usize,
        mut read_block: impl FnMut(u64) -> Result<Vec<u8>, ()>,
    ) -> Vec<FatZapEntry> {
        let mut out = Vec::new();
        for leaf_id in self.leaf_block_ids() {
            let Ok(raw) = read_block(leaf_id) else { continue };
            let Some(leaf) = ZapLeaf::from_bytes_le(&mut raw.iter().copied(), block_size) else {
                continue;
            };
            for &head in &leaf.hash_table {
                let mut chunk_idx = head;
                while chunk_idx != 0xFFFF {
                    let Some(ZapLeafChunk::Entry {
                        next_chunk,
                        name_chunk,
                        name_length,
                        value_chunk,
                        value_length,
                        int_size,
                        ..
                    }) = leaf.chunks.get(chunk_idx as usize)
                    else {
                        break;
                    };
                    let name_bytes =
                        collect_chunk_list(&leaf.chunks, *name_chunk, *name_length as usize);
                    let value_bytes = collect_chunk_list(
                        &leaf.chunks,
                        *value_chunk,
                        *value_length as usize * (*int_size).max(1) as usize,
                    );
                    let name = safe_decode_string(trim_nul(&name_bytes));
                    out.push(FatZapEntry {
                        name,
                        int_size: *int_size,
                        raw_value: value_bytes,
                    });
                    chunk_idx = *next_chunk;
                }
            }
        }
        out
    }
}

/// Entry point used by the object-set / system-attributes layers: parses
/// whichever ZAP flavor the object's first data block holds and exposes a
/// single `entries()` call regardless of which one it turned out to be.
pub enum Zap {
    Micro(Vec<MicroZapEntry>),
    Fat(FatZapHeader),
}

impl Zap {
    pub fn parse(first_block: &[u8], block_size: usize) -> Option<Zap> {
        match ZapHeader::from_bytes_le(&mut first_block.iter().copied(), block_size)? {
            ZapHeader::MicroZap => Some(Zap::Micro(parse_microzap_entries(first_block))),
            ZapHeader::FatZap(header) => Some(Zap::Fat(header)),
        }
    }

    pub fn entries(
        &self,
        block_size: usize,
        read_block: impl FnMut(u64) -> Result<Vec<u8>, ()>,
    ) -> Vec<(String, Value)> {
        match self {
            Zap::Micro(entries) => entries
                .iter()
                .map(|e| (e.name.clone(), Value::U64(e.value)))
                .collect(),
            Zap::Fat(header) => header
                .entries(block_size, read_block)
                .into_iter()
                .map(|e| (e.name.clone(), e.value()))
                .collect(),
        }
    }

    pub fn lookup(
        &self,
        name: &str,
        block_size: usize,
        read_block: impl FnMut(u64) -> Result<Vec<u8>, ()>,
    ) -> Option<Value> {
        self.entries(block_size, read_block)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Flattens `entries()` into a name-keyed map, matching the shape the
    /// system-attributes layer and the object directory walk expect.
    pub fn dump_contents(
        &self,
        block_size: usize,
        read_block: impl FnMut(u64) -> Result<Vec<u8>, ()>,
    ) -> std::collections::HashMap<String, Value> {
        self.entries(block_size, read_block).into_iter().collect()
    }
}

fn collect_chunk_list(chunks: &[ZapLeafChunk], start: u16, total_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total_len);
    let mut idx = start;
    while idx != 0xFFFF && out.len() < total_len {
        match chunks.get(idx as usize) {
            Some(ZapLeafChunk::Array { array, next_chunk }) => {
                let remaining = total_len - out.len();
                out.extend(array.iter().take(remaining));
                idx = *next_chunk;
            }
            _ => break,
        }
    }
    out
}