use std::collections::HashMap;

use crate::ansi_color::*;
use crate::byte_iter::ByteIter;
use crate::fletcher::{do_fletcher2, do_fletcher4};
use crate::lz4::lz4_decompress_blocks;
use crate::lzjb::lzjb_decompress;
use crate::vdev::Vdev;

pub const GANGBLOCK_MAGIC: u64 = 0x210da7ab10c7a11;

/// A gang block: a header listing up to 3 constituent block pointers.
/// Parsed so that a gang DVA can be recognized and rejected cleanly; this
/// reader never follows a gang block (explicit non-goal, see SPEC_FULL.md).
#[derive(Debug, Clone)]
pub struct GangBlock {
    pub bps: [Option<NormalBlockPointer>; 3],
    pub magic: u64,
    pub checksum: [u64; 4],
}

impl GangBlock {
    pub fn get_ondisk_size() -> usize {
        512
    }

    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<GangBlock> {
        let mut bps = [None, None, None];
        for bp in bps.iter_mut() {
            let bp_bytes: Vec<u8> = data.by_ref().take(128).collect();
            if bp_bytes.len() != 128 {
                return None;
            }
            *bp = NormalBlockPointer::from_bytes_le(&mut bp_bytes.into_iter());
        }
        data.skip_n_bytes(512 - 3 * 128 - 8 - 32)?;
        let magic = data.read_u64_le()?;
        let checksum = [
            data.read_u64_le()?,
            data.read_u64_le()?,
            data.read_u64_le()?,
            data.read_u64_le()?,
        ];
        Some(GangBlock {
            bps,
            magic,
            checksum,
        })
    }
}

/// Data virtual address: locates one physical copy of a block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DataVirtualAddress {
    pub vdev_id: u32,
    data_allocated_size_minus_one_in_512b_sectors: u32,
    pub offset_in_512b_sectors: u64,
    pub is_gang: bool,
}

impl std::fmt::Debug for DataVirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<0x{:x}:0x{:x}:0x{:x}:{}>",
            self.vdev_id,
            self.parse_offset(),
            self.parse_allocated_size(),
            self.is_gang
        )
    }
}

impl DataVirtualAddress {
    pub fn get_ondisk_size() -> usize {
        16
    }

    pub fn from(vdev_id: u32, offset: u64, is_gang: bool) -> DataVirtualAddress {
        DataVirtualAddress {
            vdev_id,
            data_allocated_size_minus_one_in_512b_sectors: 0,
            offset_in_512b_sectors: offset / 512,
            is_gang,
        }
    }

    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<Option<DataVirtualAddress>> {
        let grid_and_asize = data.read_u32_le()?;
        let vdev_id = data.read_u32_le()?;
        let offset_and_gang_bit = data.read_u64_le()?;

        // Stricter three-way null check (vdev, offset, asize all zero):
        // see SPEC_FULL.md section 9 for why the looser two-way check is
        // wrong.
        if vdev_id == 0 && grid_and_asize == 0 && offset_and_gang_bit == 0 {
            return Some(None);
        }

        let asize = grid_and_asize & 0x00ff_ffff;
        let is_gang = (offset_and_gang_bit >> 63) & 1 == 1;
        let offset = offset_and_gang_bit & !(1 << 63);

        Some(Some(DataVirtualAddress {
            vdev_id,
            data_allocated_size_minus_one_in_512b_sectors: asize,
            offset_in_512b_sectors: offset,
            is_gang,
        }))
    }

    pub fn parse_allocated_size(&self) -> usize {
        (self.data_allocated_size_minus_one_in_512b_sectors as usize + 1) * 512
    }

    pub fn parse_offset(&self) -> u64 {
        self.offset_in_512b_sectors * 512
    }

    pub fn dereference(&self, vdevs: &mut Vdevs, psize: usize) -> Result<Vec<u8>, ()> {
        if self.is_gang {
            return Err(());
        }
        let vdev = vdevs.get_mut(&(self.vdev_id as usize)).ok_or(())?;
        vdev.read(self.parse_offset(), psize)
    }
}

pub type Vdevs<'a> = HashMap<usize, &'a mut dyn Vdev>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMethod {
    Inherit,
    On,
    Off,
    Label,
    GangHeader,
    Zilog,
    Fletcher2,
    Fletcher4,
    Sha256,
    Zilog2,
    NoParity,
    Sha512,
    Skein,
    Edonr,
    Blake3,
}

impl ChecksumMethod {
    pub fn from_value(value: u8) -> Option<ChecksumMethod> {
        use ChecksumMethod::*;
        Some(match value {
            0 => Inherit,
            1 => On,
            2 => Off,
            3 => Label,
            4 => GangHeader,
            5 => Zilog,
            6 => Fletcher2,
            7 => Fletcher4,
            8 => Sha256,
            9 => Zilog2,
            10 => NoParity,
            11 => Sha512,
            12 => Skein,
            13 => Edonr,
            14 => Blake3,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Inherit,
    On,
    Off,
    Lzjb,
    Empty,
    Gzip1,
    Gzip2,
    Gzip3,
    Gzip4,
    Gzip5,
    Gzip6,
    Gzip7,
    Gzip8,
    Gzip9,
    Zle,
    Lz4,
    Zstd,
}

impl CompressionMethod {
    pub fn from_value(value: u8) -> Option<CompressionMethod> {
        use CompressionMethod::*;
        Some(match value {
            0 => Inherit,
            1 => On,
            2 => Off,
            3 => Lzjb,
            4 => Empty,
            5 => Gzip1,
            6 => Gzip2,
            7 => Gzip3,
            8 => Gzip4,
            9 => Gzip5,
            10 => Gzip6,
            11 => Gzip7,
            12 => Gzip8,
            13 => Gzip9,
            14 => Zle,
            15 => Lz4,
            16 => Zstd,
            _ => return None,
        })
    }
}

/// Implements SPEC_FULL.md 4.5 step 3: dispatch on compression algorithm,
/// zero-pad to `lsize`.
pub fn try_decompress_block(
    data: &[u8],
    compression_method: CompressionMethod,
    lsize: usize,
) -> Result<Vec<u8>, ()> {
    let mut decompressed = match compression_method {
        CompressionMethod::Off => data.to_vec(),
        CompressionMethod::Lz4 => {
            let mut it = data.iter().copied();
            let comp_size = it.read_u32_be().ok_or(())? as usize;
            let comp_data: Vec<u8> = it.take(comp_size).collect();
            lz4_decompress_blocks(&mut comp_data.into_iter(), lsize)?
        }
        // "on" means "whatever algorithm the pool used by default at write time",
        // which for this format is lzjb, not lz4.
        CompressionMethod::Lzjb | CompressionMethod::On => lzjb_decompress(&mut data.iter().copied(), lsize)?,
        _ => {
            println!(
                "{YELLOW}Warning{WHITE}: Unsupported compression method {:?}!",
                compression_method
            );
            return Err(());
        }
    };
    if decompressed.len() < lsize {
        decompressed.resize(lsize, 0);
    }
    Ok(decompressed)
}

pub fn try_checksum_block(data: &[u8], checksum_method: ChecksumMethod) -> Option<[u64; 4]> {
    match checksum_method {
        ChecksumMethod::Fletcher4 | ChecksumMethod::GangHeader | ChecksumMethod::On => {
            Some(do_fletcher4(data))
        }
        ChecksumMethod::Fletcher2 => Some(do_fletcher2(data)),
        _ => {
            println!(
                "{YELLOW}Warning{WHITE}: Unsupported checksum method {:?}!",
                checksum_method
            );
            None
        }
    }
}

// Normal BP info qword layout (bit 63 down to 0):
// [E:1][lvl:7][encrypted:1][type:8][cksum:8][comp:7][psize:16][lsize:16]
// where E is the embedded flag (must be 0 here).

#[derive(Clone)]
pub struct NormalBlockPointer {
    pub dvas: [Option<DataVirtualAddress>; 3],
    pub level: u8,
    pub fill: u64,
    pub logical_birth_txg: u64,
    pub typ: crate::dmu::ObjType,
    pub checksum_method: ChecksumMethod,
    pub compression_method: CompressionMethod,
    physical_size_in_512b_sectors_minus_one: u16,
    logical_size_in_512b_sectors_minus_one: u16,
    pub checksum: [u64; 4],
}

impl std::fmt::Debug for NormalBlockPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BP{{dvas: {:?}, lvl: {}, type: {:?}, cksum: {:?}, comp: {:?}, lsize: 0x{:x}, psize: 0x{:x}, birth: {}}}",
            self.dvas,
            self.level,
            self.typ,
            self.checksum_method,
            self.compression_method,
            self.parse_logical_size(),
            self.parse_physical_size(),
            self.logical_birth_txg
        )
    }
}

impl NormalBlockPointer {
    pub fn get_ondisk_size() -> usize {
        128
    }

    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<NormalBlockPointer> {
        let dva0 = DataVirtualAddress::from_bytes_le(data)?;
        let dva1 = DataVirtualAddress::from_bytes_le(data)?;
        let dva2 = DataVirtualAddress::from_bytes_le(data)?;

        let info = data.read_u64_le()?;
        let embedded = (info >> 39) & 1;
        if embedded != 0 {
            return None;
        }
        let encrypted = (info >> 61) & 1;
        if encrypted != 0 {
            return None;
        }
        let endian = (info >> 63) & 1;
        if endian != 1 {
            return None;
        }

        let lsize = (info & 0xffff) as u16;
        let psize = ((info >> 16) & 0xffff) as u16;
        let comp = ((info >> 32) & 0x7f) as u8;
        let cksum = ((info >> 40) & 0xff) as u8;
        let typ = ((info >> 48) & 0xff) as u8;
        let level = ((info >> 56) & 0x7f) as u8;

        data.skip_n_bytes(8)?; // padding qword
        let logical_birth_txg = data.read_u64_le()?;
        let fill = data.read_u64_le()?;
        let checksum = [
            data.read_u64_le()?,
            data.read_u64_le()?,
            data.read_u64_le()?,
            data.read_u64_le()?,
        ];

        Some(NormalBlockPointer {
            dvas: [dva0, dva1, dva2],
            level,
            fill,
            logical_birth_txg,
            typ: crate::dmu::ObjType::from_value(typ as usize).unwrap_or(crate::dmu::ObjType::None),
            checksum_method: ChecksumMethod::from_value(cksum)?,
            compression_method: CompressionMethod::from_value(comp)?,
            physical_size_in_512b_sectors_minus_one: psize,
            logical_size_in_512b_sectors_minus_one: lsize,
            checksum,
        })
    }

    pub fn parse_logical_size(&self) -> usize {
        (self.logical_size_in_512b_sectors_minus_one as usize + 1) * 512
    }

    pub fn parse_physical_size(&self) -> usize {
        (self.physical_size_in_512b_sectors_minus_one as usize + 1) * 512
    }

    /// Is this BP live at all, i.e. does at least one DVA copy exist?
    pub fn is_live(&self) -> bool {
        self.dvas.iter().any(Option::is_some)
    }

    pub fn dereference(&self, vdevs: &mut Vdevs) -> Result<Vec<u8>, ()> {
        for dva in self.dvas.iter().flatten() {
            if dva.is_gang {
                println!(
                    "{YELLOW}Warning{WHITE}: Gang blocks are not supported, skipping DVA {:?}!",
                    dva
                );
                continue;
            }
            let Ok(raw) = dva.dereference(vdevs, self.parse_physical_size()) else {
                continue;
            };
            if let Some(checksum) = try_checksum_block(&raw, self.checksum_method) {
                if checksum != self.checksum {
                    println!(
                        "{YELLOW}Warning{WHITE}: Checksum mismatch for DVA {:?}, trying next copy!",
                        dva
                    );
                    continue;
                }
            }
            let Ok(decompressed) =
                try_decompress_block(&raw, self.compression_method, self.parse_logical_size())
            else {
                continue;
            };
            return Ok(decompressed);
        }
        Err(())
    }
}

#[derive(Clone)]
pub struct EmbeddedBlockPointer {
    pub payload: Vec<u8>,
    pub logical_birth_txg: u64,
    pub level: u8,
    pub typ: crate::dmu::ObjType,
    pub embedded_data_type: u8,
    pub compression_method: CompressionMethod,
    physical_size_in_bytes: u8,
    logical_size_in_bytes: u32,
}

impl std::fmt::Debug for EmbeddedBlockPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EmbeddedBP{{type: {:?}, comp: {:?}, lsize: {}, psize: {}}}",
            self.typ, self.compression_method, self.logical_size_in_bytes, self.physical_size_in_bytes
        )
    }
}

impl EmbeddedBlockPointer {
    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<EmbeddedBlockPointer> {
        let mut payload: Vec<u8> = data.by_ref().take(6 * 8).collect();
        if payload.len() != 6 * 8 {
            return None;
        }

        let info = data.read_u64_le()?;
        let embedded = (info >> 39) & 1;
        if embedded != 1 {
            return None;
        }
        let lsize = (info & 0x01ff_ffff) as u32;
        let psize = ((info >> 25) & 0x7f) as u8;
        let etype = ((info >> 32) & 0xff) as u8;
        let comp = ((info >> 40) & 0x7f) as u8;
        let typ = ((info >> 48) & 0xff) as u8;
        let level = ((info >> 56) & 0x7f) as u8;

        let mut more_payload: Vec<u8> = data.by_ref().take(8).collect();
        payload.append(&mut more_payload);

        let logical_birth_txg = data.read_u64_le()?;
        data.skip_n_bytes(8)?; // fill / reserved
        let mut rest_payload: Vec<u8> = data.by_ref().take(24).collect();
        payload.append(&mut rest_payload);

        payload.truncate(psize as usize);

        Some(EmbeddedBlockPointer {
            payload,
            logical_birth_txg,
            level,
            typ: crate::dmu::ObjType::from_value(typ as usize).unwrap_or(crate::dmu::ObjType::None),
            embedded_data_type: etype,
            compression_method: CompressionMethod::from_value(comp)?,
            physical_size_in_bytes: psize,
            logical_size_in_bytes: lsize,
        })
    }

    pub fn parse_logical_size(&self) -> usize {
        self.logical_size_in_bytes as usize
    }

    pub fn parse_physical_size(&self) -> usize {
        self.physical_size_in_bytes as usize
    }

    pub fn dereference(&self) -> Result<Vec<u8>, ()> {
        try_decompress_block(&self.payload, self.compression_method, self.parse_logical_size())
    }
}

#[derive(Debug, Clone)]
pub enum BlockPointer {
    Normal(NormalBlockPointer),
    Embedded(EmbeddedBlockPointer),
}

impl BlockPointer {
    pub fn get_ondisk_size() -> usize {
        128
    }

    pub fn from_bytes_le(data: &mut dyn Iterator<Item = u8>) -> Option<BlockPointer> {
        let raw: Vec<u8> = data.take(128).collect();
        if raw.len() != 128 {
            return None;
        }
        // Peek the embedded bit (info qword starts at byte 6*8=48, bit 39).
        let info = u64::from_le_bytes(raw[88..96].try_into().ok()?);
        let embedded = (info >> 39) & 1;
        if embedded == 1 {
            EmbeddedBlockPointer::from_bytes_le(&mut raw.into_iter()).map(BlockPointer::Embedded)
        } else {
            NormalBlockPointer::from_bytes_le(&mut raw.into_iter()).map(BlockPointer::Normal)
        }
    }

    pub fn parse_logical_size(&self) -> usize {
        match self {
            BlockPointer::Normal(bp) => bp.parse_logical_size(),
            BlockPointer::Embedded(bp) => bp.parse_logical_size(),
        }
    }

    pub fn parse_physical_size(&self) -> usize {
        match self {
            BlockPointer::Normal(bp) => bp.parse_physical_size(),
            BlockPointer::Embedded(bp) => bp.parse_physical_size(),
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            BlockPointer::Normal(bp) => bp.level,
            BlockPointer::Embedded(bp) => bp.level,
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            BlockPointer::Normal(bp) => bp.is_live(),
            BlockPointer::Embedded(_) => true,
        }
    }

    pub fn dereference(&self, vdevs: &mut Vdevs) -> Result<Vec<u8>, ()> {
        match self {
            BlockPointer::Normal(bp) => bp.dereference(vdevs),
            BlockPointer::Embedded(bp) => bp.dereference(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_dva_bytes() -> [u8; 16] {
        [0u8; 16]
    }

    #[test]
    fn dva_all_zero_is_null() {
        let mut it = null_dva_bytes().into_iter();
        assert_eq!(DataVirtualAddress::from_bytes_le(&mut it), Some(None));
    }

    #[test]
    fn dva_with_only_offset_is_not_null() {
        // vdev=0, asize=0, offset nonzero: the stricter check must still
        // treat this as a live DVA.
        let mut bytes = vec![0u8; 16];
        bytes[8..16].copy_from_slice(&(512u64).to_le_bytes());
        let mut it = bytes.into_iter();
        assert!(DataVirtualAddress::from_bytes_le(&mut it).unwrap().is_some());
    }

    #[test]
    fn dva_roundtrips_offset_and_asize() {
        let dva = DataVirtualAddress::from(3, 512 * 10, false);
        assert_eq!(dva.vdev_id, 3);
        assert_eq!(dva.parse_offset(), 512 * 10);
    }

    #[test]
    fn bp_properties_qword_extraction() {
        // Construct a minimal valid normal BP: 3 null DVAs, info qword with
        // lsize=0 (->512), psize=0 (->512), endian bit set, rest zero, then
        // padding/birth/fill/checksum.
        let mut bytes = vec![0u8; 128];
        let info: u64 = 1u64 << 63; // endian=1, everything else 0
        bytes[24..32].copy_from_slice(&info.to_le_bytes());
        let bp = NormalBlockPointer::from_bytes_le(&mut bytes.into_iter()).unwrap();
        assert_eq!(bp.parse_logical_size(), 512);
        assert_eq!(bp.parse_physical_size(), 512);
        assert!(!bp.is_live());
    }
}
