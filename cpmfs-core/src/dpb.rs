//! Disk Parameter Block: the fixed geometry of one drive type.
//!
//! Layout of a disk image described by a DPB:
//! - `off` reserved (system) tracks
//! - `dsm + 1` data blocks of `128 << bsh` bytes, starting with the directory
//! - possibly a few spare sectors at the end that CP/M never touches
//!
//! Sectors inside a track are stored interleaved; `skew[logical] = physical`.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{CpmError, CpmResult};
use crate::geometry::RECORD_SIZE;

/// Size of one directory entry.
pub const ENTRY_SIZE: usize = 32;

/// Directory entries per 128-byte sector.
pub const ENTRIES_PER_SECTOR: usize = RECORD_SIZE / ENTRY_SIZE;

/// Bytes in an entry's allocation list.
pub const ALLOC_BYTES: usize = 16;

/// Disk Parameter Block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskParams {
    /// 128-byte sectors per track.
    pub spt: u16,
    /// Block shift: block size is `128 << bsh`.
    pub bsh: u8,
    /// Block mask: `(1 << bsh) - 1`.
    pub blm: u8,
    /// Extent mask: logical extents folded into one directory entry, minus one.
    pub exm: u8,
    /// Number of blocks on the disk minus one.
    pub dsm: u16,
    /// Number of directory entries minus one.
    pub drm: u16,
    /// Directory allocation bitmap, first byte.
    #[serde(default)]
    pub al0: u8,
    /// Directory allocation bitmap, second byte.
    #[serde(default)]
    pub al1: u8,
    /// Checksum vector size (0 for fixed disks).
    #[serde(default)]
    pub cks: u16,
    /// Reserved tracks before the directory.
    pub off: u16,
    /// Logical to physical sector translation, `spt` entries.
    pub skew: Vec<u8>,
}

impl DiskParams {
    /// 8-inch single density floppy (250K): 77 tracks of 26 sectors, 1K blocks.
    pub fn floppy_8in() -> Self {
        Self {
            spt: 26,
            bsh: 3,
            blm: 7,
            exm: 0,
            dsm: 242,
            drm: 63,
            al0: 0xC0,
            al1: 0,
            cks: 16,
            off: 2,
            skew: vec![
                0, 6, 12, 18, 24, 4, 10, 16, 22, 2, 8, 14, 20, 1, 7, 13, 19, 25, 5, 11, 17, 23, 3,
                9, 15, 21,
            ],
        }
    }

    /// 5MB hard disk: 64 sectors per track, 2K blocks, no interleave.
    pub fn hard_disk() -> Self {
        Self {
            spt: 64,
            bsh: 4,
            blm: 15,
            exm: 0,
            dsm: 2441,
            drm: 1023,
            al0: 0xFF,
            al1: 0xFF,
            cks: 0,
            off: 2,
            skew: (0..64).collect(),
        }
    }

    /// Look up a built-in drive type by name.
    pub fn by_name(name: &str) -> CpmResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fd" | "8in" | "floppy" => Ok(Self::floppy_8in()),
            "hd" | "hard" => Ok(Self::hard_disk()),
            _ => Err(CpmError::UnknownDiskType(name.to_string())),
        }
    }

    /// Load and validate parameters from JSON.
    pub fn from_reader<R: Read>(reader: R) -> CpmResult<Self> {
        let params: Self = serde_json::from_reader(reader)?;
        params.validate()?;
        Ok(params)
    }

    /// Check the internal consistency of the block.
    pub fn validate(&self) -> CpmResult<()> {
        let fail = |msg: String| Err(CpmError::InvalidParams(msg));

        if self.spt == 0 {
            return fail("spt must be non-zero".into());
        }
        if !(3..=7).contains(&self.bsh) {
            return fail(format!("bsh {} outside 3..=7", self.bsh));
        }
        if self.blm as u16 != (1u16 << self.bsh) - 1 {
            return fail(format!("blm {} does not match bsh {}", self.blm, self.bsh));
        }
        // Each directory entry may fold at most (slots * block) / 16K logical extents.
        let max_exm = (self.alloc_slots() * self.block_size()) / (16 * 1024);
        if max_exm == 0 || self.exm as usize > max_exm - 1 || !(self.exm as usize + 1).is_power_of_two() {
            return fail(format!("exm {} invalid for this block size", self.exm));
        }
        if self.skew.len() != self.spt as usize {
            return fail(format!(
                "skew table has {} entries, expected {}",
                self.skew.len(),
                self.spt
            ));
        }
        let mut seen = vec![false; self.spt as usize];
        for &phys in &self.skew {
            match seen.get_mut(phys as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return fail(format!("skew table is not a permutation (entry {})", phys)),
            }
        }
        if self.directory_blocks() > self.dsm as usize {
            return fail("directory does not fit on the disk".into());
        }
        Ok(())
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        RECORD_SIZE << self.bsh
    }

    /// 128-byte sectors per block.
    pub fn sectors_per_block(&self) -> u32 {
        1 << self.bsh
    }

    /// Total number of blocks.
    pub fn block_count(&self) -> usize {
        self.dsm as usize + 1
    }

    /// Total number of directory entries.
    pub fn entry_count(&self) -> usize {
        self.drm as usize + 1
    }

    /// True if block numbers need two bytes in the allocation list.
    pub fn wide_blocks(&self) -> bool {
        self.block_count() > 256
    }

    /// Block numbers one directory entry can hold (16 or 8).
    pub fn alloc_slots(&self) -> usize {
        if self.wide_blocks() {
            ALLOC_BYTES / 2
        } else {
            ALLOC_BYTES
        }
    }

    /// Record count of a full directory entry.
    pub fn records_per_entry(&self) -> u32 {
        self.alloc_slots() as u32 * self.sectors_per_block()
    }

    /// Sectors occupied by the directory.
    pub fn directory_sectors(&self) -> u32 {
        (self.entry_count() * ENTRY_SIZE / RECORD_SIZE) as u32
    }

    /// Blocks reserved for the directory, starting at block 0.
    pub fn directory_blocks(&self) -> usize {
        let per_block = self.block_size() / ENTRY_SIZE;
        self.entry_count().div_ceil(per_block)
    }

    /// Block holding `record_index` (relative to the first record of an entry).
    pub fn block_of(&self, record_index: u32) -> u32 {
        record_index >> self.bsh
    }

    /// Record within its block.
    pub fn record_in_block(&self, record_index: u32) -> u32 {
        record_index & self.blm as u32
    }

    /// First logical sector of a block.
    pub fn block_sector(&self, block: u16) -> u32 {
        (block as u32) << self.bsh
    }

    /// Byte offset of a logical sector inside the image.
    pub fn physical_offset(&self, sector: u32) -> u64 {
        let spt = self.spt as u64;
        let track = sector as u64 / spt + self.off as u64;
        let phys = self.skew[(sector as u64 % spt) as usize] as u64;
        (track * spt + phys) * RECORD_SIZE as u64
    }

    /// Logical sector stored at `offset`, if it is a sector boundary in the data region.
    pub fn logical_sector(&self, offset: u64) -> Option<u32> {
        if offset % RECORD_SIZE as u64 != 0 {
            return None;
        }
        let spt = self.spt as u64;
        let index = offset / RECORD_SIZE as u64;
        let track = (index / spt).checked_sub(self.off as u64)?;
        let phys = (index % spt) as u8;
        let logical = self.skew.iter().position(|&p| p == phys)? as u64;
        u32::try_from(track * spt + logical).ok()
    }

    /// Sectors addressable by the filesystem (all data blocks).
    pub fn data_sectors(&self) -> u32 {
        self.block_count() as u32 * self.sectors_per_block()
    }

    /// Tracks needed for the reserved area plus every data block.
    pub fn min_tracks(&self) -> u32 {
        self.off as u32 + self.data_sectors().div_ceil(self.spt as u32)
    }

    /// Image size in bytes for a disk of `tracks` tracks.
    pub fn image_size(&self, tracks: u32) -> u64 {
        tracks as u64 * self.spt as u64 * RECORD_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_params_are_valid() {
        DiskParams::floppy_8in().validate().unwrap();
        DiskParams::hard_disk().validate().unwrap();
    }

    #[test]
    fn test_skew_is_permutation() {
        for dpb in [DiskParams::floppy_8in(), DiskParams::hard_disk()] {
            let mut sorted = dpb.skew.clone();
            sorted.sort_unstable();
            let expected: Vec<u8> = (0..dpb.spt as u8).collect();
            assert_eq!(sorted, expected);
        }
    }

    #[test]
    fn test_floppy_layout() {
        let dpb = DiskParams::floppy_8in();
        assert_eq!(dpb.block_size(), 1024);
        assert_eq!(dpb.directory_sectors(), 16);
        assert_eq!(dpb.directory_blocks(), 2);
        assert!(!dpb.wide_blocks());
        assert_eq!(dpb.alloc_slots(), 16);
        assert_eq!(dpb.records_per_entry(), 128);
        assert_eq!(dpb.min_tracks(), 77);
    }

    #[test]
    fn test_hard_disk_layout() {
        let dpb = DiskParams::hard_disk();
        assert_eq!(dpb.block_size(), 2048);
        assert!(dpb.wide_blocks());
        assert_eq!(dpb.alloc_slots(), 8);
        assert_eq!(dpb.records_per_entry(), 128);
        assert_eq!(dpb.directory_blocks(), 16);
        assert_eq!(dpb.directory_sectors(), 256);
    }

    #[test]
    fn test_first_sector_offset() {
        let dpb = DiskParams::floppy_8in();
        assert_eq!(dpb.physical_offset(0), 6656);
        // Logical sector 1 sits six sectors further along the track.
        assert_eq!(dpb.physical_offset(1), 6656 + 6 * 128);
        // Next track starts over at skew[0].
        assert_eq!(dpb.physical_offset(26), 3 * 26 * 128);
    }

    #[test]
    fn test_logical_sector_inverse() {
        let dpb = DiskParams::floppy_8in();
        for sector in 0..dpb.data_sectors() {
            let offset = dpb.physical_offset(sector);
            assert_eq!(dpb.logical_sector(offset), Some(sector));
        }
        assert_eq!(dpb.logical_sector(0), None); // reserved track
        assert_eq!(dpb.logical_sector(6656 + 1), None); // not a boundary
    }

    #[test]
    fn test_block_arithmetic() {
        let dpb = DiskParams::floppy_8in();
        assert_eq!(dpb.block_of(0), 0);
        assert_eq!(dpb.block_of(7), 0);
        assert_eq!(dpb.block_of(8), 1);
        assert_eq!(dpb.record_in_block(13), 5);
        assert_eq!(dpb.block_sector(2), 16);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(DiskParams::by_name("HD").unwrap(), DiskParams::hard_disk());
        assert_eq!(DiskParams::by_name("8in").unwrap(), DiskParams::floppy_8in());
        assert!(matches!(
            DiskParams::by_name("zip"),
            Err(CpmError::UnknownDiskType(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "spt": 4, "bsh": 3, "blm": 7, "exm": 0,
            "dsm": 99, "drm": 31, "off": 1,
            "skew": [0, 2, 1, 3]
        }"#;
        let dpb = DiskParams::from_reader(json.as_bytes()).unwrap();
        assert_eq!(dpb.spt, 4);
        assert_eq!(dpb.cks, 0);
        assert_eq!(dpb.physical_offset(1), (4 + 2) * 128);
    }

    #[test]
    fn test_rejects_bad_skew() {
        let mut dpb = DiskParams::floppy_8in();
        dpb.skew[1] = 0;
        assert!(matches!(dpb.validate(), Err(CpmError::InvalidParams(_))));

        let mut dpb = DiskParams::floppy_8in();
        dpb.skew.pop();
        assert!(dpb.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_masks() {
        let mut dpb = DiskParams::floppy_8in();
        dpb.blm = 15;
        assert!(dpb.validate().is_err());

        // 1K blocks with 16 slots give exactly one 16K extent per entry.
        let mut dpb = DiskParams::floppy_8in();
        dpb.exm = 1;
        assert!(dpb.validate().is_err());

        // 16K blocks on a small disk fold up to 16 extents.
        let mut dpb = DiskParams::floppy_8in();
        dpb.bsh = 7;
        dpb.blm = 127;
        dpb.dsm = 15;
        dpb.exm = 15;
        dpb.validate().unwrap();
    }
}
