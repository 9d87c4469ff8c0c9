//! Directory entry codec and CP/M name handling.
//!
//! Entry layout (32 bytes):
//! - Byte 0: user number (0-15), 0xE5 for a free slot
//! - Bytes 1-8: name (space-padded)
//! - Bytes 9-11: type (space-padded); T1 bit 7 = read-only, T2 bit 7 = system
//! - Byte 12: EX, low bits of the extent number
//! - Byte 13: S1, reserved
//! - Byte 14: S2, high bits of the extent number
//! - Byte 15: RC, records in the last logical extent of this entry
//! - Bytes 16-31: allocation list, 16 one-byte or 8 two-byte block numbers

use crate::dpb::{DiskParams, ALLOC_BYTES, ENTRY_SIZE};
use crate::error::{CpmError, CpmResult};
use crate::geometry::{EXTENTS_PER_MODULE, RECORDS_PER_EXTENT};

/// Status byte of a free (deleted or never used) directory slot.
pub const FREE_ENTRY: u8 = 0xE5;

/// An 11-byte space-padded name as stored in an FCB or directory entry.
pub type PackedName = [u8; 11];

/// Classification of a directory slot by its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Free,
    /// A file extent belonging to this user number.
    File(u8),
    /// Labels, timestamps and other markers this layout does not model.
    Reserved(u8),
}

/// One 32-byte directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub user: u8,
    pub name: [u8; 8],
    pub typ: [u8; 3],
    pub ex: u8,
    pub s1: u8,
    pub s2: u8,
    pub rc: u8,
    pub al: [u8; ALLOC_BYTES],
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::free()
    }
}

impl DirEntry {
    /// A free slot as written by a freshly formatted disk.
    pub fn free() -> Self {
        Self::from_bytes(&[FREE_ENTRY; ENTRY_SIZE])
    }

    /// Unpack an entry from its on-disk bytes (at least 32).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut entry = Self {
            user: bytes[0],
            name: [0; 8],
            typ: [0; 3],
            ex: bytes[12],
            s1: bytes[13],
            s2: bytes[14],
            rc: bytes[15],
            al: [0; ALLOC_BYTES],
        };
        entry.name.copy_from_slice(&bytes[1..9]);
        entry.typ.copy_from_slice(&bytes[9..12]);
        entry.al.copy_from_slice(&bytes[16..32]);
        entry
    }

    /// Pack the entry into its on-disk bytes.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[0] = self.user;
        bytes[1..9].copy_from_slice(&self.name);
        bytes[9..12].copy_from_slice(&self.typ);
        bytes[12] = self.ex;
        bytes[13] = self.s1;
        bytes[14] = self.s2;
        bytes[15] = self.rc;
        bytes[16..32].copy_from_slice(&self.al);
        bytes
    }

    pub fn status(&self) -> EntryStatus {
        match self.user {
            FREE_ENTRY => EntryStatus::Free,
            u if u < 0x20 => EntryStatus::File(u),
            other => EntryStatus::Reserved(other),
        }
    }

    pub fn is_free(&self) -> bool {
        self.user == FREE_ENTRY
    }

    pub fn is_file(&self) -> bool {
        matches!(self.status(), EntryStatus::File(_))
    }

    pub fn is_read_only(&self) -> bool {
        self.typ[0] & 0x80 != 0
    }

    pub fn is_system(&self) -> bool {
        self.typ[1] & 0x80 != 0
    }

    /// Name and type with attribute bits stripped.
    pub fn packed_name(&self) -> PackedName {
        let mut packed = [b' '; 11];
        packed[..8].copy_from_slice(&self.name);
        packed[8..].copy_from_slice(&self.typ);
        for b in &mut packed {
            *b &= 0x7F;
        }
        packed
    }

    /// Host-style lowercase name (`name.typ`).
    pub fn file_name(&self) -> String {
        decode_name(&self.packed_name())
    }

    /// Set name and type from a packed name.
    pub fn set_packed_name(&mut self, packed: &PackedName) {
        self.name.copy_from_slice(&packed[..8]);
        self.typ.copy_from_slice(&packed[8..]);
    }

    /// Raw logical extent counter (`EX + 32 * S2`).
    pub fn logical_extent(&self) -> u32 {
        self.ex as u32 + EXTENTS_PER_MODULE * self.s2 as u32
    }

    /// Index of this entry in the file's chain of entries.
    pub fn extent_number(&self, dpb: &DiskParams) -> u32 {
        self.logical_extent() / (dpb.exm as u32 + 1)
    }

    /// Records held by this entry.
    pub fn record_count(&self, dpb: &DiskParams) -> u32 {
        RECORDS_PER_EXTENT * (self.ex & dpb.exm) as u32 + self.rc as u32
    }

    /// True if the file continues in the next entry of the chain.
    pub fn is_full(&self, dpb: &DiskParams) -> bool {
        self.record_count(dpb) >= dpb.records_per_entry()
    }

    /// Block number in allocation slot `slot` (0 = unused).
    pub fn block(&self, dpb: &DiskParams, slot: usize) -> u16 {
        if dpb.wide_blocks() {
            u16::from_le_bytes([self.al[slot * 2], self.al[slot * 2 + 1]])
        } else {
            self.al[slot] as u16
        }
    }

    /// Allocated blocks, in order, up to the first unused slot.
    pub fn blocks(&self, dpb: &DiskParams) -> Vec<u16> {
        (0..dpb.alloc_slots())
            .map(|slot| self.block(dpb, slot))
            .take_while(|&blk| blk != 0)
            .collect()
    }

    /// Replace the allocation list. Extra slots are zeroed.
    pub fn set_blocks(&mut self, dpb: &DiskParams, blocks: &[u16]) {
        debug_assert!(blocks.len() <= dpb.alloc_slots());
        self.al = [0; ALLOC_BYTES];
        for (slot, &blk) in blocks.iter().enumerate() {
            if dpb.wide_blocks() {
                self.al[slot * 2..slot * 2 + 2].copy_from_slice(&blk.to_le_bytes());
            } else {
                self.al[slot] = blk as u8;
            }
        }
    }

    /// Set `EX`/`S2`/`RC` for the `index`-th entry of a file holding `records` records.
    pub fn set_extent(&mut self, dpb: &DiskParams, index: u32, records: u32) {
        let last = records.saturating_sub(1) / RECORDS_PER_EXTENT;
        let logical = index * (dpb.exm as u32 + 1) + last;
        self.ex = (logical % EXTENTS_PER_MODULE) as u8;
        self.s2 = (logical / EXTENTS_PER_MODULE) as u8;
        self.rc = (records - last * RECORDS_PER_EXTENT) as u8;
    }
}

/// Convert a packed 8+3 name to the lowercase host form.
///
/// ```
/// use cpmfs_core::dirent::decode_name;
/// assert_eq!(decode_name(b"HELLO   TXT"), "hello.txt");
/// assert_eq!(decode_name(b"NOEXT      "), "noext");
/// ```
pub fn decode_name(packed: &PackedName) -> String {
    fn part(bytes: &[u8]) -> String {
        let s: String = bytes
            .iter()
            .map(|&b| (b & 0x7F).to_ascii_lowercase() as char)
            .collect();
        s.trim_end_matches(' ').to_string()
    }

    let name = part(&packed[..8]);
    let typ = part(&packed[8..]);
    if typ.is_empty() {
        name
    } else {
        format!("{}.{}", name, typ)
    }
}

/// Convert a host file name to the packed 8+3 form.
///
/// Fails for names that do not fit 8.3 or contain bytes CP/M cannot store.
///
/// ```
/// use cpmfs_core::dirent::encode_name;
/// assert_eq!(&encode_name("hello.txt").unwrap(), b"HELLO   TXT");
/// assert!(encode_name("verylongname.txt").is_err());
/// ```
pub fn encode_name(name: &str) -> CpmResult<PackedName> {
    let invalid = || CpmError::InvalidFileName(name.to_string());

    let (base, typ) = match name.split_once('.') {
        Some((base, typ)) => (base, typ),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || typ.len() > 3 {
        return Err(invalid());
    }

    let legal = |b: u8| b.is_ascii_graphic() && b != b'.';
    let mut packed = [b' '; 11];
    for (slot, b) in packed[..8].iter_mut().zip(base.bytes()) {
        if !legal(b) {
            return Err(invalid());
        }
        *slot = b.to_ascii_uppercase();
    }
    for (slot, b) in packed[8..].iter_mut().zip(typ.bytes()) {
        if !legal(b) {
            return Err(invalid());
        }
        *slot = b.to_ascii_uppercase();
    }
    Ok(packed)
}

/// Compare a packed name against a search pattern; `?` matches any byte.
pub fn matches_pattern(pattern: &PackedName, candidate: &PackedName) -> bool {
    pattern
        .iter()
        .zip(candidate.iter())
        .all(|(&p, &c)| p == b'?' || p == c)
}
