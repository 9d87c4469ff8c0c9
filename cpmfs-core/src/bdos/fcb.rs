//! File Control Block (FCB) implementation.
//!
//! The FCB is CP/M's file descriptor structure, stored in the program's
//! memory space and passed to BDOS functions.
//!
//! Layout (36 bytes):
//! - Byte 0: Drive (0=default, 1=A:, 2=B:, ...)
//! - Bytes 1-8: Filename (space-padded)
//! - Bytes 9-11: Extension (space-padded, high bits are attributes)
//! - Byte 12: Current extent (EX)
//! - Byte 13: S1, cleared on open
//! - Byte 14: S2, module number; bit 7 marks a file written since open
//! - Byte 15: Record count (RC) of the current extent
//! - Bytes 16-31: Allocation map; rename puts the new name here
//! - Byte 32: Current record (CR)
//! - Bytes 33-35: Random record number (R0, R1, R2)

use crate::dirent::{decode_name, encode_name, PackedName};
use crate::error::{CpmError, CpmResult};
use crate::geometry::ExtentCoords;

/// Size of an FCB in bytes.
pub const FCB_SIZE: usize = 36;

/// Open marker in `S2`.
const S2_OPEN: u8 = 0x80;

/// Bits of `S2` that hold the module number.
const S2_MODULE_MASK: u8 = 0x3F;

/// File Control Block - view into CP/M memory for file operations.
pub struct Fcb<'a> {
    mem: &'a mut [u8],
}

impl<'a> Fcb<'a> {
    /// Create FCB from memory slice (must be at least 36 bytes).
    pub fn new(memory: &'a mut [u8]) -> Self {
        debug_assert!(memory.len() >= FCB_SIZE);
        Self { mem: memory }
    }

    /// Drive number: 0 = current, 1 = A:, 2 = B:, etc.
    pub fn drive(&self) -> u8 {
        self.mem[0]
    }

    /// Set drive number.
    pub fn set_drive(&mut self, drive: u8) {
        self.mem[0] = drive;
    }

    /// Name and type without attribute bits.
    pub fn packed_name(&self) -> PackedName {
        packed_at(&self.mem[1..12])
    }

    /// Second name used by rename (bytes 17-27).
    pub fn rename_target(&self) -> PackedName {
        packed_at(&self.mem[17..28])
    }

    /// Lowercase host file name.
    pub fn host_name(&self) -> String {
        decode_name(&self.packed_name())
    }

    /// Set name and type from a packed name.
    pub fn set_packed_name(&mut self, packed: &PackedName) {
        self.mem[1..12].copy_from_slice(packed);
    }

    /// Current extent number (EX).
    pub fn ex(&self) -> u8 {
        self.mem[0x0C]
    }

    /// Set current extent.
    pub fn set_ex(&mut self, v: u8) {
        self.mem[0x0C] = v;
    }

    /// S1 byte (reserved).
    pub fn s1(&self) -> u8 {
        self.mem[0x0D]
    }

    /// Set S1.
    pub fn set_s1(&mut self, v: u8) {
        self.mem[0x0D] = v;
    }

    /// Raw S2 byte, open marker included.
    pub fn s2(&self) -> u8 {
        self.mem[0x0E]
    }

    /// Set raw S2.
    pub fn set_s2(&mut self, v: u8) {
        self.mem[0x0E] = v;
    }

    /// Record count (RC) - records in current extent.
    pub fn rc(&self) -> u8 {
        self.mem[0x0F]
    }

    /// Set record count.
    pub fn set_rc(&mut self, v: u8) {
        self.mem[0x0F] = v;
    }

    /// Current record within extent (CR).
    pub fn cr(&self) -> u8 {
        self.mem[0x20]
    }

    /// Set current record.
    pub fn set_cr(&mut self, v: u8) {
        self.mem[0x20] = v;
    }

    /// True if bit 7 of S2 is set.
    pub fn is_open(&self) -> bool {
        self.s2() & S2_OPEN != 0
    }

    /// Clear the open marker, keeping the module number.
    pub fn clear_open(&mut self) {
        self.set_s2(self.s2() & !S2_OPEN);
    }

    /// Sequential position, module number masked out of S2.
    pub fn coords(&self) -> ExtentCoords {
        ExtentCoords::new(self.ex(), self.s2() & S2_MODULE_MASK, self.cr())
    }

    /// Store a sequential position, packing the open marker into S2.
    pub fn set_coords(&mut self, coords: ExtentCoords, open: bool) {
        self.set_ex(coords.ex);
        self.set_cr(coords.cr);
        self.set_s2(if open { coords.s2 | S2_OPEN } else { coords.s2 });
    }

    /// Random record number (24-bit, from R0, R1, R2).
    pub fn random_record(&self) -> u32 {
        (self.mem[0x21] as u32) | ((self.mem[0x22] as u32) << 8) | ((self.mem[0x23] as u32) << 16)
    }

    /// Set random record number.
    pub fn set_random_record(&mut self, n: u32) {
        self.mem[0x21] = (n & 0xFF) as u8;
        self.mem[0x22] = ((n >> 8) & 0xFF) as u8;
        self.mem[0x23] = ((n >> 16) & 0xFF) as u8;
    }

    /// Blank out this FCB (set to spaces).
    pub fn blank(&mut self) {
        self.mem[0] = 0;
        for byte in &mut self.mem[1..12] {
            *byte = b' ';
        }
        for byte in &mut self.mem[12..FCB_SIZE] {
            *byte = 0;
        }
    }

    /// Parse a filename string into an FCB.
    /// Handles formats like "A:FILE.TXT", "FILE.TXT", "FILE"
    pub fn parse_filename(&mut self, filename: &str) -> CpmResult<()> {
        self.blank();

        let mut name = filename;
        if let [drive, b':', ..] = filename.as_bytes() {
            if !drive.is_ascii_alphabetic() {
                return Err(CpmError::InvalidFileName(filename.to_string()));
            }
            self.set_drive(drive.to_ascii_uppercase() - b'A' + 1);
            name = &filename[2..];
        }

        self.set_packed_name(&encode_name(name)?);
        Ok(())
    }
}

fn packed_at(bytes: &[u8]) -> PackedName {
    let mut packed = [b' '; 11];
    for (slot, &b) in packed.iter_mut().zip(bytes) {
        *slot = b & 0x7F;
    }
    packed
}
