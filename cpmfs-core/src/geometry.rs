//! Extent and record arithmetic shared by the live engine and the disk engine.
//!
//! A CP/M file position is addressed as (extent, record) where an extent is
//! 16K and a record is 128 bytes. The extent number is split over two FCB
//! bytes: `EX` holds the low 5 bits and `S2` (the "module") the rest.
//!
//! ```
//! use cpmfs_core::geometry::{coords_to_offset, offset_to_coords};
//! let c = offset_to_coords(16384 * 33 + 128 * 5);
//! assert_eq!((c.ex, c.s2, c.cr), (1, 1, 5));
//! assert_eq!(coords_to_offset(c.ex, c.s2, c.cr), 16384 * 33 + 128 * 5);
//! ```

/// Record size in CP/M (always 128 bytes).
pub const RECORD_SIZE: usize = 128;

/// Records in one logical extent.
pub const RECORDS_PER_EXTENT: u32 = 128;

/// Bytes in one logical extent.
pub const EXTENT_SIZE: u64 = 16384;

/// Extents addressed by `EX` before rolling into `S2`.
pub const EXTENTS_PER_MODULE: u32 = 32;

/// Fill byte for the unused tail of a short last record.
pub const EOF_FILL: u8 = 0x1A;

/// Sequential position of an FCB, with the open marker already stripped from `s2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtentCoords {
    /// Low part of the extent number (0-31).
    pub ex: u8,
    /// High part of the extent number (module).
    pub s2: u8,
    /// Record within the extent (0-127).
    pub cr: u8,
}

impl ExtentCoords {
    pub fn new(ex: u8, s2: u8, cr: u8) -> Self {
        Self { ex, s2, cr }
    }

    /// Coordinates of the record containing `offset`.
    pub fn from_offset(offset: u64) -> Self {
        let extent = offset / EXTENT_SIZE;
        Self {
            ex: (extent % EXTENTS_PER_MODULE as u64) as u8,
            s2: (extent / EXTENTS_PER_MODULE as u64) as u8,
            cr: ((offset % EXTENT_SIZE) / RECORD_SIZE as u64) as u8,
        }
    }

    /// Coordinates of an absolute record number.
    pub fn from_record(record: u32) -> Self {
        Self::from_offset(record as u64 * RECORD_SIZE as u64)
    }

    /// Full extent number (`EX + 32 * S2`).
    pub fn extent(&self) -> u32 {
        self.ex as u32 + EXTENTS_PER_MODULE * self.s2 as u32
    }

    /// Absolute record number.
    pub fn record(&self) -> u32 {
        self.extent() * RECORDS_PER_EXTENT + self.cr as u32
    }

    /// Byte offset of the addressed record.
    pub fn offset(&self) -> u64 {
        EXTENT_SIZE * self.extent() as u64 + RECORD_SIZE as u64 * self.cr as u64
    }

    /// Position after one more record: CR rolls into EX at 128, EX into S2 at 32.
    /// `s2` is allowed to run past the module limit; callers check it.
    pub fn advance(self) -> Self {
        let mut next = self;
        next.cr += 1;
        if next.cr as u32 >= RECORDS_PER_EXTENT {
            next.cr = 0;
            next.ex += 1;
        }
        if next.ex as u32 >= EXTENTS_PER_MODULE {
            next.ex = 0;
            next.s2 = next.s2.wrapping_add(1);
        }
        next
    }
}

/// Split a byte offset into `(EX, S2, CR)`.
pub fn offset_to_coords(offset: u64) -> ExtentCoords {
    ExtentCoords::from_offset(offset)
}

/// Inverse of [`offset_to_coords`] for record-aligned offsets.
pub fn coords_to_offset(ex: u8, s2: u8, cr: u8) -> u64 {
    ExtentCoords::new(ex, s2, cr).offset()
}

/// Number of records needed to hold `len` bytes.
pub fn records_for_len(len: u64) -> u64 {
    len.div_ceil(RECORD_SIZE as u64)
}

/// Record count of `extent` for a file of `len` bytes: 128 if the extent is
/// wholly inside the file, 0 if it starts past the end, the remainder otherwise.
pub fn extent_record_count(len: u64, extent: u32) -> u8 {
    let records = records_for_len(len);
    let full = records - records % RECORDS_PER_EXTENT as u64;
    let start = extent as u64 * RECORDS_PER_EXTENT as u64;

    if start < full {
        RECORDS_PER_EXTENT as u8
    } else if start > full {
        0
    } else {
        (records - full) as u8
    }
}
