//! Sector access to a raw disk image, with reserved tracks and skew applied.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::dpb::DiskParams;
use crate::geometry::RECORD_SIZE;

/// One 128-byte sector.
pub type Sector = [u8; RECORD_SIZE];

/// A disk image addressed by logical sector number.
///
/// Logical sector 0 is the first sector of the data region, i.e. the first
/// directory sector. Transfers are never retried; I/O errors go to the caller.
pub struct DiskImage<S> {
    inner: S,
    dpb: DiskParams,
}

impl<S: Read + Write + Seek> DiskImage<S> {
    pub fn new(inner: S, dpb: DiskParams) -> Self {
        Self { inner, dpb }
    }

    pub fn params(&self) -> &DiskParams {
        &self.dpb
    }

    /// Give back the underlying storage.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Read logical sector `sector`.
    pub fn read_sector(&mut self, sector: u32) -> std::io::Result<Sector> {
        let mut buf = [0u8; RECORD_SIZE];
        self.inner
            .seek(SeekFrom::Start(self.dpb.physical_offset(sector)))?;
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write logical sector `sector`.
    pub fn write_sector(&mut self, sector: u32, buf: &Sector) -> std::io::Result<()> {
        self.inner
            .seek(SeekFrom::Start(self.dpb.physical_offset(sector)))?;
        self.inner.write_all(buf)
    }

    /// Fill `tracks` whole tracks (reserved tracks included) with `fill`.
    pub fn blank(&mut self, tracks: u32, fill: u8) -> std::io::Result<()> {
        let track = vec![fill; self.dpb.spt as usize * RECORD_SIZE];
        self.inner.seek(SeekFrom::Start(0))?;
        for _ in 0..tracks {
            self.inner.write_all(&track)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
