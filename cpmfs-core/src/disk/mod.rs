//! Direct access to CP/M disk images.
//!
//! The directory is the only metadata on a CP/M disk: there is no free
//! list, so every write starts with a full directory scan to rebuild the
//! block allocation map.
//!
//! - `DiskImage`: logical sector I/O (skew and reserved tracks)
//! - `AllocationMap`: block ownership built by a scan
//! - `CpmDisk`: file level operations (list, read, write, delete)

mod alloc;
mod image;
mod scan;

use std::io::{Read, Seek, Write};

use log::{debug, info, warn};

pub use alloc::{alloc_directory_entries, chain_entries, WriteLayout};
pub use image::{DiskImage, Sector};
pub use scan::{AllocationMap, BlockOwner, ScanReport, Violation};

use crate::dirent::{decode_name, encode_name, DirEntry, PackedName, FREE_ENTRY};
use crate::dpb::{DiskParams, ENTRIES_PER_SECTOR, ENTRY_SIZE};
use crate::error::{CpmError, CpmResult};
use crate::geometry::{EOF_FILL, RECORD_SIZE};

/// Summary of one file for directory listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Lowercase host-style name.
    pub name: String,
    pub user: u8,
    pub read_only: bool,
    pub system: bool,
    /// 128-byte records actually reachable through the allocation lists.
    pub records: u32,
}

impl FileInfo {
    pub fn size(&self) -> u64 {
        self.records as u64 * RECORD_SIZE as u64
    }

    pub fn is_com(&self) -> bool {
        self.name.ends_with(".com")
    }
}

/// A CP/M filesystem inside a disk image.
pub struct CpmDisk<S> {
    image: DiskImage<S>,
}

impl<S: Read + Write + Seek> CpmDisk<S> {
    /// Open an existing image.
    pub fn open(inner: S, dpb: DiskParams) -> Self {
        Self {
            image: DiskImage::new(inner, dpb),
        }
    }

    /// Write an empty filesystem: `tracks` whole tracks filled with 0xE5.
    /// `None` uses the smallest track count holding every block.
    pub fn format(inner: S, dpb: DiskParams, tracks: Option<u32>) -> CpmResult<Self> {
        let tracks = tracks.unwrap_or_else(|| dpb.min_tracks());
        if tracks < dpb.min_tracks() {
            return Err(CpmError::InvalidParams(format!(
                "{} tracks cannot hold {} blocks ({} tracks needed)",
                tracks,
                dpb.block_count(),
                dpb.min_tracks()
            )));
        }
        let mut image = DiskImage::new(inner, dpb);
        image.blank(tracks, FREE_ENTRY)?;
        image.flush()?;
        info!("formatted {} tracks", tracks);
        Ok(Self { image })
    }

    pub fn params(&self) -> &DiskParams {
        self.image.params()
    }

    pub fn into_inner(self) -> S {
        self.image.into_inner()
    }

    /// Every directory slot, in directory order.
    pub fn entries(&mut self) -> CpmResult<Vec<DirEntry>> {
        let sectors = self.params().directory_sectors();
        let mut entries = Vec::with_capacity(sectors as usize * ENTRIES_PER_SECTOR);
        for sector in 0..sectors {
            let buf = self.image.read_sector(sector)?;
            entries.extend(buf.chunks_exact(ENTRY_SIZE).map(DirEntry::from_bytes));
        }
        Ok(entries)
    }

    /// Overwrite directory slot `index`.
    pub fn write_entry(&mut self, index: u16, entry: &DirEntry) -> CpmResult<()> {
        let sector = index as u32 / ENTRIES_PER_SECTOR as u32;
        let pos = (index as usize % ENTRIES_PER_SECTOR) * ENTRY_SIZE;
        let mut buf = self.image.read_sector(sector)?;
        buf[pos..pos + ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.image.write_sector(sector, &buf)?;
        Ok(())
    }

    /// Full scan: allocation map plus integrity violations.
    pub fn scan(&mut self) -> CpmResult<ScanReport> {
        let entries = self.entries()?;
        Ok(AllocationMap::build(self.params(), &entries))
    }

    /// Free blocks on the disk.
    pub fn amount_free(&mut self) -> CpmResult<usize> {
        Ok(self.scan()?.map.amount_free())
    }

    /// Entry holding extent `extent` of the named file.
    pub fn find_extent(&mut self, name: &str, extent: u32) -> CpmResult<Option<(u16, DirEntry)>> {
        let packed = encode_name(name)?;
        let dpb = self.params().clone();
        Ok(self
            .entries()?
            .into_iter()
            .enumerate()
            .find(|(_, e)| {
                e.is_file() && e.packed_name() == packed && e.extent_number(&dpb) == extent
            })
            .map(|(i, e)| (i as u16, e)))
    }

    /// Read a whole file, following its chain of entries by extent number.
    ///
    /// The result is a whole number of records; CP/M does not store the byte
    /// length, so the tail of the last record is whatever was written there.
    pub fn read_file(&mut self, name: &str) -> CpmResult<Vec<u8>> {
        let packed = encode_name(name)?;
        let entries = self.entries()?;
        let sectors = file_sectors(self.params(), &entries, &packed)?;
        let mut data = Vec::with_capacity(sectors.len() * RECORD_SIZE);
        for sector in sectors {
            data.extend_from_slice(&self.image.read_sector(sector)?);
        }
        Ok(data)
    }

    /// Number of records reachable through the file's allocation lists.
    pub fn file_records(&mut self, name: &str) -> CpmResult<u32> {
        let packed = encode_name(name)?;
        let entries = self.entries()?;
        Ok(file_sectors(self.params(), &entries, &packed)?.len() as u32)
    }

    /// Files on the disk, sorted by name. System files only with `all`.
    ///
    /// Chains are followed by the raw name bytes of each first extent, so an
    /// entry whose name does not survive re-encoding is still listed.
    pub fn list(&mut self, all: bool) -> CpmResult<Vec<FileInfo>> {
        let dpb = self.params().clone();
        let entries = self.entries()?;

        let mut files = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| e.is_file() && e.extent_number(&dpb) == 0)
            .filter(|e| all || !e.is_system())
        {
            let name = entry.file_name();
            let records = match file_sectors(&dpb, &entries, &entry.packed_name()) {
                Ok(sectors) => sectors.len() as u32,
                Err(CpmError::CorruptFile { reason, .. }) => {
                    warn!("{}: {}", name, reason);
                    0
                }
                Err(e) => return Err(e),
            };
            files.push(FileInfo {
                name,
                user: entry.user,
                read_only: entry.is_read_only(),
                system: entry.is_system(),
                records,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Free every entry of the named file. Returns false if there were none.
    pub fn delete(&mut self, name: &str) -> CpmResult<bool> {
        let packed = encode_name(name)?;
        let mut found = false;
        for (index, mut entry) in self.entries()?.into_iter().enumerate() {
            if entry.is_file() && entry.packed_name() == packed {
                entry.user = FREE_ENTRY;
                self.write_entry(index as u16, &entry)?;
                found = true;
            }
        }
        if found {
            self.image.flush()?;
        }
        Ok(found)
    }

    /// Store a file, replacing any file of the same name.
    ///
    /// Blocks and directory slots are all claimed before any data is written,
    /// so a full disk leaves the image as it was (minus the replaced file).
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> CpmResult<()> {
        let packed = encode_name(name)?;
        self.delete(name)?;

        let dpb = self.params().clone();
        let entries = self.entries()?;
        let mut map = AllocationMap::build(&dpb, &entries).map;
        let layout = WriteLayout::for_len(&dpb, data.len());
        debug!(
            "{}: {} sectors, {} blocks, {} entries",
            name, layout.sectors, layout.blocks, layout.entries
        );

        let slots = alloc_directory_entries(&entries, layout.entries).ok_or(CpmError::DirectoryFull)?;
        let blocks = (0..layout.blocks)
            .map(|_| map.alloc_block())
            .collect::<Option<Vec<u16>>>()
            .ok_or(CpmError::DiskFull)?;

        self.write_data(&blocks, data)?;

        let chain = chain_entries(&dpb, 0, &packed, &blocks, layout.sectors);
        for (&slot, entry) in slots.iter().zip(&chain) {
            for block in entry.blocks(&dpb) {
                map.assign(block, slot);
            }
            self.write_entry(slot, entry)?;
        }
        debug!("{}: {} blocks left", name, map.amount_free());
        self.image.flush()?;
        Ok(())
    }

    /// Stream `data` into `blocks`, padding the last record with EOF fill.
    fn write_data(&mut self, blocks: &[u16], data: &[u8]) -> CpmResult<()> {
        let dpb = self.params().clone();
        let mut records = data.chunks(RECORD_SIZE);
        for &block in blocks {
            for offset in 0..dpb.sectors_per_block() {
                let Some(chunk) = records.next() else {
                    return Ok(());
                };
                let mut buf: Sector = [EOF_FILL; RECORD_SIZE];
                buf[..chunk.len()].copy_from_slice(chunk);
                self.image
                    .write_sector(dpb.block_sector(block) + offset, &buf)?;
            }
        }
        Ok(())
    }
}

/// Logical sectors of a file in order, chained by extent number.
fn file_sectors(dpb: &DiskParams, entries: &[DirEntry], packed: &PackedName) -> CpmResult<Vec<u32>> {
    let find = |extent: u32| {
        entries.iter().find(|e| {
            e.is_file() && &e.packed_name() == packed && e.extent_number(dpb) == extent
        })
    };

    let mut entry = find(0).ok_or_else(|| CpmError::FileNotFound(decode_name(packed)))?;
    let mut extent = 0;
    let mut sectors = Vec::new();
    loop {
        let count = entry.record_count(dpb).min(dpb.records_per_entry());
        for record in 0..count {
            let block = entry.block(dpb, dpb.block_of(record) as usize);
            if block == 0 {
                return Err(CpmError::CorruptFile {
                    name: decode_name(packed),
                    reason: format!(
                        "allocation list of extent {} ends before record count {}",
                        extent, count
                    ),
                });
            }
            sectors.push(dpb.block_sector(block) + dpb.record_in_block(record));
        }

        if !entry.is_full(dpb) {
            return Ok(sectors);
        }
        extent += 1;
        // A missing successor is normal when the file exactly fills its last entry.
        match find(extent) {
            Some(next) => entry = next,
            None => return Ok(sectors),
        }
    }
}
