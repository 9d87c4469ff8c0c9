//! Space planning for new files: blocks, directory slots and chained entries.

use crate::dirent::{DirEntry, PackedName};
use crate::dpb::DiskParams;
use crate::geometry::RECORD_SIZE;

/// How much space a file of a given length needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLayout {
    /// 128-byte sectors of data.
    pub sectors: u32,
    /// Blocks to allocate.
    pub blocks: usize,
    /// Directory entries to allocate (at least one, even for an empty file).
    pub entries: usize,
}

impl WriteLayout {
    pub fn for_len(dpb: &DiskParams, len: usize) -> Self {
        let sectors = len.div_ceil(RECORD_SIZE) as u32;
        let blocks = sectors.div_ceil(dpb.sectors_per_block()) as usize;
        let entries = (blocks * dpb.sectors_per_block() as usize)
            .div_ceil(dpb.records_per_entry() as usize)
            .max(1);
        Self {
            sectors,
            blocks,
            entries,
        }
    }
}

/// First-fit search for `n` free directory slots.
pub fn alloc_directory_entries(entries: &[DirEntry], n: usize) -> Option<Vec<u16>> {
    let free: Vec<u16> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_free())
        .map(|(i, _)| i as u16)
        .take(n)
        .collect();
    (free.len() == n).then_some(free)
}

/// Directory entries describing a file of `sectors` records stored in `blocks`.
///
/// Every entry but the last is full; the last carries the remaining records.
pub fn chain_entries(
    dpb: &DiskParams,
    user: u8,
    name: &PackedName,
    blocks: &[u16],
    sectors: u32,
) -> Vec<DirEntry> {
    let per_entry = dpb.records_per_entry();
    let layout_entries = (sectors.div_ceil(per_entry) as usize).max(1);

    let mut groups = blocks.chunks(dpb.alloc_slots());
    let mut remaining = sectors;
    (0..layout_entries)
        .map(|index| {
            let records = remaining.min(per_entry);
            remaining -= records;

            let mut entry = DirEntry::free();
            entry.user = user;
            entry.s1 = 0;
            entry.set_packed_name(name);
            entry.set_blocks(dpb, groups.next().unwrap_or(&[]));
            entry.set_extent(dpb, index as u32, records);
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_empty_file() {
        let dpb = DiskParams::floppy_8in();
        let layout = WriteLayout::for_len(&dpb, 0);
        assert_eq!(
            layout,
            WriteLayout {
                sectors: 0,
                blocks: 0,
                entries: 1
            }
        );
    }

    #[test]
    fn test_layout_rounding() {
        let dpb = DiskParams::floppy_8in();
        assert_eq!(WriteLayout::for_len(&dpb, 1).blocks, 1);
        assert_eq!(WriteLayout::for_len(&dpb, 1024).blocks, 1);
        assert_eq!(WriteLayout::for_len(&dpb, 1025).blocks, 2);

        let full = WriteLayout::for_len(&dpb, 16384);
        assert_eq!((full.sectors, full.blocks, full.entries), (128, 16, 1));

        let more = WriteLayout::for_len(&dpb, 16385);
        assert_eq!((more.sectors, more.blocks, more.entries), (129, 17, 2));
    }

    #[test]
    fn test_layout_wide_blocks() {
        let dpb = DiskParams::hard_disk();
        // 8 blocks of 2K per entry.
        let layout = WriteLayout::for_len(&dpb, 40000);
        assert_eq!(layout.sectors, 313);
        assert_eq!(layout.blocks, 20);
        assert_eq!(layout.entries, 3);
    }

    #[test]
    fn test_alloc_directory_entries() {
        let mut entries = vec![DirEntry::free(); 6];
        entries[0].user = 0;
        entries[2].user = 0;
        assert_eq!(alloc_directory_entries(&entries, 2), Some(vec![1, 3]));
        assert_eq!(alloc_directory_entries(&entries, 4), Some(vec![1, 3, 4, 5]));
        assert_eq!(alloc_directory_entries(&entries, 5), None);
    }

    #[test]
    fn test_chain_entries() {
        let dpb = DiskParams::floppy_8in();
        let blocks: Vec<u16> = (2..22).collect(); // 20 blocks, 150 sectors
        let chain = chain_entries(&dpb, 0, b"BIG     DAT", &blocks, 150);
        assert_eq!(chain.len(), 2);

        assert_eq!((chain[0].ex, chain[0].s2, chain[0].rc), (0, 0, 128));
        assert_eq!(chain[0].blocks(&dpb), (2..18).collect::<Vec<u16>>());

        assert_eq!((chain[1].ex, chain[1].s2, chain[1].rc), (1, 0, 22));
        assert_eq!(chain[1].blocks(&dpb), vec![18, 19, 20, 21]);
        assert_eq!(chain[1].file_name(), "big.dat");
    }

    #[test]
    fn test_chain_empty_file() {
        let dpb = DiskParams::floppy_8in();
        let chain = chain_entries(&dpb, 0, b"EMPTY      ", &[], 0);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].rc, 0);
        assert!(chain[0].blocks(&dpb).is_empty());
        assert!(chain[0].is_file());
    }
}
