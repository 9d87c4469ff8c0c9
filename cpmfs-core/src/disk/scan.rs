//! Block ownership map, rebuilt from the directory on every scan.

use std::fmt;

use log::warn;
use thiserror::Error;

use crate::dirent::DirEntry;
use crate::dpb::DiskParams;

/// Owner of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOwner {
    Free,
    /// Part of the directory region.
    Directory,
    /// Claimed by a write that has not yet produced its directory entry.
    Pending,
    /// Referenced by the directory entry with this index.
    Entry(u16),
}

impl fmt::Display for BlockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(other) => write!(f, "by entry {}", other),
            Self::Directory => write!(f, "inside the directory"),
            Self::Pending => write!(f, "by an unfinished write"),
            Self::Free => write!(f, "while free"),
        }
    }
}

/// Integrity problem found while scanning. The scan continues past each one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Entry {entry}: Found block number ({block}) exceeding device size")]
    BlockOutOfRange { entry: u16, block: u16 },

    #[error("Entry {entry}: Found doubly allocated block number ({block}) {owner}")]
    DoubleAllocation { entry: u16, block: u16, owner: BlockOwner },
}

/// Runtime table of block owners, one slot per block.
#[derive(Debug, Clone)]
pub struct AllocationMap {
    owners: Vec<BlockOwner>,
}

impl AllocationMap {
    /// All blocks free except the directory region.
    pub fn new(dpb: &DiskParams) -> Self {
        let mut owners = vec![BlockOwner::Free; dpb.block_count()];
        for owner in owners.iter_mut().take(dpb.directory_blocks()) {
            *owner = BlockOwner::Directory;
        }
        Self { owners }
    }

    /// Build the map from the directory entries, in directory order.
    pub fn build(dpb: &DiskParams, entries: &[DirEntry]) -> ScanReport {
        let mut map = Self::new(dpb);
        let mut violations = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            if !entry.is_file() {
                continue;
            }
            let index = index as u16;
            for block in entry.blocks(dpb) {
                let violation = match map.owners.get(block as usize) {
                    None => Violation::BlockOutOfRange {
                        entry: index,
                        block,
                    },
                    Some(BlockOwner::Free) => {
                        map.owners[block as usize] = BlockOwner::Entry(index);
                        continue;
                    }
                    Some(&owner) => Violation::DoubleAllocation {
                        entry: index,
                        block,
                        owner,
                    },
                };
                warn!("{}", violation);
                violations.push(violation);
            }
        }

        ScanReport { map, violations }
    }

    pub fn owner(&self, block: u16) -> Option<BlockOwner> {
        self.owners.get(block as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of free blocks.
    pub fn amount_free(&self) -> usize {
        self.owners
            .iter()
            .filter(|&&o| o == BlockOwner::Free)
            .count()
    }

    /// First free block, marked as pending. `None` when the disk is full.
    pub fn alloc_block(&mut self) -> Option<u16> {
        let block = self.owners.iter().position(|&o| o == BlockOwner::Free)?;
        self.owners[block] = BlockOwner::Pending;
        Some(block as u16)
    }

    /// Record the final owner of a block.
    pub fn assign(&mut self, block: u16, entry: u16) {
        self.owners[block as usize] = BlockOwner::Entry(entry);
    }
}

/// Result of a full directory scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub map: AllocationMap,
    pub violations: Vec<Violation>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}
