//! Host directory entries seen as CP/M directory candidates.

use std::fs::ReadDir;
use std::io;
use std::path::Path;

use log::debug;

use crate::dirent::{encode_name, PackedName};

/// Lazy, finite sequence of packed names for the files in a host directory.
///
/// Dot entries, names that are not UTF-8 and names that do not fit 8.3 are
/// skipped. Names come out in whatever order the host returns them.
pub struct HostCandidates {
    entries: ReadDir,
}

impl HostCandidates {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            entries: dir.read_dir()?,
        })
    }
}

impl Iterator for HostCandidates {
    type Item = PackedName;

    fn next(&mut self) -> Option<PackedName> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match encode_name(name) {
                Ok(packed) => return Some(packed),
                Err(_) => debug!("{} has no CP/M name", name),
            }
        }
    }
}

/// A directory search in progress: the pattern FCB and the remaining candidates.
pub struct ActiveSearch {
    /// Guest address of the FCB holding the pattern.
    pub pattern_address: u16,
    pub candidates: HostCandidates,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_candidates_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["hello.txt", "PIP.COM", ".hidden", "waytoolong.txt", "a.b.c", "noext"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let mut names: Vec<PackedName> = HostCandidates::open(dir.path()).unwrap().collect();
        names.sort();
        assert_eq!(
            names,
            vec![*b"HELLO   TXT", *b"NOEXT      ", *b"PIP     COM"]
        );
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostCandidates::open(&dir.path().join("nope")).is_err());
    }
}
