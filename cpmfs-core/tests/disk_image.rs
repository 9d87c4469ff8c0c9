//! Integration tests for disk images held in memory.

use std::io::Cursor;

use cpmfs_core::disk::BlockOwner;
use cpmfs_core::{CpmDisk, CpmError, DiskParams};

type MemDisk = CpmDisk<Cursor<Vec<u8>>>;

fn floppy() -> MemDisk {
    CpmDisk::format(Cursor::new(Vec::new()), DiskParams::floppy_8in(), None).unwrap()
}

fn hard_disk() -> MemDisk {
    CpmDisk::format(Cursor::new(Vec::new()), DiskParams::hard_disk(), None).unwrap()
}

/// Deterministic, non-repeating test data.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut expected = data.to_vec();
    expected.resize(data.len().div_ceil(128) * 128, 0x1A);
    expected
}

#[test]
fn test_round_trip_sizes() {
    for len in [0, 1, 127, 128, 129, 1024, 16383, 16384, 16385, 40_000, 70_000] {
        let mut disk = floppy();
        let data = pattern(len);
        disk.write_file("data.bin", &data).unwrap();
        assert_eq!(disk.read_file("data.bin").unwrap(), padded(&data), "length {}", len);
    }
}

#[test]
fn test_round_trip_wide_blocks() {
    let mut disk = hard_disk();
    for len in [0, 2048, 16384, 16385, 100_000] {
        let data = pattern(len);
        disk.write_file("wide.bin", &data).unwrap();
        assert_eq!(disk.read_file("wide.bin").unwrap(), padded(&data), "length {}", len);
    }
}

#[test]
fn test_multi_extent_chain() {
    let mut disk = floppy();
    disk.write_file("three.dat", &pattern(16384 * 2 + 300)).unwrap();

    let dpb = DiskParams::floppy_8in();
    let (_, first) = disk.find_extent("three.dat", 0).unwrap().unwrap();
    let (_, second) = disk.find_extent("three.dat", 1).unwrap().unwrap();
    let (_, last) = disk.find_extent("three.dat", 2).unwrap().unwrap();
    assert!(disk.find_extent("three.dat", 3).unwrap().is_none());

    assert_eq!(first.rc, 128);
    assert!(first.is_full(&dpb));
    assert_eq!(second.ex, 1);
    assert_eq!(last.ex, 2);
    assert_eq!(last.rc, 3);
    assert_eq!(last.blocks(&dpb).len(), 1);
}

#[test]
fn test_chain_followed_by_extent_not_position() {
    let mut disk = floppy();
    disk.write_file("first.txt", b"first").unwrap();
    disk.write_file("big.dat", &pattern(16384 + 1000)).unwrap();
    let expected = disk.read_file("big.dat").unwrap();

    // Swap the two entries of big.dat in the directory.
    let (i0, e0) = disk.find_extent("big.dat", 0).unwrap().unwrap();
    let (i1, e1) = disk.find_extent("big.dat", 1).unwrap().unwrap();
    disk.write_entry(i0, &e1).unwrap();
    disk.write_entry(i1, &e0).unwrap();

    assert_eq!(disk.read_file("big.dat").unwrap(), expected);
}

#[test]
fn test_scan_accounts_for_every_block() {
    let mut disk = floppy();
    let sizes = [100, 5000, 16384, 20_000, 1];
    for (i, len) in sizes.iter().enumerate() {
        disk.write_file(&format!("file{}.dat", i), &pattern(*len)).unwrap();
    }

    let dpb = DiskParams::floppy_8in();
    let report = disk.scan().unwrap();
    assert!(report.is_clean());

    let mut occupied = 0;
    let mut reserved = 0;
    for block in 0..=dpb.dsm {
        match report.map.owner(block) {
            Some(BlockOwner::Entry(_)) => occupied += 1,
            Some(BlockOwner::Directory) => reserved += 1,
            _ => {}
        }
    }
    // 1 + 5 + 16 + 20 + 1 blocks of 1K.
    assert_eq!(occupied, 43);
    assert_eq!(
        report.map.amount_free() + occupied + reserved,
        dpb.dsm as usize + 1
    );
}

#[test]
fn test_scan_reports_double_allocation() {
    let mut disk = floppy();
    disk.write_file("a.txt", &pattern(2048)).unwrap();
    disk.write_file("b.txt", &pattern(2048)).unwrap();

    let dpb = DiskParams::floppy_8in();
    let (_, a) = disk.find_extent("a.txt", 0).unwrap().unwrap();
    let (bi, mut b) = disk.find_extent("b.txt", 0).unwrap().unwrap();
    b.set_blocks(&dpb, &a.blocks(&dpb));
    disk.write_entry(bi, &b).unwrap();

    let report = disk.scan().unwrap();
    assert_eq!(report.violations.len(), 2);
    assert!(report.violations[0]
        .to_string()
        .contains("doubly allocated block number"));
}

#[test]
fn test_first_directory_sector_location() {
    let disk = floppy();
    let raw = disk.into_inner().into_inner();
    assert_eq!(raw.len(), 77 * 26 * 128);
    assert!(raw.iter().all(|&b| b == 0xE5));

    // A file's directory entry lands in the first data sector at byte 6656.
    let mut disk = CpmDisk::open(Cursor::new(raw), DiskParams::floppy_8in());
    disk.write_file("x.com", b"\xC9").unwrap();
    let raw = disk.into_inner().into_inner();
    assert_eq!(raw[6656], 0);
    assert_eq!(&raw[6657..6668], b"X       COM");
}

#[test]
fn test_mkfs_explicit_tracks() {
    let disk = CpmDisk::format(Cursor::new(Vec::new()), DiskParams::floppy_8in(), Some(80)).unwrap();
    assert_eq!(disk.into_inner().into_inner().len(), 80 * 26 * 128);
}

#[test]
fn test_disk_full_then_delete() {
    let mut disk = floppy();
    // 241 free 1K blocks: two 120K files fit, a third does not.
    disk.write_file("one.dat", &pattern(120 * 1024)).unwrap();
    disk.write_file("two.dat", &pattern(120 * 1024)).unwrap();
    assert!(matches!(
        disk.write_file("three.dat", &pattern(2048)),
        Err(CpmError::DiskFull)
    ));
    assert_eq!(disk.amount_free().unwrap(), 1);

    assert!(disk.delete("one.dat").unwrap());
    disk.write_file("three.dat", &pattern(2048)).unwrap();
    assert_eq!(disk.read_file("three.dat").unwrap(), pattern(2048));
    assert_eq!(disk.read_file("two.dat").unwrap(), pattern(120 * 1024));
}

#[test]
fn test_listing() {
    let mut disk = floppy();
    disk.write_file("zeta.txt", &pattern(300)).unwrap();
    disk.write_file("alpha.com", &pattern(20_000)).unwrap();

    let files = disk.list(false).unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["alpha.com", "zeta.txt"]);
    assert_eq!(files[0].records, 157);
    assert_eq!(files[0].size(), 157 * 128);
    assert!(files[0].is_com());
    assert_eq!(files[1].records, 3);
}

#[test]
fn test_invalid_name_rejected() {
    let mut disk = floppy();
    assert!(matches!(
        disk.write_file("much_too_long.name", b"x"),
        Err(CpmError::InvalidFileName(_))
    ));
}
