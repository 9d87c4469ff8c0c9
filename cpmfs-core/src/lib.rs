//! CP/M 2.2 filesystem core
//!
//! This crate provides two views of the CP/M 2.2 file model that agree on
//! extent arithmetic, record counts and directory layout:
//! - BDOS file verbs for a running guest program, backed by host files
//! - Direct reading and writing of CP/M disk images
//!
//! # Architecture
//!
//! - `geometry`: extent/record arithmetic shared by both views
//! - `dpb`: disk parameter blocks and sector skew
//! - `dirent`: 32-byte directory entries and 8.3 name conversion
//! - `disk`: sector I/O, allocation map, and file operations on an image
//! - `bdos`: FCB view, host file registry, and the `FileEngine` verbs

pub mod bdos;
pub mod dirent;
pub mod disk;
pub mod dpb;
pub mod error;
pub mod geometry;

pub use bdos::{BdosFunction, BdosMachine, EngineConfig, Fcb, FileEngine, FlatMachine};
pub use dirent::{decode_name, encode_name, matches_pattern, DirEntry, PackedName};
pub use disk::{CpmDisk, FileInfo, ScanReport, Violation};
pub use dpb::DiskParams;
pub use error::{CpmError, CpmResult};
pub use geometry::{coords_to_offset, offset_to_coords, ExtentCoords};
