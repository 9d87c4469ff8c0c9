//! Error types for the CP/M file model.

use thiserror::Error;

/// Errors raised by the live file engine and the disk-image engine.
///
/// Most failures of a BDOS verb never reach this type: they are reported to the
/// guest as a status byte. Only the two registry conditions (`BindingTableFull`
/// and `UnboundFcb`) escape a verb, and they are fatal for the guest program.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid CP/M file name: {0}")]
    InvalidFileName(String),

    #[error("FCB or transfer buffer at {0:#06X} lies outside guest memory")]
    InvalidFcb(u16),

    #[error("Out of host file slots ({0} in use)")]
    BindingTableFull(usize),

    #[error("No host file bound to FCB at {address:#06X} (function {function}, name {name:?})")]
    UnboundFcb {
        address: u16,
        function: u8,
        name: String,
    },

    #[error("Disk full")]
    DiskFull,

    #[error("Directory full")]
    DirectoryFull,

    #[error("Corrupt file {name}: {reason}")]
    CorruptFile { name: String, reason: String },

    #[error("Invalid disk parameters: {0}")]
    InvalidParams(String),

    #[error("Unknown disk type: {0}")]
    UnknownDiskType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CpmError {
    /// Resource exhaustion and host/guest desynchronization. The guest cannot
    /// recover from either, so callers should stop running it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BindingTableFull(_) | Self::UnboundFcb { .. })
    }
}

/// Result type for CP/M operations.
pub type CpmResult<T> = Result<T, CpmError>;
