//! BDOS (Basic Disk Operating System) file verbs backed by host files.
//!
//! This module handles the CP/M 2.2 system calls that work on files. The
//! caller (a processor emulator) supplies guest memory and registers through
//! [`BdosMachine`]; every other piece of state lives in [`FileEngine`].

pub mod engine;
pub mod fcb;
pub mod hook;
pub mod registry;
pub mod search;

pub use engine::{EngineConfig, FileEngine};
pub use fcb::Fcb;
pub use hook::{BdosMachine, FlatMachine};
pub use registry::HostFileRegistry;
pub use search::HostCandidates;

/// CP/M 2.2 BDOS function numbers handled by the file engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum BdosFunction {
    /// 15: Open file
    OpenFile = 15,
    /// 16: Close file
    CloseFile = 16,
    /// 17: Search for first
    SearchFirst = 17,
    /// 18: Search for next
    SearchNext = 18,
    /// 19: Delete file
    DeleteFile = 19,
    /// 20: Read sequential
    ReadSequential = 20,
    /// 21: Write sequential
    WriteSequential = 21,
    /// 22: Make file (create)
    MakeFile = 22,
    /// 23: Rename file
    RenameFile = 23,
    /// 33: Read random
    ReadRandom = 33,
    /// 34: Write random
    WriteRandom = 34,
    /// 35: Compute file size
    ComputeFileSize = 35,
    /// 36: Set random record
    SetRandomRecord = 36,
}

impl TryFrom<u8> for BdosFunction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            15 => Ok(Self::OpenFile),
            16 => Ok(Self::CloseFile),
            17 => Ok(Self::SearchFirst),
            18 => Ok(Self::SearchNext),
            19 => Ok(Self::DeleteFile),
            20 => Ok(Self::ReadSequential),
            21 => Ok(Self::WriteSequential),
            22 => Ok(Self::MakeFile),
            23 => Ok(Self::RenameFile),
            33 => Ok(Self::ReadRandom),
            34 => Ok(Self::WriteRandom),
            35 => Ok(Self::ComputeFileSize),
            36 => Ok(Self::SetRandomRecord),
            _ => Err(value),
        }
    }
}

impl BdosFunction {
    /// Status reported when the verb fails without a more specific code.
    pub fn failure_status(self) -> u8 {
        match self {
            Self::ReadSequential | Self::ReadRandom => status::EOF,
            _ => status::ERROR,
        }
    }
}

/// Status bytes returned to the guest in register A (and L).
pub mod status {
    pub const OK: u8 = 0x00;
    /// End of file on read.
    pub const EOF: u8 = 0x01;
    /// Sequential position beyond the last module.
    pub const OUT_OF_SPACE: u8 = 0xFE;
    /// Not found, no more entries, or a failed write.
    pub const ERROR: u8 = 0xFF;
}

/// Memory addresses used by CP/M programs.
pub mod addr {
    /// Default DMA buffer
    pub const DEFAULT_DMA: u16 = 0x0080;
    /// File Control Block 1
    pub const FCB1: u16 = 0x005C;
    /// File Control Block 2
    pub const FCB2: u16 = 0x006C;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_codes() {
        assert_eq!(BdosFunction::try_from(15), Ok(BdosFunction::OpenFile));
        assert_eq!(BdosFunction::try_from(36), Ok(BdosFunction::SetRandomRecord));
        assert_eq!(BdosFunction::OpenFile as u8, 15);
        // Console and disk-system calls belong to the emulator.
        assert_eq!(BdosFunction::try_from(2), Err(2));
        assert_eq!(BdosFunction::try_from(26), Err(26));
        assert_eq!(BdosFunction::try_from(40), Err(40));
    }

    #[test]
    fn test_failure_status() {
        assert_eq!(BdosFunction::ReadSequential.failure_status(), status::EOF);
        assert_eq!(BdosFunction::ReadRandom.failure_status(), status::EOF);
        assert_eq!(BdosFunction::WriteSequential.failure_status(), status::ERROR);
        assert_eq!(BdosFunction::OpenFile.failure_status(), status::ERROR);
    }
}
