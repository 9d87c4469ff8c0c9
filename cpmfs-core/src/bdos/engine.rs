//! The file verbs, executed against host files.
//!
//! Each verb copies the FCB out of guest memory, works on the copy and writes
//! it back. Not-found and I/O failures become status bytes; only the registry
//! conditions (`BindingTableFull`, `UnboundFcb`) come back as errors.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};

use super::fcb::{Fcb, FCB_SIZE};
use super::hook::BdosMachine;
use super::registry::{HostFileRegistry, DEFAULT_CAPACITY};
use super::search::{ActiveSearch, HostCandidates};
use super::{status, BdosFunction};
use crate::dirent::{decode_name, matches_pattern, PackedName, FREE_ENTRY};
use crate::disk::Sector;
use crate::error::{CpmError, CpmResult};
use crate::geometry::{
    extent_record_count, records_for_len, ExtentCoords, EOF_FILL, EXTENTS_PER_MODULE,
    EXTENT_SIZE, RECORDS_PER_EXTENT, RECORD_SIZE,
};

/// Settings for the live file engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Host directory standing in for the CP/M drive.
    pub root: PathBuf,
    /// Fallback directory searched by open (not make).
    pub library_dir: Option<PathBuf>,
    /// Simultaneously open files.
    pub max_bindings: usize,
    /// Highest usable module (S2) for sequential access.
    pub max_module: u8,
    /// Sync file data to the host disk after every write.
    pub sync_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            library_dir: None,
            max_bindings: DEFAULT_CAPACITY,
            max_module: 15,
            sync_writes: true,
        }
    }
}

impl EngineConfig {
    /// Defaults, serving files from `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load from JSON; missing fields take their defaults.
    pub fn from_reader<R: Read>(reader: R) -> CpmResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadWrite,
    ReadOnly,
    Create,
}

impl Access {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::ReadWrite => options.read(true).write(true),
            Self::ReadOnly => options.read(true),
            Self::Create => options.read(true).write(true).create(true).truncate(true),
        };
        options
    }
}

/// Where set-random-record style verbs take their position from.
#[derive(Debug, Clone, Copy)]
enum SizeFrom {
    End,
    Position,
}

/// Executes BDOS file verbs for one guest program.
pub struct FileEngine {
    config: EngineConfig,
    registry: HostFileRegistry<File>,
    search: Option<ActiveSearch>,
}

impl FileEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: HostFileRegistry::new(config.max_bindings),
            config,
            search: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of host files currently open.
    pub fn open_files(&self) -> usize {
        self.registry.len()
    }

    /// Close every host file.
    pub fn close_all(&mut self) {
        self.registry.clear();
    }

    /// Forget the active directory search.
    pub fn reset_search(&mut self) {
        self.search = None;
    }

    /// Handle the BDOS call the machine is making.
    ///
    /// Returns `Ok(false)` for function numbers that are not file verbs, so
    /// the emulator can handle them itself.
    pub fn dispatch<M: BdosMachine>(&mut self, machine: &mut M) -> CpmResult<bool> {
        let code = machine.function();
        let Ok(function) = BdosFunction::try_from(code) else {
            return Ok(false);
        };
        let fcb = machine.fcb_address();
        let dma = machine.dma_address();

        let result = match self.call(function, machine.memory(), fcb, dma) {
            Ok(result) => result,
            Err(e) if e.is_fatal() => {
                error!("BDOS {}: {}", code, e);
                return Err(e);
            }
            Err(e) => {
                warn!("BDOS {}: {}", code, e);
                function.failure_status()
            }
        };
        machine.set_result(result as u16);
        Ok(true)
    }

    /// Run one verb on `mem` and return its status byte.
    pub fn call(
        &mut self,
        function: BdosFunction,
        mem: &mut [u8],
        fcb: u16,
        dma: u16,
    ) -> CpmResult<u8> {
        use BdosFunction::*;

        trace!(
            "BDOS {} {:?} FCB={:#06X} DMA={:#06X}",
            function as u8,
            function,
            fcb,
            dma
        );

        match function {
            OpenFile => self.open(mem, fcb, Access::ReadWrite),
            MakeFile => self.open(mem, fcb, Access::Create),
            CloseFile => self.close(mem, fcb),
            SearchFirst => self.search_first(mem, fcb, dma),
            SearchNext => self.search_next(mem, dma),
            DeleteFile => self.delete(mem, fcb),
            RenameFile => self.rename(mem, fcb),
            ReadSequential => self.read_sequential(mem, fcb, dma),
            WriteSequential => self.write_sequential(mem, fcb, dma),
            ReadRandom => self.read_random(mem, fcb, dma),
            WriteRandom => self.write_random(mem, fcb, dma),
            ComputeFileSize => self.file_size(mem, fcb, SizeFrom::End),
            SetRandomRecord => self.file_size(mem, fcb, SizeFrom::Position),
        }
    }

    /// BDOS 15 / 22: Open or make file.
    fn open(&mut self, mem: &mut [u8], address: u16, access: Access) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);
        let name = fcb.packed_name();

        let len = match self.registry.lookup(address, &name) {
            Some(file) => file.metadata()?.len(),
            None => {
                let Some(file) = self.open_host(&name, access) else {
                    debug!("{:?}: no host file", decode_name(&name));
                    return Ok(status::ERROR);
                };
                let len = file.metadata()?.len();
                self.registry.bind(address, name, file)?;
                len
            }
        };

        fcb.set_s1(0);
        fcb.set_s2(0);
        let extent = fcb.coords().extent();
        fcb.set_rc(extent_record_count(len, extent));
        store_fcb(mem, address, &buf);
        Ok(status::OK)
    }

    /// Try each host path in turn until one opens.
    fn open_host(&self, name: &PackedName, access: Access) -> Option<File> {
        self.open_attempts(name, access)
            .into_iter()
            .find_map(|(path, access)| match access.options().open(&path) {
                Ok(file) => {
                    debug!("opened {} ({:?})", path.display(), access);
                    Some(file)
                }
                Err(e) => {
                    debug!("{}: {}", path.display(), e);
                    None
                }
            })
    }

    /// Host paths for a name in open order: lowercase, uppercase, then the
    /// library directory (the root when none is set), read-write before
    /// read-only. Make never looks in the library.
    fn open_attempts(&self, name: &PackedName, access: Access) -> Vec<(PathBuf, Access)> {
        let Some(lower) = host_file_name(name) else {
            return Vec::new();
        };
        let upper = lower.to_ascii_uppercase();

        let mut attempts = vec![
            (self.config.root.join(&lower), access),
            (self.config.root.join(&upper), access),
        ];
        if access != Access::Create {
            let lib = self.config.library_dir.as_ref().unwrap_or(&self.config.root);
            if self.config.library_dir.is_some() {
                attempts.push((lib.join(&lower), Access::ReadWrite));
            }
            attempts.push((lib.join(&lower), Access::ReadOnly));
            attempts.push((lib.join(&upper), Access::ReadOnly));
        }
        attempts
    }

    /// Existing host path for a name: lowercase, else uppercase, else lowercase.
    fn existing_path(&self, name: &PackedName) -> Option<PathBuf> {
        let lower = host_file_name(name)?;
        let lower_path = self.config.root.join(&lower);
        if !lower_path.exists() {
            let upper_path = self.config.root.join(lower.to_ascii_uppercase());
            if upper_path.exists() {
                return Some(upper_path);
            }
        }
        Some(lower_path)
    }

    /// BDOS 16: Close file.
    fn close(&mut self, mem: &mut [u8], address: u16) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);
        let name = fcb.packed_name();
        let extent = fcb.coords().extent() as u64;
        let rc = fcb.rc() as u64;

        let file = self.bound(address, &name, BdosFunction::CloseFile)?;
        let len = file.metadata()?.len();
        let host_extent = len / EXTENT_SIZE;
        if host_extent == extent {
            // The last extent may be shortened by lowering RC.
            let in_extent = records_for_len(len) - host_extent * RECORDS_PER_EXTENT as u64;
            if rc < in_extent {
                let truncated = host_extent * EXTENT_SIZE + rc * RECORD_SIZE as u64;
                debug!("{}: truncating to {} bytes", decode_name(&name), truncated);
                file.set_len(truncated)?;
            }
        }

        self.registry.unbind(address);
        fcb.clear_open();
        store_fcb(mem, address, &buf);
        Ok(status::OK)
    }

    /// BDOS 17: Search for first matching file.
    fn search_first(&mut self, mem: &mut [u8], address: u16, dma: u16) -> CpmResult<u8> {
        self.search = None;
        match HostCandidates::open(&self.config.root) {
            Ok(candidates) => {
                self.search = Some(ActiveSearch {
                    pattern_address: address,
                    candidates,
                });
            }
            Err(e) => {
                warn!("cannot list {}: {}", self.config.root.display(), e);
                return Ok(status::ERROR);
            }
        }
        self.search_next(mem, dma)
    }

    /// BDOS 18: Search for next matching file.
    fn search_next(&mut self, mem: &mut [u8], dma: u16) -> CpmResult<u8> {
        let Some(search) = self.search.as_mut() else {
            return Ok(status::ERROR);
        };
        let mut pattern_fcb = load_fcb(mem, search.pattern_address)?;
        let pattern = Fcb::new(&mut pattern_fcb).packed_name();

        let Some(found) = search.candidates.find(|c| matches_pattern(&pattern, c)) else {
            self.search = None;
            return Ok(status::ERROR);
        };

        let entry = dma_mut(mem, dma)?;
        entry.fill(0);
        entry[1..12].copy_from_slice(&found);
        entry[32] = FREE_ENTRY;
        entry[64] = FREE_ENTRY;
        entry[96] = FREE_ENTRY;
        Ok(status::OK)
    }

    /// BDOS 19: Delete file. Always reports success.
    fn delete(&mut self, mem: &mut [u8], address: u16) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let name = Fcb::new(&mut buf).packed_name();

        if let Some(path) = self.existing_path(&name) {
            if let Err(e) = fs::remove_file(&path) {
                debug!("delete {}: {}", path.display(), e);
            }
        }
        Ok(status::OK)
    }

    /// BDOS 23: Rename file. Old name at FCB+0, new name at FCB+16.
    fn rename(&mut self, mem: &mut [u8], address: u16) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let fcb = Fcb::new(&mut buf);

        let from = self.existing_path(&fcb.packed_name());
        let to = host_file_name(&fcb.rename_target()).map(|n| self.config.root.join(n));
        if let (Some(from), Some(to)) = (from, to) {
            if let Err(e) = fs::rename(&from, &to) {
                debug!("rename {} to {}: {}", from.display(), to.display(), e);
            }
        }
        Ok(status::OK)
    }

    /// BDOS 20: Read sequential.
    fn read_sequential(&mut self, mem: &mut [u8], address: u16, dma: u16) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);
        let name = fcb.packed_name();
        let coords = fcb.coords();
        let max_module = self.config.max_module;

        let file = self.bound(address, &name, BdosFunction::ReadSequential)?;
        let record = dma_mut(mem, dma)?;
        if !read_into(file, coords.offset(), record) {
            return Ok(status::EOF);
        }

        let next = coords.advance();
        fcb.set_coords(next, fcb.is_open());
        store_fcb(mem, address, &buf);
        if next.s2 > max_module {
            Ok(status::OUT_OF_SPACE)
        } else {
            Ok(status::OK)
        }
    }

    /// BDOS 21: Write sequential.
    fn write_sequential(&mut self, mem: &mut [u8], address: u16, dma: u16) -> CpmResult<u8> {
        let data = load_record(mem, dma)?;
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);

        let target = fcb.coords().record();
        let result = self.write_record(&mut fcb, address, BdosFunction::WriteSequential, target, &data)?;
        store_fcb(mem, address, &buf);
        Ok(result)
    }

    /// BDOS 33: Read random.
    fn read_random(&mut self, mem: &mut [u8], address: u16, dma: u16) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);
        let name = fcb.packed_name();
        let record = fcb.random_record();

        let file = self.bound(address, &name, BdosFunction::ReadRandom)?;
        let out = dma_mut(mem, dma)?;
        if !read_into(file, record as u64 * RECORD_SIZE as u64, out) {
            return Ok(status::EOF);
        }

        fcb.set_coords(ExtentCoords::from_record(record), fcb.is_open());
        store_fcb(mem, address, &buf);
        Ok(status::OK)
    }

    /// BDOS 34: Write random.
    fn write_random(&mut self, mem: &mut [u8], address: u16, dma: u16) -> CpmResult<u8> {
        let data = load_record(mem, dma)?;
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);

        let record = fcb.random_record();
        fcb.set_coords(ExtentCoords::from_record(record), true);
        let result = self.write_record(&mut fcb, address, BdosFunction::WriteRandom, record, &data)?;
        store_fcb(mem, address, &buf);
        Ok(result)
    }

    /// Shared tail of the write verbs.
    ///
    /// The new position is taken from the host file after the write, not by
    /// advancing the old one, so a file grown behind the guest's back still
    /// yields the right coordinates.
    fn write_record(
        &mut self,
        fcb: &mut Fcb<'_>,
        address: u16,
        function: BdosFunction,
        target: u32,
        data: &Sector,
    ) -> CpmResult<u8> {
        let name = fcb.packed_name();
        let max_module = self.config.max_module as u32;
        let sync = self.config.sync_writes;

        let file = self.bound(address, &name, function)?;
        if target / (RECORDS_PER_EXTENT * EXTENTS_PER_MODULE) > max_module {
            return Ok(status::OUT_OF_SPACE);
        }

        let pos = match write_at(file, target as u64 * RECORD_SIZE as u64, data, sync) {
            Ok(pos) => pos,
            Err(e) => {
                warn!("{}: write failed: {}", decode_name(&name), e);
                return Ok(status::ERROR);
            }
        };
        let len = file.metadata()?.len();

        let next = ExtentCoords::from_offset(pos);
        fcb.set_coords(next, true);
        fcb.set_rc(extent_record_count(len, next.extent()));
        Ok(status::OK)
    }

    /// BDOS 35 / 36: Compute file size, set random record.
    fn file_size(&mut self, mem: &mut [u8], address: u16, from: SizeFrom) -> CpmResult<u8> {
        let mut buf = load_fcb(mem, address)?;
        let mut fcb = Fcb::new(&mut buf);
        let name = fcb.packed_name();
        let function = match from {
            SizeFrom::End => BdosFunction::ComputeFileSize,
            SizeFrom::Position => BdosFunction::SetRandomRecord,
        };

        let file = self.bound(address, &name, function)?;
        let len = file.metadata()?.len();
        let pos = match from {
            SizeFrom::End => file.seek(SeekFrom::End(0))?,
            SizeFrom::Position => file.stream_position()?,
        };

        let record = records_for_len(pos) as u32;
        let coords = ExtentCoords::from_record(record);
        fcb.set_random_record(record);
        fcb.set_coords(coords, true);
        fcb.set_rc(extent_record_count(len, coords.extent()));
        store_fcb(mem, address, &buf);
        Ok(status::OK)
    }

    /// Host file bound to this FCB. A miss means host and guest disagree
    /// about which files are open, which the guest cannot recover from.
    fn bound(
        &mut self,
        address: u16,
        name: &PackedName,
        function: BdosFunction,
    ) -> CpmResult<&mut File> {
        let Some(index) = self.registry.resolve(address, name) else {
            for (at, bound) in self.registry.bound() {
                error!("  open: {} at {:#06X}", bound, at);
            }
            return Err(unbound(address, name, function));
        };
        self.registry
            .handle_mut(index)
            .ok_or_else(|| unbound(address, name, function))
    }
}

fn unbound(address: u16, name: &PackedName, function: BdosFunction) -> CpmError {
    CpmError::UnboundFcb {
        address,
        function: function as u8,
        name: decode_name(name),
    }
}

/// Host file name for a packed name, if it is usable as one.
fn host_file_name(name: &PackedName) -> Option<String> {
    let name = decode_name(name);
    if name.is_empty() || name.contains(['/', '\\']) {
        return None;
    }
    Some(name)
}

fn load_fcb(mem: &[u8], address: u16) -> CpmResult<[u8; FCB_SIZE]> {
    let start = address as usize;
    mem.get(start..start + FCB_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CpmError::InvalidFcb(address))
}

fn store_fcb(mem: &mut [u8], address: u16, fcb: &[u8; FCB_SIZE]) {
    let start = address as usize;
    mem[start..start + FCB_SIZE].copy_from_slice(fcb);
}

fn dma_mut(mem: &mut [u8], dma: u16) -> CpmResult<&mut [u8]> {
    let start = dma as usize;
    mem.get_mut(start..start + RECORD_SIZE)
        .ok_or(CpmError::InvalidFcb(dma))
}

fn load_record(mem: &[u8], dma: u16) -> CpmResult<Sector> {
    let start = dma as usize;
    mem.get(start..start + RECORD_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CpmError::InvalidFcb(dma))
}

/// Read the record at `offset` into `out`, padding a short record with EOF
/// fill. Returns false at end of file or on error, leaving `out` untouched.
fn read_into<F: Read + Seek>(file: &mut F, offset: u64, out: &mut [u8]) -> bool {
    match read_record(file, offset, out) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => {
            debug!("read at {}: {}", offset, e);
            false
        }
    }
}

fn read_record<F: Read + Seek>(file: &mut F, offset: u64, out: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut record = [0u8; RECORD_SIZE];
    let mut filled = 0;
    while filled < RECORD_SIZE {
        match file.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if filled > 0 {
        record[filled..].fill(EOF_FILL);
        out[..RECORD_SIZE].copy_from_slice(&record);
    }
    Ok(filled)
}

/// Write one record at `offset` and return the file position after it.
fn write_at(file: &mut File, offset: u64, data: &Sector, sync: bool) -> io::Result<u64> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    file.stream_position()
}
