//! cpmtool - Access files inside CP/M disk images.
//!
//! Usage:
//!   cpmtool IMAGE [OPTIONS] [COMMAND]
//!
//! Examples:
//!   cpmtool disk.img                     # Directory listing
//!   cpmtool disk.img ls -la              # Long listing, system files included
//!   cpmtool -t fd floppy.img get pip.com # Copy PIP.COM out of an 8" floppy image
//!   cpmtool disk.img put ./hello.com     # Copy hello.com onto the disk
//!   cpmtool disk.img mkfs                # Create an empty filesystem

use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use cpmfs_core::{CpmDisk, CpmError, DiskParams, FileInfo};

/// CP/M diskette access
#[derive(Parser, Debug)]
#[command(name = "cpmtool")]
#[command(about = "Read and write files in CP/M disk images")]
struct Args {
    /// Disk image file
    image: PathBuf,

    /// Drive type: hd (5MB hard disk) or fd (8" single density floppy)
    #[arg(short = 't', long = "type", default_value = "hd")]
    disk_type: String,

    /// JSON disk parameter block, used instead of --type
    #[arg(long)]
    params: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Directory listing
    Ls {
        /// Long listing with sizes and flags
        #[arg(short = 'l')]
        long: bool,
        /// Show system files
        #[arg(short = 'a')]
        all: bool,
        /// One name per line
        #[arg(short = '1')]
        single: bool,
    },
    /// Type file to console
    Cat { name: String },
    /// Copy a file from the disk to a local file
    Get { name: String, local: Option<PathBuf> },
    /// Copy a local file onto the disk
    Put { local: PathBuf, name: Option<String> },
    /// Delete a file
    Rm { name: String },
    /// Print amount of free space
    Free,
    /// Create an empty filesystem
    Mkfs {
        /// Image size in tracks (default: just enough for every block)
        #[arg(long)]
        tracks: Option<u32>,
    },
    /// Check filesystem
    Check,
}

impl Command {
    fn writes(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Rm { .. })
    }
}

type Disk = CpmDisk<File>;

/// Columns in the short listing.
const COLUMNS: usize = 80 / 13;

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let dpb = match &args.params {
        Some(path) => DiskParams::from_reader(File::open(path)?)?,
        None => DiskParams::by_name(&args.disk_type)?,
    };
    let command = args.command.unwrap_or(Command::Ls {
        long: false,
        all: false,
        single: false,
    });

    if let Command::Mkfs { tracks } = command {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&args.image)?;
        CpmDisk::format(file, dpb, tracks)?;
        return Ok(());
    }

    let file = OpenOptions::new()
        .read(true)
        .write(command.writes())
        .open(&args.image)
        .map_err(|e| format!("Couldn't open '{}': {}", args.image.display(), e))?;
    let mut disk = CpmDisk::open(file, dpb);

    match command {
        Command::Ls { long, all, single } => {
            let files = disk.list(all)?;
            if long {
                print_long(&mut disk, &files)?;
            } else if single {
                for f in &files {
                    println!("{}", f.name);
                }
            } else {
                print_columns(&files);
            }
        }
        Command::Cat { name } => {
            let data = disk.read_file(&name)?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Get { name, local } => {
            let data = disk.read_file(&name)?;
            let local = local.unwrap_or_else(|| PathBuf::from(&name));
            fs::write(&local, data)
                .map_err(|e| format!("Couldn't write local file '{}': {}", local.display(), e))?;
        }
        Command::Put { local, name } => {
            let data = fs::read(&local)
                .map_err(|e| format!("Couldn't read file '{}': {}", local.display(), e))?;
            let name = match name {
                Some(name) => name,
                None => {
                    let name = base_name(&local)?;
                    println!("{}", name);
                    name
                }
            };
            disk.write_file(&name, &data)?;
        }
        Command::Rm { name } => {
            if !disk.delete(&name)? {
                return Err(CpmError::FileNotFound(name).into());
            }
        }
        Command::Free => print_free(&mut disk)?,
        Command::Check => {
            let report = disk.scan()?;
            for violation in &report.violations {
                println!("{}", violation);
            }
            if !report.is_clean() {
                return Err(format!("{} problems found", report.violations.len()).into());
            }
            println!("No problems found");
        }
        Command::Mkfs { .. } => {}
    }
    Ok(())
}

fn base_name(path: &Path) -> Result<String, Box<dyn Error>> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("No file name in '{}'", path.display()).into())
}

fn print_free(disk: &mut Disk) -> Result<(), Box<dyn Error>> {
    let sectors = disk.amount_free()? * disk.params().sectors_per_block() as usize;
    println!("{} free sectors, {} free bytes", sectors, sectors * 128);
    Ok(())
}

fn print_long(disk: &mut Disk, files: &[FileInfo]) -> Result<(), Box<dyn Error>> {
    println!();
    for f in files {
        println!(
            "-r{}{}{} {:6} ({:3}) {:<13}",
            if f.read_only { '-' } else { 'w' },
            if f.is_com() { 'x' } else { '-' },
            if f.system { 's' } else { '-' },
            f.size(),
            f.records,
            f.name
        );
    }
    let sectors: u32 = files.iter().map(|f| f.records).sum();
    let bytes: u64 = files.iter().map(FileInfo::size).sum();
    println!("\n{} entries", files.len());
    println!("\n{} sectors, {} bytes", sectors, bytes);
    println!();
    print_free(disk)?;
    println!();
    Ok(())
}

/// Names in columns, ordered down each column like ls.
fn print_columns(files: &[FileInfo]) {
    let rows = files.len().div_ceil(COLUMNS);
    for row in 0..rows {
        let line: String = (0..COLUMNS)
            .map(|col| match files.get(row + col * rows) {
                Some(f) => format!("{:<12}  ", f.name),
                None => " ".repeat(13),
            })
            .collect();
        println!("{}", line.trim_end());
    }
}
