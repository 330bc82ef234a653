//! ProDOS CLI - Inspect and modify ProDOS disk images from the command line.
//!
//! Usage:
//!   prodos -d <image> <command> [args]
//!
//! Examples:
//!   prodos -d disk.po create -v MYDISK -s 65535   # Format a new 32MB image
//!   prodos -d disk.po ls /MYDISK                  # Catalog a directory
//!   prodos -d disk.po put /MYDISK/HELLO -i hello  # Copy a host file in
//!   prodos -d disk.po get /MYDISK/HELLO           # Copy it back out
//!   prodos -d disk.po readblock -b 2              # Hex dump the volume header

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use log::{debug, LevelFilter};

use prodos_core::{
    file_type_name, now, split_path, FileDevice, FileEntry, Volume, BLOCK_SIZE,
};

/// ProDOS disk image utility
#[derive(Parser, Debug)]
#[command(name = "prodos")]
#[command(about = "Read and write ProDOS disk images")]
struct Args {
    /// Disk image file
    #[arg(short, long)]
    drive: PathBuf,

    /// Log every block read and write
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        /// ProDOS path, the volume directory if omitted
        #[arg(default_value = "")]
        path: String,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy a file out of the image
    Get {
        path: String,

        /// Host output file, the ProDOS file name if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copy a host file into the image
    Put {
        path: String,

        /// Host input file
        #[arg(short, long)]
        input: PathBuf,

        /// File type, detected from the input if neither type nor aux type is given
        #[arg(short = 't', long, value_parser = parse_u8)]
        file_type: Option<u8>,

        /// Aux type
        #[arg(short, long, value_parser = parse_u16)]
        aux_type: Option<u16>,
    },
    /// Delete a file
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Format a new image
    Create {
        /// Volume name
        #[arg(short, long, default_value = "NO.NAME")]
        volume: String,

        /// Size in blocks
        #[arg(short, long, default_value = "65535", value_parser = parse_u16)]
        size: u16,
    },
    /// Hex dump one block
    Readblock {
        #[arg(short, long, value_parser = parse_u16)]
        block: u16,
    },
    /// Overwrite one block with up to 512 bytes from a host file
    Writeblock {
        #[arg(short, long, value_parser = parse_u16)]
        block: u16,

        #[arg(short, long)]
        input: PathBuf,
    },
    /// Show a file entry
    Info { path: String },
}

/// Parse a decimal, `0x` or `$` prefixed number.
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_prefix('$') {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_number(s)?;
    u16::try_from(value).map_err(|_| format!("{} does not fit in 16 bits", value))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in 8 bits", value))
}

/// ProDOS file info carried in an AppleSingle header as written by cc65.
///
/// Layout (big-endian):
/// - 0x00: magic 0x00051600, 0x04: version 0x00020000
/// - 0x18: entry count (2)
/// - 0x1A: data fork entry (id 1, offset 0x3A, length)
/// - 0x26: ProDOS file info entry (id 11, offset 0x32, length 8)
/// - 0x34: file type, 0x36: aux type
fn parse_apple_single(data: &[u8]) -> Option<(u8, u16, &[u8])> {
    const HEADER_LEN: usize = 0x3A;
    if data.len() < HEADER_LEN {
        return None;
    }
    let be16 = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
    let be32 = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

    let valid = be32(0x00) == 0x0005_1600
        && be32(0x04) == 0x0002_0000
        && be16(0x18) == 2
        && be32(0x1A) == 1
        && be32(0x1E) == HEADER_LEN as u32
        && be32(0x22) as usize == data.len() - HEADER_LEN
        && be32(0x26) == 0x0B
        && be32(0x2A) == 0x32
        && be32(0x2E) == 8;
    if !valid {
        return None;
    }
    let file_type = u8::try_from(be16(0x34)).ok()?;
    let aux_type = u16::try_from(be32(0x36)).ok()?;
    Some((file_type, aux_type, &data[HEADER_LEN..]))
}

/// Pick file and aux type for a host file from its contents or extension.
fn convert_by_type(host_path: &Path, data: Vec<u8>) -> (u8, u16, Vec<u8>) {
    if let Some((file_type, aux_type, body)) = parse_apple_single(&data) {
        debug!("AppleSingle input: type ${:02X} aux ${:04X}", file_type, aux_type);
        return (file_type, aux_type, body.to_vec());
    }

    let ext = host_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_uppercase();
    match ext.as_str() {
        "SYS" => (0xFF, 0x2000, data),
        "TXT" => (0x04, 0x0000, to_apple_text(&data)),
        _ => (0x06, 0x2000, data),
    }
}

/// Host line endings to carriage returns.
fn to_apple_text(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().peekable();
    while let Some(&b) = bytes.next() {
        match b {
            b'\r' if bytes.peek() == Some(&&b'\n') => {
                bytes.next();
                out.push(b'\r');
            }
            b'\n' => out.push(b'\r'),
            _ => out.push(b),
        }
    }
    out
}

fn time_to_string(time: Option<NaiveDateTime>) -> String {
    match time {
        Some(t) => t.format("%Y-%b-%d %H:%M").to_string().to_uppercase(),
        None => "<NO DATE>".to_string(),
    }
}

/// 16 bytes per line: offset, hex bytes, then the low 7 bits as ASCII.
fn dump_block(buffer: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in buffer.chunks(16).enumerate() {
        out.push_str(&format!("{:04X}: ", line * 16));
        for b in chunk {
            out.push_str(&format!("{:02X} ", b));
        }
        for b in chunk {
            let c = b & 0x7F;
            out.push(if (32..127).contains(&c) { c as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

fn print_catalog(path: &str, entries: &[FileEntry], free: usize, total: usize) {
    println!("{}\n", path);
    println!(" NAME           TYPE  BLOCKS  MODIFIED          CREATED            ENDFILE  SUBTYPE\n");
    for entry in entries {
        println!(
            " {:<15} {} {:>7}  {:<17} {:<17} {:>8} {:>8}",
            entry.file_name,
            entry.file_type_name(),
            entry.blocks_used,
            time_to_string(entry.modified_time),
            time_to_string(entry.creation_time),
            entry.end_of_file,
            entry.aux_type,
        );
    }
    println!();
    println!(
        "BLOCKS FREE: {:>5}    BLOCKS USED: {:>5}      TOTAL BLOCKS: {:>5}",
        free,
        total - free,
        total
    );
}

fn print_entry(entry: &FileEntry) {
    println!("File name: {}", entry.file_name);
    println!("Creation time: {}", time_to_string(entry.creation_time));
    println!("Modified time: {}", time_to_string(entry.modified_time));
    println!("Aux type: {:04X}", entry.aux_type);
    println!("EOF: {:06X}", entry.end_of_file);
    println!("Blocks used: {:04X}", entry.blocks_used);
    println!("Starting block: {:04X}", entry.key_pointer);
    println!("File type: {:02X} ({})", entry.file_type, file_type_name(entry.file_type));
    println!("Storage type: {:?}", entry.storage_type);
    println!("Access: {:02X}", entry.access);
    println!("Header pointer: {:04X}", entry.header_pointer);
}

fn open_volume(path: &Path) -> Result<Volume<FileDevice>, Box<dyn std::error::Error>> {
    let device = FileDevice::open(path)?;
    Ok(Volume::open(device)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.trace {
        logger.filter_level(LevelFilter::Trace);
    }
    logger.init();

    match args.command {
        Command::Ls { path, json } => {
            let volume = open_volume(&args.drive)?;
            let (volume_header, directory_header, entries) = volume.read_directory(&path)?;
            let free = volume.free_block_count()?;
            let total = volume_header.total_blocks as usize;

            if json {
                let listing = serde_json::json!({
                    "volume": volume_header,
                    "directory": directory_header,
                    "entries": entries,
                    "blocksFree": free,
                });
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                let shown = prodos_core::absolute_path(&path, &volume_header.volume_name);
                print_catalog(&shown, &entries, free, total);
            }
        }
        Command::Get { path, output } => {
            let volume = open_volume(&args.drive)?;
            let data = volume.load_file(&path)?;
            let output = output.unwrap_or_else(|| PathBuf::from(split_path(&path).1));
            std::fs::write(&output, &data)?;
            eprintln!("Wrote {} bytes to {}", data.len(), output.display());
        }
        Command::Put {
            path,
            input,
            file_type,
            aux_type,
        } => {
            let mut volume = open_volume(&args.drive)?;
            let data = std::fs::read(&input)?;
            let (file_type, aux_type, data) = match (file_type, aux_type) {
                (None, None) => convert_by_type(&input, data),
                (t, a) => (t.unwrap_or(0x06), a.unwrap_or(0x2000), data),
            };
            let stamp = Some(now());
            volume.write_file(&path, file_type, aux_type, stamp, stamp, &data)?;
            volume.flush()?;
        }
        Command::Rm { path } => {
            let mut volume = open_volume(&args.drive)?;
            volume.delete_file(&path)?;
            volume.flush()?;
        }
        Command::Mkdir { path } => {
            let mut volume = open_volume(&args.drive)?;
            volume.create_directory(&path)?;
            volume.flush()?;
        }
        Command::Create { volume, size } => {
            let device = FileDevice::create(&args.drive, size as usize)?;
            let mut created = Volume::create(device, &volume, size)?;
            created.flush()?;
            eprintln!(
                "Created {} with {} blocks ({} free)",
                volume.to_uppercase(),
                size,
                created.free_block_count()?
            );
        }
        Command::Readblock { block } => {
            let volume = open_volume(&args.drive)?;
            println!("Block 0x{:04X} ({}):\n", block, block);
            print!("{}", dump_block(&volume.read_block(block)?));
        }
        Command::Writeblock { block, input } => {
            let mut volume = open_volume(&args.drive)?;
            let data = std::fs::read(&input)?;
            if data.len() > BLOCK_SIZE {
                eprintln!("Only the first {} bytes will fit in a block", BLOCK_SIZE);
            }
            volume.write_block(block, &data[..data.len().min(BLOCK_SIZE)])?;
            volume.flush()?;
        }
        Command::Info { path } => {
            let volume = open_volume(&args.drive)?;
            print_entry(&volume.get_file_entry(&path)?);
        }
    }

    Ok(())
}
