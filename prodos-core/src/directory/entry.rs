//! File entry records.
//!
//! Layout (39 bytes):
//! - Byte 0: storage type (high nibble) | name length (low nibble)
//! - Bytes 1-15: name
//! - Byte 0x10: file type
//! - Bytes 0x11-0x12: key pointer
//! - Bytes 0x13-0x14: blocks used
//! - Bytes 0x15-0x17: end of file (24-bit)
//! - Bytes 0x18-0x1B: creation date/time
//! - Byte 0x1C: version, 0x1D: min version, 0x1E: access
//! - Bytes 0x1F-0x20: aux type
//! - Bytes 0x21-0x24: last modified date/time
//! - Bytes 0x25-0x26: header pointer (key block of the owning directory)

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{DIRECTORY_FILE_TYPE, ENTRY_LENGTH, FIRST_ENTRY_OFFSET};
use crate::datetime::{decode_datetime, encode_datetime};
use crate::device::{read_u16, write_u16, BlockDevice};
use crate::error::ProdosResult;

/// Storage type nibble of a directory entry or header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageType {
    /// Free slot
    Deleted,
    /// Single data block
    Seedling,
    /// Index block + up to 256 data blocks
    Sapling,
    /// Master index + up to 128 index blocks
    Tree,
    /// Pascal area
    Pascal,
    /// Subdirectory file
    Directory,
    /// Header of a subdirectory's key block
    SubdirectoryHeader,
    /// Header of the volume directory
    VolumeHeader,
    /// Any other nibble, e.g. GS/OS extended files (5). Listed but not readable.
    Unknown(u8),
}

impl TryFrom<u8> for StorageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Deleted),
            0x1 => Ok(Self::Seedling),
            0x2 => Ok(Self::Sapling),
            0x3 => Ok(Self::Tree),
            0x4 => Ok(Self::Pascal),
            0xD => Ok(Self::Directory),
            0xE => Ok(Self::SubdirectoryHeader),
            0xF => Ok(Self::VolumeHeader),
            _ => Err(value),
        }
    }
}

impl StorageType {
    /// Decode the high nibble of an entry's first byte.
    pub fn from_nibble(nibble: u8) -> Self {
        Self::try_from(nibble & 0x0F).unwrap_or(Self::Unknown(nibble & 0x0F))
    }

    /// The on-disk nibble.
    pub fn nibble(self) -> u8 {
        match self {
            Self::Deleted => 0x0,
            Self::Seedling => 0x1,
            Self::Sapling => 0x2,
            Self::Tree => 0x3,
            Self::Pascal => 0x4,
            Self::Directory => 0xD,
            Self::SubdirectoryHeader => 0xE,
            Self::VolumeHeader => 0xF,
            Self::Unknown(nibble) => nibble & 0x0F,
        }
    }

    /// Storage tier for a file occupying `blocks` blocks, index blocks included.
    pub fn for_block_count(blocks: usize) -> Self {
        match blocks {
            0 | 1 => Self::Seedling,
            2..=257 => Self::Sapling,
            _ => Self::Tree,
        }
    }
}

/// One entry in a directory block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub storage_type: StorageType,
    pub file_name: String,
    pub file_type: u8,
    pub key_pointer: u16,
    pub blocks_used: u16,
    pub end_of_file: u32,
    pub creation_time: Option<NaiveDateTime>,
    pub version: u8,
    pub min_version: u8,
    pub access: u8,
    pub aux_type: u16,
    pub modified_time: Option<NaiveDateTime>,
    pub header_pointer: u16,
    /// Directory block holding this entry
    pub directory_block: u16,
    /// Byte offset of this entry within `directory_block`
    pub directory_offset: u16,
}

impl FileEntry {
    /// Blank entry for the free slot at `directory_block`/`directory_offset`.
    pub fn free_slot(directory_block: u16, directory_offset: u16, header_pointer: u16) -> Self {
        Self {
            storage_type: StorageType::Deleted,
            file_name: String::new(),
            file_type: 0,
            key_pointer: 0,
            blocks_used: 0,
            end_of_file: 0,
            creation_time: None,
            version: 0,
            min_version: 0,
            access: 0,
            aux_type: 0,
            modified_time: None,
            header_pointer,
            directory_block,
            directory_offset,
        }
    }

    /// Parse the 39 bytes at the start of `buffer`.
    pub fn parse(buffer: &[u8], directory_block: u16, directory_offset: u16) -> Self {
        let storage_type = StorageType::from_nibble(buffer[0] >> 4);
        let name_len = (buffer[0] & 0x0F) as usize;

        Self {
            storage_type,
            file_name: String::from_utf8_lossy(&buffer[1..1 + name_len]).into_owned(),
            file_type: buffer[0x10],
            key_pointer: read_u16(buffer, 0x11),
            blocks_used: read_u16(buffer, 0x13),
            end_of_file: u32::from_le_bytes([buffer[0x15], buffer[0x16], buffer[0x17], 0]),
            creation_time: decode_datetime(&buffer[0x18..0x1C]),
            version: buffer[0x1C],
            min_version: buffer[0x1D],
            access: buffer[0x1E],
            aux_type: read_u16(buffer, 0x1F),
            modified_time: decode_datetime(&buffer[0x21..0x25]),
            header_pointer: read_u16(buffer, 0x25),
            directory_block,
            directory_offset,
        }
    }

    /// Serialize to the on-disk record.
    pub fn to_bytes(&self) -> [u8; ENTRY_LENGTH] {
        let mut buffer = [0u8; ENTRY_LENGTH];
        let name = &self.file_name.as_bytes()[..self.file_name.len().min(15)];
        buffer[0] = (self.storage_type.nibble() << 4) | name.len() as u8;
        buffer[1..1 + name.len()].copy_from_slice(name);
        buffer[0x10] = self.file_type;
        write_u16(&mut buffer, 0x11, self.key_pointer);
        write_u16(&mut buffer, 0x13, self.blocks_used);
        buffer[0x15..0x18].copy_from_slice(&self.end_of_file.to_le_bytes()[..3]);
        buffer[0x18..0x1C].copy_from_slice(&encode_datetime(self.creation_time));
        buffer[0x1C] = self.version;
        buffer[0x1D] = self.min_version;
        buffer[0x1E] = self.access;
        write_u16(&mut buffer, 0x1F, self.aux_type);
        buffer[0x21..0x25].copy_from_slice(&encode_datetime(self.modified_time));
        write_u16(&mut buffer, 0x25, self.header_pointer);
        buffer
    }

    pub fn is_deleted(&self) -> bool {
        self.storage_type == StorageType::Deleted
    }

    /// True for subdirectory entries.
    pub fn is_directory(&self) -> bool {
        self.storage_type == StorageType::Directory || self.file_type == DIRECTORY_FILE_TYPE
    }

    /// 1-based entry number within its directory block (the header counts as entry 1).
    pub fn entry_number(&self) -> u8 {
        ((self.directory_offset as usize - FIRST_ENTRY_OFFSET) / ENTRY_LENGTH + 1) as u8
    }

    /// Three-letter file type mnemonic.
    pub fn file_type_name(&self) -> String {
        file_type_name(self.file_type)
    }
}

/// Three-letter mnemonic for a ProDOS file type, or `$XX` for unnamed types.
///
/// # Examples
/// ```
/// use prodos_core::file_type_name;
/// assert_eq!(file_type_name(0x06), "BIN");
/// assert_eq!(file_type_name(0xFC), "BAS");
/// assert_eq!(file_type_name(0x19), "$19");
/// ```
pub fn file_type_name(file_type: u8) -> String {
    match file_type {
        0x01 => "BAD",
        0x04 => "TXT",
        0x06 => "BIN",
        0x07 => "FNT",
        0x0F => "DIR",
        0xFC => "BAS",
        0xFD => "VAR",
        0xFF => "SYS",
        _ => return format!("${:02X}", file_type),
    }
    .to_string()
}

/// Rewrite one entry in place, preserving the rest of its directory block.
pub fn write_file_entry<D: BlockDevice + ?Sized>(
    device: &mut D,
    entry: &FileEntry,
) -> ProdosResult<()> {
    let offset = entry.directory_offset as usize;
    let mut buffer = device.read_block(entry.directory_block)?;
    buffer[offset..offset + ENTRY_LENGTH].copy_from_slice(&entry.to_bytes());
    device.write_block(entry.directory_block, &buffer)
}
