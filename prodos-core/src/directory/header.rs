//! Volume and directory header records.
//!
//! Both headers occupy the first entry slot (offset 4) of a directory's key
//! block. Shared layout (block offsets):
//! - 0x00-0x01: previous directory block
//! - 0x02-0x03: next directory block
//! - 0x04: storage type (high nibble, 0xF volume / 0xE subdirectory) | name length
//! - 0x05-0x13: name
//! - 0x14-0x1B: reserved (volume) / fixed sentinel bytes (subdirectory)
//! - 0x1C-0x1F: creation date/time
//! - 0x20: version, 0x21: min version, 0x22: access
//! - 0x23: entry length, 0x24: entries per block
//! - 0x25-0x26: active file count
//! - 0x27-0x28: bitmap pointer (volume) / parent block (subdirectory)
//! - 0x29-0x2A: total blocks (volume) / parent entry number and length (subdirectory)

use chrono::NaiveDateTime;
use log::warn;
use serde::Serialize;

use super::entry::StorageType;
use super::{
    ENTRIES_PER_BLOCK, ENTRY_LENGTH, FORMAT_VERSION, VOLUME_ACCESS, VOLUME_HEADER_BLOCK,
};
use crate::bitmap::BITMAP_START_BLOCK;
use crate::datetime::{decode_datetime, encode_datetime};
use crate::device::{read_u16, write_u16, Block, BlockDevice};
use crate::error::{ProdosError, ProdosResult};

/// Sentinel bytes a subdirectory header carries at 0x14-0x1B.
const SUBDIRECTORY_SENTINEL: [u8; 8] = [
    0x75,
    FORMAT_VERSION,
    FORMAT_VERSION,
    VOLUME_ACCESS,
    ENTRIES_PER_BLOCK as u8,
    ENTRY_LENGTH as u8,
    0,
    0,
];

fn parse_name(buffer: &[u8]) -> String {
    let len = (buffer[0x04] & 0x0F) as usize;
    String::from_utf8_lossy(&buffer[0x05..0x05 + len]).into_owned()
}

fn write_name(buffer: &mut [u8], storage_type: StorageType, name: &str) {
    let name = &name.as_bytes()[..name.len().min(15)];
    buffer[0x04] = (storage_type.nibble() << 4) | name.len() as u8;
    buffer[0x05..0x14].fill(0);
    buffer[0x05..0x05 + name.len()].copy_from_slice(name);
}

/// Volume directory header, stored in block 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeHeader {
    pub volume_name: String,
    pub creation_time: Option<NaiveDateTime>,
    pub version: u8,
    pub min_version: u8,
    pub access: u8,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub active_file_count: u16,
    pub bitmap_start_block: u16,
    pub total_blocks: u16,
    pub next_block: u16,
}

impl VolumeHeader {
    /// Header for a freshly formatted volume.
    pub fn new(volume_name: &str, total_blocks: u16, creation_time: Option<NaiveDateTime>) -> Self {
        Self {
            volume_name: volume_name.to_string(),
            creation_time,
            version: FORMAT_VERSION,
            min_version: FORMAT_VERSION,
            access: VOLUME_ACCESS,
            entry_length: ENTRY_LENGTH as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            active_file_count: 0,
            bitmap_start_block: BITMAP_START_BLOCK,
            total_blocks,
            next_block: VOLUME_HEADER_BLOCK + 1,
        }
    }

    /// Parse block 2. The block must carry a volume header storage type, and
    /// any nonzero version byte makes the volume unusable.
    pub fn parse(buffer: &Block) -> ProdosResult<Self> {
        let storage_type = buffer[0x04] >> 4;
        if storage_type != StorageType::VolumeHeader.nibble() {
            return Err(ProdosError::NotAVolume(storage_type));
        }
        let version = buffer[0x20];
        let min_version = buffer[0x21];
        if version != FORMAT_VERSION || min_version != FORMAT_VERSION {
            return Err(ProdosError::UnsupportedFormat {
                version,
                min_version,
            });
        }

        let header = Self {
            volume_name: parse_name(buffer),
            creation_time: decode_datetime(&buffer[0x1C..0x20]),
            version,
            min_version,
            access: buffer[0x22],
            entry_length: buffer[0x23],
            entries_per_block: buffer[0x24],
            active_file_count: read_u16(buffer, 0x25),
            bitmap_start_block: read_u16(buffer, 0x27),
            total_blocks: read_u16(buffer, 0x29),
            next_block: read_u16(buffer, 0x02),
        };
        if header.entry_length as usize != ENTRY_LENGTH
            || header.entries_per_block as usize != ENTRIES_PER_BLOCK
        {
            warn!(
                "volume {} has entry length {} and {} entries per block",
                header.volume_name, header.entry_length, header.entries_per_block
            );
        }
        Ok(header)
    }

    /// Serialize into the volume's key block, leaving the entry slots alone.
    pub fn write_to(&self, buffer: &mut Block) {
        write_u16(buffer, 0x00, 0);
        write_u16(buffer, 0x02, self.next_block);
        write_name(buffer, StorageType::VolumeHeader, &self.volume_name);
        buffer[0x14..0x1C].fill(0);
        buffer[0x1C..0x20].copy_from_slice(&encode_datetime(self.creation_time));
        buffer[0x20] = self.version;
        buffer[0x21] = self.min_version;
        buffer[0x22] = self.access;
        buffer[0x23] = self.entry_length;
        buffer[0x24] = self.entries_per_block;
        write_u16(buffer, 0x25, self.active_file_count);
        write_u16(buffer, 0x27, self.bitmap_start_block);
        write_u16(buffer, 0x29, self.total_blocks);
    }
}

/// Read and validate the volume header.
pub fn read_volume_header<D: BlockDevice + ?Sized>(device: &D) -> ProdosResult<VolumeHeader> {
    VolumeHeader::parse(&device.read_block(VOLUME_HEADER_BLOCK)?)
}

/// Back-reference from a subdirectory to the entry describing it in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentEntry {
    /// Parent directory block holding the entry
    pub block: u16,
    /// 1-based entry number within that block
    pub entry: u8,
    pub entry_length: u8,
}

/// Header at the start of any directory, the volume directory included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryHeader {
    pub name: String,
    pub starting_block: u16,
    pub previous_block: u16,
    pub next_block: u16,
    pub creation_time: Option<NaiveDateTime>,
    pub version: u8,
    pub min_version: u8,
    pub access: u8,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub active_file_count: u16,
    /// `None` for the volume directory
    pub parent: Option<ParentEntry>,
}

impl DirectoryHeader {
    /// Header for an empty subdirectory whose key block is `starting_block`.
    pub fn new_subdirectory(
        name: &str,
        starting_block: u16,
        parent: ParentEntry,
        creation_time: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            name: name.to_string(),
            starting_block,
            previous_block: 0,
            next_block: 0,
            creation_time,
            version: FORMAT_VERSION,
            min_version: FORMAT_VERSION,
            access: VOLUME_ACCESS,
            entry_length: ENTRY_LENGTH as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            active_file_count: 0,
            parent: Some(parent),
        }
    }

    pub fn is_subdirectory(&self) -> bool {
        self.parent.is_some()
    }

    /// Parse the header in a directory's key block.
    pub fn parse(buffer: &Block, starting_block: u16) -> Self {
        let parent = if buffer[0x04] >> 4 == StorageType::SubdirectoryHeader.nibble() {
            Some(ParentEntry {
                block: read_u16(buffer, 0x27),
                entry: buffer[0x29],
                entry_length: buffer[0x2A],
            })
        } else {
            None
        };

        Self {
            name: parse_name(buffer),
            starting_block,
            previous_block: read_u16(buffer, 0x00),
            next_block: read_u16(buffer, 0x02),
            creation_time: decode_datetime(&buffer[0x1C..0x20]),
            version: buffer[0x20],
            min_version: buffer[0x21],
            access: buffer[0x22],
            entry_length: buffer[0x23],
            entries_per_block: buffer[0x24],
            active_file_count: read_u16(buffer, 0x25),
            parent,
        }
    }

    /// Serialize into a directory key block.
    ///
    /// The volume directory's bitmap pointer and block count share offsets
    /// with the parent fields, so those are only written for subdirectories.
    pub fn write_to(&self, buffer: &mut Block) {
        write_u16(buffer, 0x00, self.previous_block);
        write_u16(buffer, 0x02, self.next_block);
        buffer[0x1C..0x20].copy_from_slice(&encode_datetime(self.creation_time));
        buffer[0x20] = self.version;
        buffer[0x21] = self.min_version;
        buffer[0x22] = self.access;
        buffer[0x23] = self.entry_length;
        buffer[0x24] = self.entries_per_block;
        write_u16(buffer, 0x25, self.active_file_count);

        match self.parent {
            Some(parent) => {
                write_name(buffer, StorageType::SubdirectoryHeader, &self.name);
                buffer[0x14..0x1C].copy_from_slice(&SUBDIRECTORY_SENTINEL);
                write_u16(buffer, 0x27, parent.block);
                buffer[0x29] = parent.entry;
                buffer[0x2A] = parent.entry_length;
            }
            None => write_name(buffer, StorageType::VolumeHeader, &self.name),
        }
    }
}

/// Read the header from a directory's key block.
pub fn read_directory_header<D: BlockDevice + ?Sized>(
    device: &D,
    starting_block: u16,
) -> ProdosResult<DirectoryHeader> {
    Ok(DirectoryHeader::parse(
        &device.read_block(starting_block)?,
        starting_block,
    ))
}

/// Rewrite a directory header, preserving everything else in its block.
pub fn write_directory_header<D: BlockDevice + ?Sized>(
    device: &mut D,
    header: &DirectoryHeader,
) -> ProdosResult<()> {
    let mut buffer = device.read_block(header.starting_block)?;
    header.write_to(&mut buffer);
    device.write_block(header.starting_block, &buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BLOCK_SIZE;

    #[test]
    fn test_volume_header_layout() {
        let header = VolumeHeader::new("FLOPPY", 280, None);
        let mut buffer = [0u8; BLOCK_SIZE];
        header.write_to(&mut buffer);

        assert_eq!(buffer[0x02], 3);
        assert_eq!(buffer[0x04], 0xF6);
        assert_eq!(&buffer[0x05..0x0B], b"FLOPPY");
        assert_eq!(buffer[35], 0x27);
        assert_eq!(buffer[36], 0x0D);
        assert_eq!(read_u16(&buffer, 39), 6);
        assert_eq!(read_u16(&buffer, 41), 280);

        assert_eq!(VolumeHeader::parse(&buffer).unwrap(), header);
    }

    #[test]
    fn test_volume_header_unsupported_version() {
        let mut buffer = [0u8; BLOCK_SIZE];
        VolumeHeader::new("NEWER", 280, None).write_to(&mut buffer);
        buffer[33] = 1;

        let err = VolumeHeader::parse(&buffer).unwrap_err();
        assert!(matches!(
            err,
            ProdosError::UnsupportedFormat {
                version: 0,
                min_version: 1
            }
        ));
    }

    #[test]
    fn test_volume_header_requires_storage_type() {
        assert!(matches!(
            VolumeHeader::parse(&[0u8; BLOCK_SIZE]),
            Err(ProdosError::NotAVolume(0))
        ));

        let mut buffer = [0u8; BLOCK_SIZE];
        let parent = ParentEntry {
            block: 2,
            entry: 2,
            entry_length: 0x27,
        };
        DirectoryHeader::new_subdirectory("SUB", 2, parent, None).write_to(&mut buffer);
        assert!(matches!(
            VolumeHeader::parse(&buffer),
            Err(ProdosError::NotAVolume(0xE))
        ));
    }

    #[test]
    fn test_subdirectory_header_round_trip() {
        let parent = ParentEntry {
            block: 2,
            entry: 3,
            entry_length: 0x27,
        };
        let header = DirectoryHeader::new_subdirectory("GAMES", 40, parent, None);
        let mut buffer = [0u8; BLOCK_SIZE];
        header.write_to(&mut buffer);

        assert_eq!(buffer[0x04], 0xE5);
        assert_eq!(&buffer[0x14..0x1C], &[0x75, 0, 0, 0xC3, 0x0D, 0x27, 0, 0]);
        assert_eq!(read_u16(&buffer, 0x27), 2);
        assert_eq!(buffer[0x29], 3);
        assert_eq!(buffer[0x2A], 0x27);

        let parsed = DirectoryHeader::parse(&buffer, 40);
        assert_eq!(parsed, header);
        assert!(parsed.is_subdirectory());
    }

    #[test]
    fn test_root_header_keeps_volume_fields() {
        let mut buffer = [0u8; BLOCK_SIZE];
        VolumeHeader::new("ROOT", 1024, None).write_to(&mut buffer);

        let mut header = DirectoryHeader::parse(&buffer, 2);
        assert!(!header.is_subdirectory());
        header.active_file_count = 7;
        header.write_to(&mut buffer);

        let volume = VolumeHeader::parse(&buffer).unwrap();
        assert_eq!(volume.active_file_count, 7);
        assert_eq!(volume.total_blocks, 1024);
        assert_eq!(volume.bitmap_start_block, 6);
        assert_eq!(volume.volume_name, "ROOT");
    }
}
