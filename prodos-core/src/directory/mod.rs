//! Directory tree: record formats, path resolution and directory growth.
//!
//! A directory is a chain of 512-byte blocks linked by previous/next
//! pointers at offsets 0 and 2. Each block holds 13 entry slots of 39 bytes
//! starting at offset 4; in the first (key) block the first slot is taken
//! by the directory header.

mod entry;
mod header;
mod path;

use std::collections::HashSet;

use chrono::NaiveDateTime;
use log::{debug, warn};

pub use entry::{file_type_name, write_file_entry, FileEntry, StorageType};
pub use header::{
    read_directory_header, read_volume_header, write_directory_header, DirectoryHeader,
    ParentEntry, VolumeHeader,
};
pub use path::{absolute_path, split_path, validate_name, validate_volume_name};

use crate::bitmap::allocate_blocks;
use crate::device::{read_u16, write_u16, BlockDevice, BLOCK_SIZE};
use crate::error::{ProdosError, ProdosResult};

/// Block holding the volume directory header.
pub const VOLUME_HEADER_BLOCK: u16 = 2;

/// Blocks in the volume directory chain.
pub const VOLUME_DIRECTORY_BLOCKS: u16 = 4;

/// Bytes per directory entry.
pub const ENTRY_LENGTH: usize = 0x27;

/// Entry slots per directory block.
pub const ENTRIES_PER_BLOCK: usize = 0x0D;

/// Longest file, directory or volume name.
pub const MAX_NAME_LENGTH: usize = 15;

/// The only supported version / minimum version.
pub const FORMAT_VERSION: u8 = 0;

/// Access byte for new files: destroy, rename, write and read enabled.
pub const DEFAULT_ACCESS: u8 = 0xE3;

/// Access byte written into directory headers.
pub const VOLUME_ACCESS: u8 = 0xC3;

/// File type of subdirectory entries.
pub const DIRECTORY_FILE_TYPE: u8 = 0x0F;

/// Offset of the first entry slot in a directory block.
pub(crate) const FIRST_ENTRY_OFFSET: usize = 4;

/// Byte offsets of the entry slots in one directory block.
fn slot_offsets(is_key_block: bool) -> impl Iterator<Item = usize> {
    let first = usize::from(is_key_block);
    (first..ENTRIES_PER_BLOCK).map(|slot| FIRST_ENTRY_OFFSET + slot * ENTRY_LENGTH)
}

/// Every entry slot of a directory chain, free ones included.
struct DirectoryChain {
    entries: Vec<FileEntry>,
    last_block: u16,
}

fn read_chain<D: BlockDevice + ?Sized>(device: &D, key_block: u16) -> ProdosResult<DirectoryChain> {
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut block_number = key_block;
    loop {
        if !visited.insert(block_number) {
            return Err(ProdosError::CorruptDirectory {
                block: key_block,
                reason: format!("chain loops back to block {}", block_number),
            });
        }
        let buffer = device.read_block(block_number)?;
        for offset in slot_offsets(block_number == key_block) {
            entries.push(FileEntry::parse(
                &buffer[offset..offset + ENTRY_LENGTH],
                block_number,
                offset as u16,
            ));
        }

        let next = read_u16(&buffer, 0x02);
        if next == 0 {
            return Ok(DirectoryChain {
                entries,
                last_block: block_number,
            });
        }
        block_number = next;
    }
}

/// Walk from the volume directory down to the directory named by `path`.
///
/// Every directory visited must carry the name of its path segment.
/// Returns the absolute path along with the headers.
fn resolve_directory<D: BlockDevice + ?Sized>(
    device: &D,
    path: &str,
) -> ProdosResult<(VolumeHeader, DirectoryHeader, String)> {
    let volume = read_volume_header(device)?;
    let absolute = absolute_path(path, &volume.volume_name);
    let segments = path::segments(&absolute);

    let mut key_block = VOLUME_HEADER_BLOCK;
    for (depth, segment) in segments.iter().enumerate() {
        let header = read_directory_header(device, key_block)?;
        if header.name != *segment {
            return Err(ProdosError::PathNotMatched(absolute));
        }
        let Some(next) = segments.get(depth + 1) else {
            return Ok((volume, header, absolute));
        };

        let chain = read_chain(device, key_block)?;
        key_block = chain
            .entries
            .iter()
            .find(|e| !e.is_deleted() && e.is_directory() && e.file_name == *next)
            .map(|e| e.key_pointer)
            .ok_or_else(|| ProdosError::PathNotMatched(absolute.clone()))?;
    }
    Err(ProdosError::PathNotMatched(absolute))
}

/// List the live entries of the directory at `path`.
pub fn read_directory<D: BlockDevice + ?Sized>(
    device: &D,
    path: &str,
) -> ProdosResult<(VolumeHeader, DirectoryHeader, Vec<FileEntry>)> {
    let (volume, header, absolute) = resolve_directory(device, path)?;
    let entries: Vec<FileEntry> = read_chain(device, header.starting_block)?
        .entries
        .into_iter()
        .filter(|e| !e.is_deleted())
        .collect();

    if entries.len() != header.active_file_count as usize {
        warn!(
            "{}: header counts {} files, found {}",
            absolute,
            header.active_file_count,
            entries.len()
        );
    }
    Ok((volume, header, entries))
}

/// Find an entry by name among the slots of a directory, deleted ones included.
///
/// Live entries win over deleted slots that still carry the same name.
pub(crate) fn find_entry_slot<D: BlockDevice + ?Sized>(
    device: &D,
    directory: &str,
    name: &str,
) -> ProdosResult<Option<FileEntry>> {
    let (_, header, _) = resolve_directory(device, directory)?;
    let mut matches: Vec<FileEntry> = read_chain(device, header.starting_block)?
        .entries
        .into_iter()
        .filter(|e| e.file_name == name)
        .collect();
    matches.sort_by_key(|e| e.is_deleted());
    Ok(matches.into_iter().next())
}

/// Find a free entry slot in the directory at `path`.
///
/// A full subdirectory grows by one block; a full volume directory cannot grow.
pub fn get_free_entry_slot<D: BlockDevice + ?Sized>(
    device: &mut D,
    path: &str,
) -> ProdosResult<FileEntry> {
    let (_, header, absolute) = resolve_directory(device, path)?;
    let chain = read_chain(device, header.starting_block)?;

    if let Some(slot) = chain.entries.iter().find(|e| e.is_deleted()) {
        return Ok(FileEntry::free_slot(
            slot.directory_block,
            slot.directory_offset,
            header.starting_block,
        ));
    }

    match header.parent {
        Some(parent) => expand_directory(device, &header, chain.last_block, parent),
        None => Err(ProdosError::DirectoryFull(absolute)),
    }
}

/// Link a fresh block onto the end of a subdirectory chain and grow the
/// parent's entry for it by one block.
fn expand_directory<D: BlockDevice + ?Sized>(
    device: &mut D,
    header: &DirectoryHeader,
    last_block: u16,
    parent: ParentEntry,
) -> ProdosResult<FileEntry> {
    let mut owner = read_parent_entry(device, header, parent)?;
    let new_block = allocate_blocks(device, 1)?[0];

    let mut buffer = [0u8; BLOCK_SIZE];
    write_u16(&mut buffer, 0x00, last_block);
    device.write_block(new_block, &buffer)?;

    let mut last = device.read_block(last_block)?;
    write_u16(&mut last, 0x02, new_block);
    device.write_block(last_block, &last)?;

    owner.blocks_used += 1;
    owner.end_of_file += BLOCK_SIZE as u32;
    write_file_entry(device, &owner)?;

    debug!(
        "expanded directory {} with block {} after {}",
        header.name, new_block, last_block
    );
    Ok(FileEntry::free_slot(
        new_block,
        FIRST_ENTRY_OFFSET as u16,
        header.starting_block,
    ))
}

/// The parent's entry for a subdirectory, checked to point back at it.
///
/// Entry 1 of a key block is the directory header, so the parent entry
/// number must fall in `2..=13` there and `1..=13` elsewhere.
fn read_parent_entry<D: BlockDevice + ?Sized>(
    device: &D,
    header: &DirectoryHeader,
    parent: ParentEntry,
) -> ProdosResult<FileEntry> {
    let corrupt = |reason: String| ProdosError::CorruptDirectory {
        block: header.starting_block,
        reason,
    };
    if parent.entry == 0 || parent.entry as usize > ENTRIES_PER_BLOCK {
        return Err(corrupt(format!("parent entry number {}", parent.entry)));
    }

    let offset = FIRST_ENTRY_OFFSET + (parent.entry as usize - 1) * ENTRY_LENGTH;
    let parent_block = device.read_block(parent.block)?;
    let owner = FileEntry::parse(
        &parent_block[offset..offset + ENTRY_LENGTH],
        parent.block,
        offset as u16,
    );
    if owner.is_deleted() || !owner.is_directory() || owner.key_pointer != header.starting_block {
        return Err(corrupt(format!(
            "parent entry {} in block {} does not point back",
            parent.entry, parent.block
        )));
    }
    Ok(owner)
}

/// Add `delta` to the active file count of the directory keyed at `key_block`.
pub(crate) fn adjust_file_count<D: BlockDevice + ?Sized>(
    device: &mut D,
    key_block: u16,
    delta: i16,
) -> ProdosResult<()> {
    let mut header = read_directory_header(device, key_block)?;
    header.active_file_count = header.active_file_count.saturating_add_signed(delta);
    write_directory_header(device, &header)
}

/// Create an empty subdirectory at `path`.
pub fn create_directory<D: BlockDevice + ?Sized>(
    device: &mut D,
    path: &str,
    creation_time: Option<NaiveDateTime>,
) -> ProdosResult<()> {
    let (parent_path, name) = split_path(path);
    validate_name(&name)?;

    let (_, _, entries) = read_directory(device, &parent_path)?;
    if entries.iter().any(|e| e.file_name == name) {
        return Err(ProdosError::AlreadyExists(path.to_uppercase()));
    }

    let slot = get_free_entry_slot(device, &parent_path)?;
    let key_block = allocate_blocks(device, 1)?[0];

    let entry = FileEntry {
        storage_type: StorageType::Directory,
        file_name: name.clone(),
        file_type: DIRECTORY_FILE_TYPE,
        key_pointer: key_block,
        blocks_used: 1,
        end_of_file: BLOCK_SIZE as u32,
        creation_time,
        modified_time: creation_time,
        access: DEFAULT_ACCESS,
        ..slot
    };
    write_file_entry(device, &entry)?;
    adjust_file_count(device, entry.header_pointer, 1)?;

    let header = DirectoryHeader::new_subdirectory(
        &name,
        key_block,
        ParentEntry {
            block: entry.directory_block,
            entry: entry.entry_number(),
            entry_length: ENTRY_LENGTH as u8,
        },
        creation_time,
    );
    let mut buffer = [0u8; BLOCK_SIZE];
    header.write_to(&mut buffer);
    device.write_block(key_block, &buffer)?;

    debug!("created directory {} at block {}", name, key_block);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::read_volume_bitmap;
    use crate::device::MemoryDevice;
    use crate::volume::format_volume;

    fn formatted(name: &str, blocks: u16) -> MemoryDevice {
        let mut device = MemoryDevice::new(blocks as usize);
        format_volume(&mut device, name, blocks, None).unwrap();
        device
    }

    #[test]
    fn test_slot_offsets() {
        let key: Vec<usize> = slot_offsets(true).collect();
        assert_eq!(key.len(), 12);
        assert_eq!(key[0], 43);
        let rest: Vec<usize> = slot_offsets(false).collect();
        assert_eq!(rest.len(), 13);
        assert_eq!(rest[0], 4);
        assert_eq!(rest[12] + ENTRY_LENGTH, 511);
    }

    #[test]
    fn test_read_empty_root() {
        let device = formatted("TEST", 1024);
        let (volume, header, entries) = read_directory(&device, "").unwrap();
        assert_eq!(volume.volume_name, "TEST");
        assert_eq!(header.starting_block, 2);
        assert!(!header.is_subdirectory());
        assert!(entries.is_empty());
    }

    #[test]
    fn test_wrong_volume_name() {
        let device = formatted("TEST", 1024);
        assert!(matches!(
            read_directory(&device, "/OTHER"),
            Err(ProdosError::PathNotMatched(_))
        ));
        assert!(matches!(
            read_directory(&device, "/TEST/MISSING"),
            Err(ProdosError::PathNotMatched(_))
        ));
    }

    #[test]
    fn test_create_directory_links_parent() {
        let mut device = formatted("TEST", 1024);
        create_directory(&mut device, "/test/games", None).unwrap();

        let (volume, _, entries) = read_directory(&device, "/TEST").unwrap();
        assert_eq!(volume.active_file_count, 1);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.storage_type, StorageType::Directory);
        assert_eq!(entry.file_type, DIRECTORY_FILE_TYPE);
        assert_eq!(entry.blocks_used, 1);
        assert_eq!(entry.end_of_file, 512);
        assert_eq!(entry.header_pointer, 2);

        let sub = read_directory_header(&device, entry.key_pointer).unwrap();
        assert_eq!(sub.name, "GAMES");
        assert_eq!(sub.active_file_count, 0);
        assert_eq!(
            sub.parent,
            Some(ParentEntry {
                block: 2,
                entry: 2,
                entry_length: 0x27
            })
        );

        let bitmap = read_volume_bitmap(&device).unwrap();
        assert!(!bitmap.is_free(entry.key_pointer));
    }

    #[test]
    fn test_create_directory_errors() {
        let mut device = formatted("TEST", 1024);
        assert!(matches!(
            create_directory(&mut device, "", None),
            Err(ProdosError::InvalidName(_))
        ));
        assert!(matches!(
            create_directory(&mut device, "SIXTEEN.CHARS.XX", None),
            Err(ProdosError::NameTooLong(_))
        ));
        create_directory(&mut device, "dup", None).unwrap();
        assert!(matches!(
            create_directory(&mut device, "DUP", None),
            Err(ProdosError::AlreadyExists(_))
        ));
        assert!(matches!(
            create_directory(&mut device, "/TEST/NOPE/CHILD", None),
            Err(ProdosError::PathNotMatched(_))
        ));
    }

    #[test]
    fn test_subdirectory_expands() {
        let mut device = formatted("TEST", 1024);
        create_directory(&mut device, "SUB", None).unwrap();
        for i in 0..13 {
            create_directory(&mut device, &format!("SUB/D{}", i), None).unwrap();
        }

        let (_, header, entries) = read_directory(&device, "SUB").unwrap();
        assert_eq!(entries.len(), 13);
        assert_eq!(header.active_file_count, 13);
        assert_ne!(header.next_block, 0);

        let second = device.read_block(header.next_block).unwrap();
        assert_eq!(read_u16(&second, 0x00), header.starting_block);
        assert_eq!(read_u16(&second, 0x02), 0);
        assert_eq!(entries[12].directory_block, header.next_block);
        assert_eq!(entries[12].directory_offset, 4);

        let (_, _, root) = read_directory(&device, "").unwrap();
        assert_eq!(root[0].blocks_used, 2);
        assert_eq!(root[0].end_of_file, 1024);
    }

    #[test]
    fn test_volume_directory_full() {
        let mut device = formatted("TEST", 1024);
        // 12 slots in the key block plus 13 in each of the other three
        for i in 0..51 {
            create_directory(&mut device, &format!("D{}", i), None).unwrap();
        }
        assert!(matches!(
            create_directory(&mut device, "ONE.MORE", None),
            Err(ProdosError::DirectoryFull(_))
        ));
        let (volume, _, entries) = read_directory(&device, "").unwrap();
        assert_eq!(entries.len(), 51);
        assert_eq!(volume.active_file_count, 51);
    }

    #[test]
    fn test_directory_chain_loop() {
        let mut device = formatted("TEST", 1024);
        create_directory(&mut device, "SUB", None).unwrap();
        let key = read_directory(&device, "").unwrap().2[0].key_pointer;

        let mut block = device.read_block(key).unwrap();
        write_u16(&mut block, 0x02, key);
        device.write_block(key, &block).unwrap();

        assert!(matches!(
            read_directory(&device, "SUB"),
            Err(ProdosError::CorruptDirectory { .. })
        ));
        assert!(matches!(
            get_free_entry_slot(&mut device, "SUB"),
            Err(ProdosError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn test_expand_rejects_bad_parent_entry() {
        let mut device = formatted("TEST", 1024);
        create_directory(&mut device, "SUB", None).unwrap();
        create_directory(&mut device, "OTHER", None).unwrap();
        for i in 0..12 {
            create_directory(&mut device, &format!("SUB/D{}", i), None).unwrap();
        }
        let key = read_directory(&device, "").unwrap().2[0].key_pointer;
        let free = read_volume_bitmap(&device).unwrap().free_block_count(1024);

        for bad_entry in [0u8, 3, 14] {
            let mut block = device.read_block(key).unwrap();
            block[0x29] = bad_entry;
            device.write_block(key, &block).unwrap();

            assert!(
                matches!(
                    get_free_entry_slot(&mut device, "SUB"),
                    Err(ProdosError::CorruptDirectory { .. })
                ),
                "parent entry {}",
                bad_entry
            );
        }

        let header = read_directory_header(&device, key).unwrap();
        assert_eq!(header.next_block, 0);
        assert_eq!(read_volume_bitmap(&device).unwrap().free_block_count(1024), free);
        let volume_block = device.read_block(VOLUME_HEADER_BLOCK).unwrap();
        assert_eq!(VolumeHeader::parse(&volume_block).unwrap().volume_name, "TEST");
    }
}
