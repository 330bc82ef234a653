//! File storage engine.
//!
//! Files are stored in one of three tiers depending on size:
//! - Seedling: the key pointer is the single data block.
//! - Sapling: the key pointer is an index block of up to 256 data blocks.
//! - Tree: the key pointer is a master index of up to 128 index blocks.
//!
//! Index blocks hold the low bytes of their pointers in bytes 0-255 and the
//! high bytes in bytes 256-511. In a tree file a zero data pointer is a
//! sparse hole that reads back as a zero-filled block.

use chrono::NaiveDateTime;
use log::debug;

use crate::bitmap::{allocate_blocks, free_blocks};
use crate::device::{Block, BlockDevice, BLOCK_SIZE};
use crate::directory::{
    adjust_file_count, find_entry_slot, get_free_entry_slot, read_directory, split_path,
    validate_name, write_file_entry, FileEntry, StorageType, DEFAULT_ACCESS,
};
use crate::error::{ProdosError, ProdosResult};

/// Largest file the 24-bit end-of-file field can describe.
pub const MAX_FILE_SIZE: usize = 0xFF_FFFF;

/// Largest file that fits a sapling's single index block.
const SAPLING_MAX_SIZE: usize = 0x2_0000;

/// Pointers per index block.
const POINTERS_PER_INDEX: usize = 256;

/// Blocks needed to store `len` bytes, index and master blocks included.
///
/// # Examples
/// ```
/// use prodos_core::block_count;
/// assert_eq!(block_count(0).unwrap(), 1);
/// assert_eq!(block_count(513).unwrap(), 3);
/// assert_eq!(block_count(0x2_0001).unwrap(), 260);
/// ```
pub fn block_count(len: usize) -> ProdosResult<usize> {
    if len > MAX_FILE_SIZE {
        return Err(ProdosError::FileTooLarge(len));
    }
    let data_blocks = len.div_ceil(BLOCK_SIZE).max(1);
    Ok(match len {
        0..=BLOCK_SIZE => data_blocks,
        _ if len <= SAPLING_MAX_SIZE => data_blocks + 1,
        _ => data_blocks + data_blocks.div_ceil(POINTERS_PER_INDEX) + 1,
    })
}

/// Allocate every block a file of `len` bytes needs.
pub fn create_block_list<D: BlockDevice + ?Sized>(
    device: &mut D,
    len: usize,
) -> ProdosResult<Vec<u16>> {
    let count = block_count(len)?;
    allocate_blocks(device, count)
}

fn pointer(index: &Block, slot: usize) -> u16 {
    u16::from_le_bytes([index[slot], index[slot + POINTERS_PER_INDEX]])
}

fn index_block(pointers: &[u16]) -> Block {
    let mut index = [0u8; BLOCK_SIZE];
    for (slot, &block) in pointers.iter().take(POINTERS_PER_INDEX).enumerate() {
        let [low, high] = block.to_le_bytes();
        index[slot] = low;
        index[slot + POINTERS_PER_INDEX] = high;
    }
    index
}

/// Write `data` across `blocks`, zero-padding the final block.
fn write_data_blocks<D: BlockDevice + ?Sized>(
    device: &mut D,
    data: &[u8],
    blocks: &[u16],
) -> ProdosResult<()> {
    for (i, &block) in blocks.iter().enumerate() {
        let start = (i * BLOCK_SIZE).min(data.len());
        let end = (start + BLOCK_SIZE).min(data.len());
        let mut buffer = [0u8; BLOCK_SIZE];
        buffer[..end - start].copy_from_slice(&data[start..end]);
        device.write_block(block, &buffer)?;
    }
    Ok(())
}

fn write_seedling_file<D: BlockDevice + ?Sized>(
    device: &mut D,
    data: &[u8],
    blocks: &[u16],
) -> ProdosResult<()> {
    write_data_blocks(device, data, &blocks[..1])
}

fn write_sapling_file<D: BlockDevice + ?Sized>(
    device: &mut D,
    data: &[u8],
    blocks: &[u16],
) -> ProdosResult<()> {
    let (index, data_blocks) = blocks.split_at(1);
    device.write_block(index[0], &index_block(data_blocks))?;
    write_data_blocks(device, data, data_blocks)
}

/// Block list layout: master index, then index blocks, then data blocks.
fn write_tree_file<D: BlockDevice + ?Sized>(
    device: &mut D,
    data: &[u8],
    blocks: &[u16],
) -> ProdosResult<()> {
    let data_count = data.len().div_ceil(BLOCK_SIZE).max(1);
    let index_count = data_count.div_ceil(POINTERS_PER_INDEX);
    let master = blocks[0];
    let indexes = &blocks[1..=index_count];
    let data_blocks = &blocks[1 + index_count..];

    device.write_block(master, &index_block(indexes))?;
    for (&index, pointers) in indexes.iter().zip(data_blocks.chunks(POINTERS_PER_INDEX)) {
        device.write_block(index, &index_block(pointers))?;
    }
    write_data_blocks(device, data, data_blocks)
}

/// Ordered data blocks of a file, with 0 standing for a sparse hole.
///
/// The scan length comes from the end-of-file, not from the pointers: a
/// zero data pointer never ends the list. A zero pointer in a tree's master
/// index does.
pub fn get_data_blocklist<D: BlockDevice + ?Sized>(
    device: &D,
    entry: &FileEntry,
) -> ProdosResult<Vec<u16>> {
    let needed = (entry.end_of_file as usize).div_ceil(BLOCK_SIZE).max(1);

    match entry.storage_type {
        StorageType::Seedling => Ok(vec![entry.key_pointer]),
        StorageType::Sapling => {
            let index = device.read_block(entry.key_pointer)?;
            Ok((0..needed.min(POINTERS_PER_INDEX))
                .map(|slot| pointer(&index, slot))
                .collect())
        }
        StorageType::Tree => {
            let master = device.read_block(entry.key_pointer)?;
            let mut blocks = Vec::with_capacity(needed);
            for slot in 0..POINTERS_PER_INDEX / 2 {
                let index_address = pointer(&master, slot);
                if index_address == 0 || blocks.len() >= needed {
                    break;
                }
                let index = device.read_block(index_address)?;
                let take = (needed - blocks.len()).min(POINTERS_PER_INDEX);
                blocks.extend((0..take).map(|j| pointer(&index, j)));
            }
            Ok(blocks)
        }
        other => Err(ProdosError::UnsupportedStorageType(other.nibble())),
    }
}

/// Every block a file owns: index and master blocks first, then data.
/// Sparse holes are left out.
pub fn get_all_blocklist<D: BlockDevice + ?Sized>(
    device: &D,
    entry: &FileEntry,
) -> ProdosResult<Vec<u16>> {
    let needed = (entry.end_of_file as usize).div_ceil(BLOCK_SIZE).max(1);

    let mut blocks = vec![entry.key_pointer];
    match entry.storage_type {
        StorageType::Seedling => {}
        StorageType::Sapling => {
            blocks.extend(get_data_blocklist(device, entry)?.into_iter().filter(|&b| b != 0));
        }
        StorageType::Tree => {
            let master = device.read_block(entry.key_pointer)?;
            let mut data = Vec::new();
            let mut remaining = needed;
            for slot in 0..POINTERS_PER_INDEX / 2 {
                let index_address = pointer(&master, slot);
                if index_address == 0 || remaining == 0 {
                    break;
                }
                blocks.push(index_address);
                let index = device.read_block(index_address)?;
                let take = remaining.min(POINTERS_PER_INDEX);
                data.extend((0..take).map(|j| pointer(&index, j)).filter(|&b| b != 0));
                remaining -= take;
            }
            blocks.extend(data);
        }
        other => return Err(ProdosError::UnsupportedStorageType(other.nibble())),
    }
    Ok(blocks)
}

/// Look up the live entry at `path`.
pub fn get_file_entry<D: BlockDevice + ?Sized>(device: &D, path: &str) -> ProdosResult<FileEntry> {
    let (directory, name) = split_path(path);
    let (_, _, entries) = read_directory(device, &directory)?;
    entries
        .into_iter()
        .find(|e| e.file_name == name)
        .ok_or_else(|| ProdosError::NotFound(path.to_uppercase()))
}

/// True if a live entry exists at `path`. A missing directory counts as absent.
pub fn file_exists<D: BlockDevice + ?Sized>(device: &D, path: &str) -> ProdosResult<bool> {
    match get_file_entry(device, path) {
        Ok(_) => Ok(true),
        Err(ProdosError::NotFound(_) | ProdosError::PathNotMatched(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read a whole file. Sparse holes read back as zeros.
pub fn load_file<D: BlockDevice + ?Sized>(device: &D, path: &str) -> ProdosResult<Vec<u8>> {
    let entry = get_file_entry(device, path)?;
    if entry.is_directory() {
        return Err(ProdosError::UnsupportedOperation(format!(
            "{} is a directory",
            path.to_uppercase()
        )));
    }

    let eof = entry.end_of_file as usize;
    let mut buffer = vec![0u8; eof];
    for (i, &block) in get_data_blocklist(device, &entry)?.iter().enumerate() {
        let start = i * BLOCK_SIZE;
        if block == 0 || start >= eof {
            continue;
        }
        let end = (start + BLOCK_SIZE).min(eof);
        let data = device.read_block(block)?;
        buffer[start..end].copy_from_slice(&data[..end - start]);
    }
    Ok(buffer)
}

/// Store `data` as a new file at `path`.
///
/// Fails with `AlreadyExists` if a live entry already has the name; callers
/// delete first to replace a file.
pub fn write_file<D: BlockDevice + ?Sized>(
    device: &mut D,
    path: &str,
    file_type: u8,
    aux_type: u16,
    creation_time: Option<NaiveDateTime>,
    modified_time: Option<NaiveDateTime>,
    data: &[u8],
) -> ProdosResult<()> {
    let (directory, name) = split_path(path);
    validate_name(&name)?;

    let (_, _, entries) = read_directory(device, &directory)?;
    if entries.iter().any(|e| e.file_name == name) {
        return Err(ProdosError::AlreadyExists(path.to_uppercase()));
    }
    let count = block_count(data.len())?;

    let slot = get_free_entry_slot(device, &directory)?;
    let blocks = create_block_list(device, data.len())?;

    let storage_type = StorageType::for_block_count(count);
    match storage_type {
        StorageType::Seedling => write_seedling_file(device, data, &blocks)?,
        StorageType::Sapling => write_sapling_file(device, data, &blocks)?,
        _ => write_tree_file(device, data, &blocks)?,
    }

    let entry = FileEntry {
        storage_type,
        file_name: name,
        file_type,
        key_pointer: blocks[0],
        blocks_used: blocks.len() as u16,
        end_of_file: data.len() as u32,
        creation_time,
        access: DEFAULT_ACCESS,
        aux_type,
        modified_time,
        ..slot
    };
    write_file_entry(device, &entry)?;
    adjust_file_count(device, entry.header_pointer, 1)?;

    debug!(
        "wrote {} ({:?}, {} bytes, {} blocks from {})",
        entry.file_name,
        storage_type,
        data.len(),
        blocks.len(),
        blocks[0]
    );
    Ok(())
}

/// Delete the file at `path`, returning its blocks to the bitmap.
///
/// Only the storage type nibble is zeroed. The name bytes stay in the slot,
/// as ProDOS itself leaves them, so deleting the same path again reports
/// `AlreadyDeleted` instead of `NotFound`. The slot is reused by the next
/// file created in that directory.
pub fn delete_file<D: BlockDevice + ?Sized>(device: &mut D, path: &str) -> ProdosResult<()> {
    let (directory, name) = split_path(path);
    validate_name(&name)?;
    let mut entry = find_entry_slot(device, &directory, &name)?
        .ok_or_else(|| ProdosError::NotFound(path.to_uppercase()))?;

    if entry.is_deleted() {
        return Err(ProdosError::AlreadyDeleted(path.to_uppercase()));
    }
    if entry.is_directory() {
        return Err(ProdosError::UnsupportedOperation(format!(
            "cannot delete directory {}",
            path.to_uppercase()
        )));
    }

    let blocks = get_all_blocklist(device, &entry)?;
    free_blocks(device, &blocks)?;
    adjust_file_count(device, entry.header_pointer, -1)?;

    entry.storage_type = StorageType::Deleted;
    write_file_entry(device, &entry)?;
    debug!("deleted {} ({} blocks freed)", entry.file_name, blocks.len());
    Ok(())
}
