//! ProDOS Filesystem Engine
//!
//! This crate reads and writes ProDOS volumes held in 512-byte block images:
//! - Volume bitmap allocation
//! - Directory records, path resolution and directory growth
//! - Seedling, sapling and tree file storage, including sparse tree files
//!
//! # Architecture
//!
//! The engine is layered over a block store:
//! - `BlockDevice` trait: 512-byte block reads and writes (`MemoryDevice`, `FileDevice`)
//! - `bitmap`: first-fit allocator over the volume bitmap
//! - `directory`: header and entry records, the directory tree walk
//! - `storage`: file contents to and from the tiered index structures
//! - `Volume`: the public operations over one device
//!
//! ```
//! use prodos_core::{MemoryDevice, Volume};
//!
//! let mut volume = Volume::create(MemoryDevice::new(280), "FLOPPY", 280).unwrap();
//! volume.write_file("HELLO", 0x04, 0, None, None, b"HELLO\r").unwrap();
//! assert_eq!(volume.load_file("/FLOPPY/HELLO").unwrap(), b"HELLO\r");
//! assert_eq!(volume.free_block_count().unwrap(), 272);
//! ```

pub mod bitmap;
pub mod datetime;
pub mod device;
pub mod directory;
pub mod error;
pub mod storage;
pub mod volume;

pub use bitmap::{VolumeBitmap, BITMAP_START_BLOCK};
pub use datetime::{decode_datetime, encode_datetime};
pub use device::{Block, BlockDevice, FileDevice, MemoryDevice, BLOCK_SIZE};
pub use directory::{
    absolute_path, file_type_name, split_path, DirectoryHeader, FileEntry, ParentEntry,
    StorageType, VolumeHeader, DEFAULT_ACCESS, ENTRIES_PER_BLOCK, ENTRY_LENGTH, MAX_NAME_LENGTH,
    VOLUME_HEADER_BLOCK,
};
pub use error::{ProdosError, ProdosResult};
pub use storage::{block_count, MAX_FILE_SIZE};
pub use volume::{format_volume, now, Volume};
