//! Block storage for ProDOS volumes.
//!
//! - `BlockDevice`: 512-byte block read/write interface
//! - `MemoryDevice`: image held in a memory buffer
//! - `FileDevice`: image stored in a host file

mod block_device;
mod file_device;
mod memory_device;

pub(crate) use block_device::{read_u16, write_u16};
pub use block_device::{block_offset, Block, BlockDevice, BLOCK_SIZE};
pub use file_device::FileDevice;
pub use memory_device::MemoryDevice;
