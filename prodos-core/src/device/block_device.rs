//! BlockDevice trait - fixed-size sector access to a volume's storage.

use crate::error::ProdosResult;

/// Size of a ProDOS block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// One block of volume storage.
pub type Block = [u8; BLOCK_SIZE];

/// Random-access block storage backing a ProDOS volume.
///
/// Block `n` lives at byte offset `n * 512`. Implementations do no caching:
/// every call goes straight to the underlying storage.
pub trait BlockDevice {
    /// Read one block. Fails with `ProdosError::Io` if the block is not addressable.
    fn read_block(&self, block: u16) -> ProdosResult<Block>;

    /// Write one block. Fails with `ProdosError::Io` if the block is not addressable.
    fn write_block(&mut self, block: u16, data: &Block) -> ProdosResult<()>;

    /// Number of whole blocks the storage can hold.
    fn block_count(&self) -> usize;

    /// Push buffered writes to durable storage.
    fn flush(&mut self) -> ProdosResult<()> {
        Ok(())
    }
}

/// Byte offset of a block within the underlying storage.
pub fn block_offset(block: u16) -> u64 {
    block as u64 * BLOCK_SIZE as u64
}

/// Read a little-endian 16-bit value at `offset`.
pub(crate) fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

/// Write a little-endian 16-bit value at `offset`.
pub(crate) fn write_u16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
