//! In-memory block device.

use std::io;

use super::block_device::{Block, BlockDevice, BLOCK_SIZE};
use crate::error::{ProdosError, ProdosResult};

/// Volume image held entirely in memory.
#[derive(Default, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
}

impl MemoryDevice {
    /// Create a zero-filled device holding `blocks` blocks.
    pub fn new(blocks: usize) -> Self {
        Self {
            data: vec![0; blocks * BLOCK_SIZE],
        }
    }

    /// Wrap an existing image. A trailing partial block is not addressable.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the device and return the image bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, block: u16) -> ProdosResult<std::ops::Range<usize>> {
        let start = block as usize * BLOCK_SIZE;
        let end = start + BLOCK_SIZE;
        if end > self.data.len() {
            return Err(ProdosError::io(
                block,
                io::Error::new(io::ErrorKind::UnexpectedEof, "block beyond end of image"),
            ));
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemoryDevice {
    fn read_block(&self, block: u16) -> ProdosResult<Block> {
        let range = self.range(block)?;
        let mut buffer = [0u8; BLOCK_SIZE];
        buffer.copy_from_slice(&self.data[range]);
        Ok(buffer)
    }

    fn write_block(&mut self, block: u16, data: &Block) -> ProdosResult<()> {
        let range = self.range(block)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }
}
