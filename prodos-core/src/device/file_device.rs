//! Block device backed by a host disk-image file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;

use super::block_device::{block_offset, Block, BlockDevice, BLOCK_SIZE};
use crate::error::{ProdosError, ProdosResult};

/// ProDOS-order disk image stored in a host file.
pub struct FileDevice {
    file: File,
    blocks: usize,
}

impl FileDevice {
    /// Open an existing image for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> ProdosResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file)
    }

    /// Create (or truncate) an image sized to hold `blocks` blocks.
    pub fn create(path: impl AsRef<Path>, blocks: usize) -> ProdosResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((blocks * BLOCK_SIZE) as u64)?;
        Ok(Self { file, blocks })
    }

    /// Use an already opened file.
    pub fn from_file(file: File) -> ProdosResult<Self> {
        let blocks = (file.metadata()?.len() / BLOCK_SIZE as u64) as usize;
        Ok(Self { file, blocks })
    }

    /// Consume the device and return the file handle.
    pub fn into_file(self) -> File {
        self.file
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&self, block: u16) -> ProdosResult<Block> {
        trace!("read block {}", block);
        let mut buffer = [0u8; BLOCK_SIZE];
        // `&File` implements Read + Seek, so shared access is enough.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(block_offset(block)))
            .and_then(|_| file.read_exact(&mut buffer))
            .map_err(|e| ProdosError::io(block, e))?;
        Ok(buffer)
    }

    fn write_block(&mut self, block: u16, data: &Block) -> ProdosResult<()> {
        trace!("write block {}", block);
        self.file
            .seek(SeekFrom::Start(block_offset(block)))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| ProdosError::io(block, e))?;
        self.blocks = self.blocks.max(block as usize + 1);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.blocks
    }

    fn flush(&mut self) -> ProdosResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
