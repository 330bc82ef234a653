//! ProDOS volume: formatting plus the public operations over one block device.

use chrono::{Local, NaiveDateTime, Timelike};
use log::debug;

use crate::bitmap::{self, VolumeBitmap, BITMAP_START_BLOCK};
use crate::device::{write_u16, Block, BlockDevice, BLOCK_SIZE};
use crate::directory::{
    self, validate_volume_name, DirectoryHeader, FileEntry, VolumeHeader, VOLUME_DIRECTORY_BLOCKS,
    VOLUME_HEADER_BLOCK,
};
use crate::error::{ProdosError, ProdosResult};
use crate::storage;

/// Current local time truncated to the minute, the resolution of ProDOS dates.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Write an empty ProDOS filesystem of `total_blocks` blocks to `device`.
///
/// Blocks 0-1 are zeroed boot blocks, 2-5 the chained volume directory and
/// the bitmap starts at block 6.
pub fn format_volume<D: BlockDevice + ?Sized>(
    device: &mut D,
    volume_name: &str,
    total_blocks: u16,
    creation_time: Option<NaiveDateTime>,
) -> ProdosResult<()> {
    validate_volume_name(volume_name)?;
    let bitmap_blocks = VolumeBitmap::blocks_for(total_blocks);
    let first_free = BITMAP_START_BLOCK as usize + bitmap_blocks;
    if (total_blocks as usize) <= first_free || device.block_count() < total_blocks as usize {
        return Err(ProdosError::InvalidVolumeSize(total_blocks));
    }

    let empty: Block = [0u8; BLOCK_SIZE];
    for block in 0..VOLUME_HEADER_BLOCK {
        device.write_block(block, &empty)?;
    }

    let last = VOLUME_HEADER_BLOCK + VOLUME_DIRECTORY_BLOCKS - 1;
    for block in VOLUME_HEADER_BLOCK..=last {
        let mut buffer = empty;
        if block > VOLUME_HEADER_BLOCK {
            write_u16(&mut buffer, 0x00, block - 1);
        }
        if block < last {
            write_u16(&mut buffer, 0x02, block + 1);
        }
        if block == VOLUME_HEADER_BLOCK {
            let name = volume_name.to_uppercase();
            VolumeHeader::new(&name, total_blocks, creation_time).write_to(&mut buffer);
        }
        device.write_block(block, &buffer)?;
    }

    let bitmap = VolumeBitmap::new(total_blocks);
    for (i, chunk) in bitmap.as_bytes().chunks(BLOCK_SIZE).enumerate() {
        let mut buffer = empty;
        buffer[..chunk.len()].copy_from_slice(chunk);
        device.write_block(BITMAP_START_BLOCK + i as u16, &buffer)?;
    }

    debug!(
        "formatted {} with {} blocks, {} bitmap blocks",
        volume_name.to_uppercase(),
        total_blocks,
        bitmap_blocks
    );
    Ok(())
}

/// A ProDOS volume on a block device.
pub struct Volume<D: BlockDevice> {
    device: D,
}

impl<D: BlockDevice> Volume<D> {
    /// Format `device` as a new volume and open it.
    pub fn create(mut device: D, volume_name: &str, total_blocks: u16) -> ProdosResult<Self> {
        format_volume(&mut device, volume_name, total_blocks, Some(now()))?;
        Ok(Self { device })
    }

    /// Open an existing volume, checking its header.
    pub fn open(device: D) -> ProdosResult<Self> {
        directory::read_volume_header(&device)?;
        Ok(Self { device })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    pub fn volume_header(&self) -> ProdosResult<VolumeHeader> {
        directory::read_volume_header(&self.device)
    }

    /// List the live entries of a directory. An empty path is the volume directory.
    pub fn read_directory(
        &self,
        path: &str,
    ) -> ProdosResult<(VolumeHeader, DirectoryHeader, Vec<FileEntry>)> {
        directory::read_directory(&self.device, path)
    }

    /// Create an empty subdirectory stamped with the current time.
    pub fn create_directory(&mut self, path: &str) -> ProdosResult<()> {
        directory::create_directory(&mut self.device, path, Some(now()))
    }

    pub fn get_file_entry(&self, path: &str) -> ProdosResult<FileEntry> {
        storage::get_file_entry(&self.device, path)
    }

    pub fn file_exists(&self, path: &str) -> ProdosResult<bool> {
        storage::file_exists(&self.device, path)
    }

    pub fn load_file(&self, path: &str) -> ProdosResult<Vec<u8>> {
        storage::load_file(&self.device, path)
    }

    /// Store a new file. `None` timestamps are written as "no date".
    pub fn write_file(
        &mut self,
        path: &str,
        file_type: u8,
        aux_type: u16,
        creation_time: Option<NaiveDateTime>,
        modified_time: Option<NaiveDateTime>,
        data: &[u8],
    ) -> ProdosResult<()> {
        storage::write_file(
            &mut self.device,
            path,
            file_type,
            aux_type,
            creation_time,
            modified_time,
            data,
        )
    }

    pub fn delete_file(&mut self, path: &str) -> ProdosResult<()> {
        storage::delete_file(&mut self.device, path)
    }

    pub fn read_volume_bitmap(&self) -> ProdosResult<VolumeBitmap> {
        bitmap::read_volume_bitmap(&self.device)
    }

    pub fn write_volume_bitmap(&mut self, bitmap: &VolumeBitmap) -> ProdosResult<()> {
        bitmap::write_volume_bitmap(&mut self.device, bitmap)
    }

    pub fn free_block_count(&self) -> ProdosResult<usize> {
        let header = self.volume_header()?;
        Ok(self.read_volume_bitmap()?.free_block_count(header.total_blocks))
    }

    pub fn read_block(&self, block: u16) -> ProdosResult<Block> {
        self.device.read_block(block)
    }

    /// Write raw bytes to a block, zero-padding anything shorter than a block.
    pub fn write_block(&mut self, block: u16, data: &[u8]) -> ProdosResult<()> {
        if data.len() > BLOCK_SIZE {
            return Err(ProdosError::InvalidBlockSize(data.len()));
        }
        let mut buffer = [0u8; BLOCK_SIZE];
        buffer[..data.len()].copy_from_slice(data);
        self.device.write_block(block, &buffer)
    }

    pub fn flush(&mut self) -> ProdosResult<()> {
        self.device.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{read_u16, MemoryDevice};

    #[test]
    fn test_format_chains_volume_directory() {
        let mut device = MemoryDevice::new(280);
        format_volume(&mut device, "floppy", 280, None).unwrap();

        for (block, prev, next) in [(2, 0, 3), (3, 2, 4), (4, 3, 5), (5, 4, 0)] {
            let buffer = device.read_block(block).unwrap();
            assert_eq!(read_u16(&buffer, 0), prev, "block {}", block);
            assert_eq!(read_u16(&buffer, 2), next, "block {}", block);
        }

        let header = directory::read_volume_header(&device).unwrap();
        assert_eq!(header.volume_name, "FLOPPY");
        assert_eq!(header.total_blocks, 280);
        assert_eq!(header.bitmap_start_block, 6);
        assert_eq!(header.active_file_count, 0);
    }

    #[test]
    fn test_format_rejects_bad_sizes() {
        let mut device = MemoryDevice::new(280);
        assert!(matches!(
            format_volume(&mut device, "SMALL", 7, None),
            Err(ProdosError::InvalidVolumeSize(7))
        ));
        assert!(matches!(
            format_volume(&mut device, "BIG", 281, None),
            Err(ProdosError::InvalidVolumeSize(281))
        ));
        assert!(matches!(
            format_volume(&mut device, "9LIVES", 280, None),
            Err(ProdosError::InvalidName(_))
        ));
    }

    #[test]
    fn test_open_rejects_unformatted() {
        let mut device = MemoryDevice::new(280);
        device.write_block(2, &[0xFF; BLOCK_SIZE]).unwrap();
        assert!(matches!(
            Volume::open(device),
            Err(ProdosError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_open_rejects_blank_image() {
        assert!(matches!(
            Volume::open(MemoryDevice::new(280)),
            Err(ProdosError::NotAVolume(0))
        ));
    }

    #[test]
    fn test_write_block_padding() {
        let mut volume = Volume::create(MemoryDevice::new(280), "RAW", 280).unwrap();
        volume.write_block(100, b"HELLO").unwrap();
        let block = volume.read_block(100).unwrap();
        assert_eq!(&block[..5], b"HELLO");
        assert!(block[5..].iter().all(|&b| b == 0));

        assert!(matches!(
            volume.write_block(100, &[0u8; 513]),
            Err(ProdosError::InvalidBlockSize(513))
        ));
    }

    #[test]
    fn test_now_truncated_to_minute() {
        let time = now();
        assert_eq!(time.second(), 0);
        assert_eq!(time.nanosecond(), 0);
    }
}
