//! Volume bitmap allocator.
//!
//! One bit per block, most significant bit first: block 0 is the 0x80 bit
//! of byte 0. A set bit means the block is free.

use log::debug;

use crate::device::{BlockDevice, BLOCK_SIZE};
use crate::directory::read_volume_header;
use crate::error::{ProdosError, ProdosResult};

/// First block of the bitmap on volumes this crate formats.
pub const BITMAP_START_BLOCK: u16 = 6;

/// Blocks tracked by one bitmap block.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

/// Blocks reserved ahead of the bitmap: two boot blocks and four volume directory blocks.
const RESERVED_BLOCKS: u16 = 6;

/// In-memory copy of a volume bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBitmap {
    bytes: Vec<u8>,
}

impl VolumeBitmap {
    /// Bitmap blocks needed to track `total_blocks` blocks.
    pub fn blocks_for(total_blocks: u16) -> usize {
        (total_blocks as usize).div_ceil(BITS_PER_BLOCK)
    }

    /// Bitmap for a freshly formatted volume, padded to whole blocks.
    ///
    /// Boot blocks, the volume directory, the bitmap itself and every bit
    /// past `total_blocks` are marked used.
    pub fn new(total_blocks: u16) -> Self {
        let bitmap_blocks = Self::blocks_for(total_blocks);
        let mut bitmap = Self {
            bytes: vec![0xFF; bitmap_blocks * BLOCK_SIZE],
        };

        let first_free = RESERVED_BLOCKS as usize + bitmap_blocks;
        for block in 0..first_free {
            bitmap.set_free(block, false);
        }
        // a full bitmap tracks 65536 bits, one more than u16 can count
        let tracked = bitmap_blocks * BITS_PER_BLOCK;
        for block in total_blocks as usize..tracked {
            bitmap.set_free(block, false);
        }
        bitmap
    }

    /// Wrap bitmap bytes read from a volume.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// True if `block` is free. Blocks past the end of the bitmap are never free.
    pub fn is_free(&self, block: u16) -> bool {
        self.get_free(block as usize)
    }

    pub fn mark_used(&mut self, block: u16) {
        self.set_free(block as usize, false);
    }

    pub fn mark_free(&mut self, block: u16) {
        self.set_free(block as usize, true);
    }

    /// First-fit search for `count` free blocks below `total_blocks`, in
    /// ascending order. Padding bits past the volume are never handed out.
    ///
    /// Returns `None` if fewer than `count` blocks are free.
    pub fn find_free_blocks(&self, count: usize, total_blocks: u16) -> Option<Vec<u16>> {
        let blocks: Vec<u16> = (0..total_blocks as usize)
            .filter(|&bit| self.get_free(bit))
            .take(count)
            .map(|bit| bit as u16)
            .collect();
        (blocks.len() == count).then_some(blocks)
    }

    /// Free blocks strictly below `total_blocks`.
    pub fn free_block_count(&self, total_blocks: u16) -> usize {
        (0..total_blocks as usize)
            .filter(|&bit| self.get_free(bit))
            .count()
    }

    fn get_free(&self, bit: usize) -> bool {
        self.bytes
            .get(bit / 8)
            .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
    }

    fn set_free(&mut self, bit: usize, free: bool) {
        if let Some(byte) = self.bytes.get_mut(bit / 8) {
            let mask = 0x80 >> (bit % 8);
            if free {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// Byte and block extent of the bitmap for a volume of `total_blocks`.
fn bitmap_extent(total_blocks: u16) -> (usize, usize) {
    let bytes = (total_blocks as usize).div_ceil(8);
    (bytes, bytes.div_ceil(BLOCK_SIZE))
}

/// Read the volume bitmap, truncated to `ceil(total_blocks / 8)` bytes.
pub fn read_volume_bitmap<D: BlockDevice + ?Sized>(device: &D) -> ProdosResult<VolumeBitmap> {
    let header = read_volume_header(device)?;
    let (total_bytes, total_blocks) = bitmap_extent(header.total_blocks);

    let mut bytes = Vec::with_capacity(total_blocks * BLOCK_SIZE);
    for i in 0..total_blocks {
        let block = device.read_block(header.bitmap_start_block + i as u16)?;
        bytes.extend_from_slice(&block);
    }
    bytes.truncate(total_bytes);
    Ok(VolumeBitmap { bytes })
}

/// Write the bitmap back, block by block, starting at the header's bitmap pointer.
pub fn write_volume_bitmap<D: BlockDevice + ?Sized>(
    device: &mut D,
    bitmap: &VolumeBitmap,
) -> ProdosResult<()> {
    let header = read_volume_header(device)?;
    let (total_bytes, total_blocks) = bitmap_extent(header.total_blocks);
    let bytes = &bitmap.bytes[..total_bytes.min(bitmap.bytes.len())];

    for (i, chunk) in bytes.chunks(BLOCK_SIZE).take(total_blocks).enumerate() {
        let address = header.bitmap_start_block + i as u16;
        let mut block = device.read_block(address)?;
        block[..chunk.len()].copy_from_slice(chunk);
        device.write_block(address, &block)?;
    }
    Ok(())
}

/// Claim `count` blocks first-fit and record them as used on the volume.
pub fn allocate_blocks<D: BlockDevice + ?Sized>(
    device: &mut D,
    count: usize,
) -> ProdosResult<Vec<u16>> {
    let header = read_volume_header(device)?;
    let mut bitmap = read_volume_bitmap(device)?;
    let blocks = bitmap
        .find_free_blocks(count, header.total_blocks)
        .ok_or_else(|| ProdosError::NoFreeSpace {
            requested: count,
            available: bitmap.free_block_count(header.total_blocks),
        })?;

    for &block in &blocks {
        bitmap.mark_used(block);
    }
    write_volume_bitmap(device, &bitmap)?;
    debug!("allocated {} blocks starting at {}", count, blocks.first().copied().unwrap_or(0));
    Ok(blocks)
}

/// Return blocks to the free pool. Zero addresses are skipped.
pub fn free_blocks<D: BlockDevice + ?Sized>(device: &mut D, blocks: &[u16]) -> ProdosResult<()> {
    let mut bitmap = read_volume_bitmap(device)?;
    for &block in blocks.iter().filter(|&&b| b != 0) {
        bitmap.mark_free(block);
    }
    write_volume_bitmap(device, &bitmap)?;
    debug!("freed {} blocks", blocks.len());
    Ok(())
}
