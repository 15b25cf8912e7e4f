//! Block geometry planning.
//!
//! Maps a byte range onto a sequence of block-aligned device reads.
//! Nothing in this module performs I/O, so the arithmetic can be verified
//! without a device being present.

use crate::{BlockGeometry, TransferRequest};
use strum::Display;

/// Reason for rejecting a transfer before any I/O takes place.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Reject {
    /// The requested length is zero.
    #[strum(to_string = "length must be greater than zero")]
    ZeroLength,
    /// The requested range does not fit into the 64-bit address space.
    #[strum(to_string = "address range exceeds the addressable space")]
    AddressOverflow,
    /// The block size is zero or larger than [`MAX_BLOCK_SIZE`](crate::MAX_BLOCK_SIZE).
    #[strum(to_string = "block size out of range")]
    InvalidBlockSize,
    /// The block size is not a multiple of the device's native block size.
    #[strum(to_string = "block size is not a multiple of the native block size")]
    MisalignedBlockSize,
    /// The start address lies at or beyond the detected capacity.
    #[strum(to_string = "start address lies beyond the medium capacity")]
    BeyondCapacity,
}

impl core::error::Error for Reject {}

/// Block-aligned layout of a transfer.
///
/// Created by [`plan`]. The block count always covers the requested range
/// and never includes a block that would contribute no bytes.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct BlockPlan {
    /// Index of the first block, in units of the transfer block size.
    pub start_block: u64,
    /// Number of unwanted bytes at the front of the first block.
    pub start_offset: u32,
    /// Number of blocks to read.
    pub block_count: u64,
    block_size: u32,
    length: u64,
}

/// A single block read within a [`BlockPlan`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Chunk {
    /// Absolute block index, in units of the transfer block size.
    pub block: u64,
    /// Number of leading bytes to discard.
    pub skip: usize,
    /// Number of bytes to request from the device, starting at the block boundary.
    pub len: usize,
}

impl Chunk {
    /// Returns the number of bytes this chunk contributes to the output.
    #[must_use]
    pub fn kept(&self) -> usize {
        self.len - self.skip
    }

    /// Returns the absolute byte address of the chunk's block.
    #[must_use]
    pub fn byte_address(&self, block_size: u32) -> u64 {
        self.block * u64::from(block_size)
    }
}

/// Computes the block layout for reading `req` using `geometry`.
///
/// # Errors
///
/// - [`Reject::ZeroLength`] if the requested length is zero.
/// - [`Reject::AddressOverflow`] if the range, or the end of its last block,
///   cannot be represented as a 64-bit address.
pub fn plan(req: TransferRequest, geometry: BlockGeometry) -> Result<BlockPlan, Reject> {
    if req.length == 0 {
        return Err(Reject::ZeroLength);
    }

    req.start_address
        .checked_add(req.length)
        .ok_or(Reject::AddressOverflow)?;

    let block_size = u64::from(geometry.block_size());
    let start_block = req.start_address / block_size;
    let start_offset = req.start_address % block_size;
    let block_count = (start_offset + req.length).div_ceil(block_size);

    // End of the last block must be addressable as well
    start_block
        .checked_add(block_count)
        .and_then(|end| end.checked_mul(block_size))
        .ok_or(Reject::AddressOverflow)?;

    Ok(BlockPlan {
        start_block,
        start_offset: start_offset as u32,
        block_count,
        block_size: geometry.block_size(),
        length: req.length,
    })
}

impl BlockPlan {
    /// Returns the transfer block size the plan was computed for.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Returns the total number of bytes the plan produces.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Computes the read for block `index` with `remaining` bytes still to be written.
    ///
    /// The first block skips the start offset. Every block requests
    /// at most one block size, and no more than is still needed.
    #[must_use]
    pub fn chunk(&self, index: u64, remaining: u64) -> Chunk {
        let skip = if index == 0 { self.start_offset } else { 0 };
        let want = u64::from(self.block_size - skip).min(remaining);

        Chunk {
            block: self.start_block + index,
            skip: skip as usize,
            len: (u64::from(skip) + want) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn geometry(block_size: u32) -> BlockGeometry {
        BlockGeometry::new(block_size).unwrap()
    }

    fn chunks(plan: &BlockPlan) -> Vec<Chunk> {
        let mut remaining = plan.length();

        (0..plan.block_count)
            .map(|index| {
                let chunk = plan.chunk(index, remaining);

                remaining -= chunk.kept() as u64;

                chunk
            })
            .collect()
    }

    #[test]
    fn single_block() {
        let plan = plan(TransferRequest::new(100, 50), geometry(512)).unwrap();

        assert_eq!(plan.start_block, 0, "start block should be correct");
        assert_eq!(plan.start_offset, 100, "start offset should be correct");
        assert_eq!(plan.block_count, 1, "block count should be correct");
        assert_eq!(
            chunks(&plan),
            [Chunk {
                block: 0,
                skip: 100,
                len: 150
            }],
            "chunks should be correct"
        );
    }

    #[test]
    fn multiple_blocks() {
        let plan = plan(TransferRequest::new(500, 1000), geometry(512)).unwrap();

        assert_eq!(plan.start_block, 0, "start block should be correct");
        assert_eq!(plan.start_offset, 500, "start offset should be correct");
        assert_eq!(plan.block_count, 3, "block count should be correct");

        let chunks = chunks(&plan);
        let kept: Vec<_> = chunks.iter().map(Chunk::kept).collect();

        assert_eq!(kept, [12, 512, 476], "kept bytes should be correct");
        assert_eq!(chunks[2].len, 476, "last block should not over-read");
    }

    #[test]
    fn aligned_exact_fit() {
        let plan = plan(TransferRequest::new(0x400, 0x600), geometry(512)).unwrap();

        assert_eq!(plan.start_block, 2, "start block should be correct");
        assert_eq!(plan.start_offset, 0, "start offset should be zero");
        assert!(
            chunks(&plan).iter().all(|c| c.skip == 0 && c.len == 512),
            "every block should be read in full without trimming"
        );
    }

    #[test]
    fn block_count_bounds() {
        for block_size in [1, 512, 4096] {
            for start in [0, 1, 511, 512, 4095, 10_000] {
                for length in [1, 2, 511, 512, 513, 4096, 9_999] {
                    let plan = plan(TransferRequest::new(start, length), geometry(block_size))
                        .unwrap();
                    let span = u64::from(plan.start_offset) + length;
                    let size = u64::from(block_size);

                    assert!(
                        plan.block_count * size >= span,
                        "blocks should cover the range"
                    );
                    assert!(
                        (plan.block_count - 1) * size < span,
                        "last block should contribute bytes"
                    );
                    assert_eq!(
                        chunks(&plan).iter().map(|c| c.kept() as u64).sum::<u64>(),
                        length,
                        "chunks should add up to the requested length"
                    );
                }
            }
        }
    }

    #[test]
    fn end_of_address_space() {
        let plan = plan(TransferRequest::new(u64::MAX - 1023, 512), geometry(512)).unwrap();

        assert_eq!(plan.block_count, 1, "block count should be correct");
        assert_eq!(
            plan.chunk(0, 512).byte_address(512),
            u64::MAX - 1023,
            "byte address should be correct"
        );
    }

    #[test]
    fn error_zero_length() {
        assert_eq!(
            plan(TransferRequest::new(0x200, 0), geometry(512)),
            Err(Reject::ZeroLength),
            "result should be zero length rejection"
        );
    }

    #[test]
    fn error_address_overflow() {
        assert_eq!(
            plan(TransferRequest::new(u64::MAX, 2), geometry(512)),
            Err(Reject::AddressOverflow),
            "result should be address overflow rejection"
        );
        assert_eq!(
            plan(TransferRequest::new(u64::MAX - 10, 5), geometry(512)),
            Err(Reject::AddressOverflow),
            "result should be address overflow rejection for the last block"
        );
    }
}
