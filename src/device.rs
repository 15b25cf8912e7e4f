//! Block-oriented device abstraction.
//!
//! A [`BlockDevice`] is the only capability the [`ChunkedRangeReader`](crate::ChunkedRangeReader)
//! needs from a transport: reading whole blocks and reporting the medium's capacity.
//! Memory card bridges, card readers and card images all fit behind it.
//!
//! The [`image`] module provides an implementation for seekable byte sources.

pub mod image;

use crate::DEFAULT_BLOCK_SIZE;
use alloc::boxed::Box;
use strum::Display;

/// Address convention used by [`BlockDevice::read_block`].
///
/// Fixed for each device implementation.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum Addressing {
    /// Addresses are block indices in units of the native block size.
    Block,
    /// Addresses are absolute byte offsets.
    Byte,
}

/// A medium that can be read in whole blocks.
///
/// Implementations are expected to either fill the provided buffer completely
/// or fail. Short transfers, timeouts and disconnects are all reported as
/// [`BlockDevice::Error`]; the reader never retries.
#[async_trait::async_trait(?Send)]
pub trait BlockDevice {
    /// Device-specific error type.
    type Error;

    /// Returns the address convention of the device.
    fn addressing(&self) -> Addressing;

    /// Returns the native block size of the device in bytes.
    ///
    /// Transfer block sizes must be a multiple of this value.
    fn native_block_size(&self) -> u32 {
        DEFAULT_BLOCK_SIZE
    }

    /// Reads `buf.len()` bytes starting at the block with address `addr`.
    ///
    /// The buffer never exceeds the configured transfer block size,
    /// but may be shorter for the last block of a transfer.
    async fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Detects the capacity of the medium in bytes.
    async fn detect_capacity(&mut self) -> Result<u64, Self::Error>;
}
