//! Dump memory card contents through block-oriented transports.
//!
//! # Overview
//!
//! Memory card bridges such as an MCI (Memory Card Interface) adapter only
//! transfer whole blocks, usually 512 bytes at a time. The `mcidump` crate
//! turns an arbitrary byte range into a sequence of such block reads,
//! trims the unwanted head of the first block and the tail of the last one,
//! and streams exactly the requested bytes to a sink in address order.
//! Only a single block buffer is held in memory, regardless of the transfer size.
//!
//! The crate is `no_std` and platform-agnostic:
//!
//! - Implement [`device::BlockDevice`] for your transport, or use
//!   [`device::image::ImageDevice`] for seekable sources.
//! - Use [`ChunkedRangeReader`] to copy a [`TransferRequest`] into any
//!   [`embedded_io_async::Write`] sink.
//! - The [`plan`] module exposes the block arithmetic on its own.
//!
//! If you enable the `native` feature, the [`native`] module opens card
//! images, block device nodes and dump files through tokio, and the
//! `mci_read` binary provides a command-line front end.
//!
//! # Examples
//!
//! ```no_run
//! use mcidump::{ChunkedRangeReader, TransferRequest, device::image::{ImageDevice, ImageError}};
//! use mcidump::embedded_io_async::{Read, Seek};
//!
//! # async fn example<F: Read + Seek>(source: F) -> mcidump::Result<(), ImageError<F::Error>, core::convert::Infallible> {
//! let mut reader = ChunkedRangeReader::new(ImageDevice::new(source));
//! let mut dump = Vec::new();
//!
//! reader
//!     .read(TransferRequest::new(0x200, 0x1000), &mut dump, &mut |done: u64, total: u64| {
//!         println!("Read {done} of {total} bytes");
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Transfer model
//!
//! Every transfer is strictly sequential: one block is read from the device,
//! then written to the sink, before the next block is requested.
//! Errors abort the transfer at the current block. Bytes already written are
//! not rolled back, but the sink is always flushed before returning.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod device;
pub mod plan;

#[cfg(feature = "native")]
#[cfg_attr(docsrs, doc(cfg(feature = "native")))]
pub mod native;

pub use embedded_io_async;

use crate::{
    device::{Addressing, BlockDevice},
    plan::{BlockPlan, Reject},
};
use alloc::{sync::Arc, vec};
use core::{
    fmt::{Debug, Display, Formatter},
    sync::atomic::{AtomicBool, Ordering},
};
use embedded_io_async::Write;
use log::{debug, trace};

/// Default transfer block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Largest supported transfer block size in bytes.
pub const MAX_BLOCK_SIZE: u32 = 4096;

/// A specialized [`Result`] type for [`ChunkedRangeReader`] operations.
///
/// Uses [`Error<D, S>`] as the error variant.
pub type Result<T, D, S = D> = core::result::Result<T, Error<D, S>>;

/// Error type for [`ChunkedRangeReader`] operations.
///
/// The generic parameter `D` carries the device-specific error,
/// `S` carries the sink-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<D, S = D> {
    /// The request was rejected before any I/O took place.
    InvalidRequest(Reject),
    /// The capacity of the medium could not be detected.
    CapacityDetectionFailed(D),
    /// Reading a block from the device failed.
    Transport(D),
    /// Writing to or flushing the sink failed.
    Sink(S),
    /// The block loop ended with bytes left over.
    GeometryInvariant {
        /// Number of bytes that were never written.
        remaining: u64,
    },
    /// The transfer was cancelled through the cancellation flag.
    Cancelled,
}

impl<D: Display, S: Display> Display for Error<D, S> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            Self::CapacityDetectionFailed(err) => write!(f, "capacity unavailable: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Sink(err) => write!(f, "sink error: {err}"),
            Self::GeometryInvariant { remaining } => {
                write!(f, "geometry invariant violated: {remaining} bytes left over")
            }
            Self::Cancelled => write!(f, "transfer cancelled"),
        }
    }
}

impl<D: Debug + Display, S: Debug + Display> core::error::Error for Error<D, S> {}

impl<D, S> From<Reject> for Error<D, S> {
    fn from(reason: Reject) -> Self {
        Self::InvalidRequest(reason)
    }
}

/// A byte range to be read from the medium.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct TransferRequest {
    /// Byte address of the first byte.
    pub start_address: u64,
    /// Number of bytes to read. Must be non-zero.
    pub length: u64,
}

impl TransferRequest {
    /// Constructs a new transfer request.
    #[must_use]
    pub const fn new(start_address: u64, length: u64) -> Self {
        Self {
            start_address,
            length,
        }
    }
}

/// Transfer block size used by a [`ChunkedRangeReader`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct BlockGeometry {
    block_size: u32,
}

impl BlockGeometry {
    /// Constructs a geometry with the given transfer block size.
    ///
    /// # Errors
    ///
    /// - [`Reject::InvalidBlockSize`] if the size is zero or exceeds [`MAX_BLOCK_SIZE`].
    pub const fn new(block_size: u32) -> core::result::Result<Self, Reject> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(Reject::InvalidBlockSize);
        }

        Ok(Self { block_size })
    }

    /// Returns the transfer block size in bytes.
    #[must_use]
    pub const fn block_size(self) -> u32 {
        self.block_size
    }
}

impl Default for BlockGeometry {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Observer for transfer progress.
///
/// Called after every block written to the sink. Implemented for all
/// closures taking `(bytes_done, bytes_total)`.
pub trait Progress {
    /// Reports that `done` of `total` bytes have been written.
    fn update(&mut self, done: u64, total: u64);
}

impl<F: FnMut(u64, u64)> Progress for F {
    fn update(&mut self, done: u64, total: u64) {
        self(done, total);
    }
}

/// Transfer state of a [`ChunkedRangeReader`].
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum State {
    /// No transfer has been started yet.
    Idle,
    /// The request is being validated and mapped onto blocks.
    ComputingGeometry,
    /// The block with the given index (relative to the transfer) is being read.
    Reading(u64),
    /// The last transfer completed successfully.
    Done,
    /// The last transfer failed.
    Failed,
}

/// Reads byte ranges from a [`BlockDevice`] one block at a time.
///
/// The reader owns its device for its whole lifetime,
/// but every transfer is independent of the previous one.
///
/// # Examples
///
/// ```no_run
/// # use mcidump::{ChunkedRangeReader, BlockGeometry, device::BlockDevice};
/// # async fn example<D: BlockDevice>(dev: D) -> mcidump::Result<(), D::Error, core::convert::Infallible> {
/// let geometry = BlockGeometry::new(4096)?;
/// let mut reader = ChunkedRangeReader::with_geometry(dev, geometry);
/// let mut dump = Vec::new();
///
/// reader.read_to_end(0x0000, &mut dump, &mut |_: u64, _: u64| {}).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkedRangeReader<D> {
    device: D,
    geometry: BlockGeometry,
    cancel: Option<Arc<AtomicBool>>,
    state: State,
}

impl<D: BlockDevice> ChunkedRangeReader<D> {
    /// Constructs a reader using the default block size of 512 bytes.
    pub fn new(device: D) -> Self {
        Self::with_geometry(device, BlockGeometry::default())
    }

    /// Constructs a reader using the given geometry.
    ///
    /// The block size must be a multiple of the device's native block size,
    /// which is checked when a transfer is started.
    pub fn with_geometry(device: D, geometry: BlockGeometry) -> Self {
        Self {
            device,
            geometry,
            cancel: None,
            state: State::Idle,
        }
    }

    /// Attaches a cancellation flag.
    ///
    /// The flag is checked once per block. Once set, the running
    /// transfer fails with [`Error::Cancelled`] before the next block is read.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Returns the configured geometry.
    pub fn geometry(&self) -> BlockGeometry {
        self.geometry
    }

    /// Returns the state of the current or last transfer.
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the underlying device.
    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consumes the reader, returning the underlying device.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Reads the requested byte range and writes it to `sink`.
    ///
    /// Returns the number of bytes written, which always equals the requested length.
    /// The sink is flushed on success and on every error raised after validation.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the request or geometry is invalid.
    ///   Neither the device nor the sink is touched in that case.
    /// - [`Error::Transport`] if a block read fails. No further block is read.
    /// - [`Error::Sink`] if writing to or flushing the sink fails.
    /// - [`Error::Cancelled`] if the cancellation flag was set.
    pub async fn read<W, P>(
        &mut self,
        req: TransferRequest,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<u64, D::Error, W::Error>
    where
        W: Write,
        P: Progress + ?Sized,
    {
        self.state = State::ComputingGeometry;

        let plan = match self.prepare(req) {
            Ok(plan) => plan,
            Err(reason) => {
                self.state = State::Failed;
                return Err(reason.into());
            }
        };

        let res = self.transfer(&plan, sink, progress).await;

        // Flush even after a failed transfer, keeping the first error
        let res = match (res, sink.flush().await) {
            (Ok(written), Ok(())) => Ok(written),
            (Ok(_), Err(err)) => Err(Error::Sink(err)),
            (Err(err), _) => Err(err),
        };

        self.state = if res.is_ok() {
            State::Done
        } else {
            State::Failed
        };
        debug!("Transfer finished: {}", self.state);

        res
    }

    /// Reads from `start_address` up to the end of the medium.
    ///
    /// The length is derived from [`BlockDevice::detect_capacity`].
    ///
    /// # Errors
    ///
    /// - [`Error::CapacityDetectionFailed`] if the capacity cannot be detected.
    ///   No block is read in that case.
    /// - [`Error::InvalidRequest`] if `start_address` lies at or beyond the capacity.
    /// - Any error returned by [`ChunkedRangeReader::read`].
    pub async fn read_to_end<W, P>(
        &mut self,
        start_address: u64,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<u64, D::Error, W::Error>
    where
        W: Write,
        P: Progress + ?Sized,
    {
        self.state = State::ComputingGeometry;

        let capacity = match self.device.detect_capacity().await {
            Ok(capacity) => capacity,
            Err(err) => {
                self.state = State::Failed;
                return Err(Error::CapacityDetectionFailed(err));
            }
        };

        debug!("Detected capacity: {capacity} bytes");

        let Some(length) = capacity.checked_sub(start_address).filter(|&len| len > 0) else {
            self.state = State::Failed;
            return Err(Reject::BeyondCapacity.into());
        };

        self.read(TransferRequest::new(start_address, length), sink, progress)
            .await
    }

    /// Validates the request against the geometry and device.
    fn prepare(&self, req: TransferRequest) -> core::result::Result<BlockPlan, Reject> {
        let native = self.device.native_block_size();

        if native == 0 || self.geometry.block_size() % native != 0 {
            return Err(Reject::MisalignedBlockSize);
        }

        let plan = plan::plan(req, self.geometry)?;

        debug!("Planned transfer: {plan:?}");

        Ok(plan)
    }

    /// Runs the block loop of a validated plan.
    async fn transfer<W, P>(
        &mut self,
        plan: &BlockPlan,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<u64, D::Error, W::Error>
    where
        W: Write,
        P: Progress + ?Sized,
    {
        let total = plan.length();
        let native = u64::from(self.device.native_block_size());
        let addressing = self.device.addressing();
        let mut buf = vec![0x00; plan.block_size() as usize];
        let mut remaining = total;

        for index in 0..plan.block_count {
            if self
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                return Err(Error::Cancelled);
            }

            self.state = State::Reading(index);

            let chunk = plan.chunk(index, remaining);
            let addr = match addressing {
                Addressing::Byte => chunk.byte_address(plan.block_size()),
                Addressing::Block => chunk.byte_address(plan.block_size()) / native,
            };
            let data = &mut buf[..chunk.len];

            trace!("Reading {} bytes at {addressing} address {addr:#x}", chunk.len);
            self.device
                .read_block(addr, data)
                .await
                .map_err(Error::Transport)?;
            sink.write_all(&data[chunk.skip..])
                .await
                .map_err(Error::Sink)?;

            remaining -= chunk.kept() as u64;
            progress.update(total - remaining, total);
        }

        if remaining != 0 {
            return Err(Error::GeometryInvariant { remaining });
        }

        Ok(total)
    }
}
