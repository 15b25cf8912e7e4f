//! Native file and device support.
//!
//! Uses [`tokio`](https://crates.io/crates/tokio) files adapted through
//! [`embedded-io-adapters`](https://crates.io/crates/embedded-io-adapters), so the
//! same [`ImageDevice`] works with card images and block device nodes such as
//! `/dev/mmcblk0`.

extern crate std;

use crate::device::{Addressing, BlockDevice, image::ImageDevice};
use core::{
    fmt::{Debug, Display, Formatter},
    time::Duration,
};
use embedded_io_adapters::tokio_1::FromTokio;
use std::{boxed::Box, io, path::Path};
use tokio::{
    fs::{File, OpenOptions},
    time,
};

/// Tokio file implementing the [`embedded_io_async`] traits.
pub type NativeFile = FromTokio<File>;

/// Image device backed by a [`NativeFile`].
pub type NativeImage = ImageDevice<NativeFile>;

/// Opens a card image or block device node for reading.
pub async fn open_image(path: impl AsRef<Path>) -> io::Result<NativeImage> {
    let file = File::open(path).await?;

    Ok(ImageDevice::new(FromTokio::new(file)))
}

/// Opens a dump file for writing.
///
/// Without `resume`, an existing file is truncated.
/// With `resume`, new data is appended and the returned length
/// tells how many bytes were already dumped.
pub async fn create_dump(path: impl AsRef<Path>, resume: bool) -> io::Result<(NativeFile, u64)> {
    let mut opts = OpenOptions::new();

    if resume {
        opts.create(true).append(true);
    } else {
        opts.create(true).write(true).truncate(true);
    }

    let file = opts.open(path).await?;
    let len = if resume { file.metadata().await?.len() } else { 0 };

    Ok((FromTokio::new(file), len))
}

/// Error type for [`Timeout`] operations.
#[derive(PartialEq, Eq, Debug)]
pub enum TimeoutError<E> {
    /// The device did not respond in time.
    Elapsed,
    /// Device-specific error.
    Device(E),
}

impl<E: Display> Display for TimeoutError<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Elapsed => write!(f, "device timed out"),
            Self::Device(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Debug + Display> core::error::Error for TimeoutError<E> {}

/// Block device wrapper bounding every operation by a deadline.
#[derive(Debug)]
pub struct Timeout<D> {
    device: D,
    limit: Duration,
}

impl<D> Timeout<D> {
    /// Wraps a device, applying `limit` to every block read and capacity query.
    pub fn new(device: D, limit: Duration) -> Self {
        Self { device, limit }
    }

    /// Returns the wrapped device.
    pub fn into_inner(self) -> D {
        self.device
    }
}

#[async_trait::async_trait(?Send)]
impl<D: BlockDevice> BlockDevice for Timeout<D> {
    type Error = TimeoutError<D::Error>;

    fn addressing(&self) -> Addressing {
        self.device.addressing()
    }

    fn native_block_size(&self) -> u32 {
        self.device.native_block_size()
    }

    async fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        time::timeout(self.limit, self.device.read_block(addr, buf))
            .await
            .map_err(|_| TimeoutError::Elapsed)?
            .map_err(TimeoutError::Device)
    }

    async fn detect_capacity(&mut self) -> Result<u64, Self::Error> {
        time::timeout(self.limit, self.device.detect_capacity())
            .await
            .map_err(|_| TimeoutError::Elapsed)?
            .map_err(TimeoutError::Device)
    }
}
