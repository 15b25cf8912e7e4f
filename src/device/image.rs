//! Card image device.
//!
//! Exposes any seekable byte source, such as a dumped card image or a
//! card reader's block device node, as a byte-addressed [`BlockDevice`].

use crate::device::{Addressing, BlockDevice};
use alloc::boxed::Box;
use core::fmt::{Debug, Display, Formatter};
use embedded_io_async::{Read, ReadExactError, Seek, SeekFrom};
use log::trace;

/// Error type for [`ImageDevice`] operations.
///
/// The generic parameter `E` carries the source-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum ImageError<E> {
    /// The source ended before the requested block was complete.
    UnexpectedEof,
    /// A source-specific input/output error.
    Io(E),
}

impl<E: Display> Display for ImageError<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end-of-file"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: Debug + Display> core::error::Error for ImageError<E> {}

impl<E> From<E> for ImageError<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

impl<E> From<ReadExactError<E>> for ImageError<E> {
    fn from(err: ReadExactError<E>) -> Self {
        match err {
            ReadExactError::UnexpectedEof => Self::UnexpectedEof,
            ReadExactError::Other(err) => Self::Io(err),
        }
    }
}

/// Byte-addressed block device backed by a seekable source.
///
/// The capacity equals the length of the source.
#[derive(Debug)]
pub struct ImageDevice<F> {
    source: F,
}

impl<F> ImageDevice<F> {
    /// Wraps a seekable source.
    pub fn new(source: F) -> Self {
        Self { source }
    }

    /// Returns the wrapped source.
    pub fn into_inner(self) -> F {
        self.source
    }
}

#[async_trait::async_trait(?Send)]
impl<F: Read + Seek> BlockDevice for ImageDevice<F> {
    type Error = ImageError<F::Error>;

    fn addressing(&self) -> Addressing {
        Addressing::Byte
    }

    async fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.source.seek(SeekFrom::Start(addr)).await?;
        self.source.read_exact(buf).await?;
        trace!("Read {} bytes from image at {addr:#x}", buf.len());

        Ok(())
    }

    async fn detect_capacity(&mut self) -> Result<u64, Self::Error> {
        Ok(self.source.seek(SeekFrom::End(0)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkedRangeReader, TransferRequest, tests::init_logger};
    use alloc::vec::Vec;
    use core::convert::Infallible;
    use embedded_io_async::ErrorType;

    struct Cursor {
        data: Vec<u8>,
        pos: u64,
    }

    impl Cursor {
        fn new(len: usize) -> Self {
            Self {
                data: (0..len).map(|i| (i % 251) as u8).collect(),
                pos: 0,
            }
        }
    }

    impl ErrorType for Cursor {
        type Error = Infallible;
    }

    impl Read for Cursor {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let start = (self.pos as usize).min(self.data.len());
            let len = buf.len().min(self.data.len() - start);

            buf[..len].copy_from_slice(&self.data[start..start + len]);
            self.pos += len as u64;

            Ok(len)
        }
    }

    impl Seek for Cursor {
        async fn seek(&mut self, pos: SeekFrom) -> Result<u64, Infallible> {
            self.pos = match pos {
                SeekFrom::Start(off) => off,
                SeekFrom::End(off) => (self.data.len() as u64).saturating_add_signed(off),
                SeekFrom::Current(off) => self.pos.saturating_add_signed(off),
            };

            Ok(self.pos)
        }
    }

    #[tokio::test]
    async fn read_block() -> Result<(), ImageError<Infallible>> {
        init_logger();

        let mut dev = ImageDevice::new(Cursor::new(2048));
        let mut buf = [0x00; 4];

        dev.read_block(0x200, &mut buf).await?;

        assert_eq!(
            buf,
            [0x0a, 0x0b, 0x0c, 0x0d],
            "block contents should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn detect_capacity() -> Result<(), ImageError<Infallible>> {
        init_logger();

        let mut dev = ImageDevice::new(Cursor::new(3000));

        assert_eq!(
            dev.detect_capacity().await?,
            3000,
            "capacity should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn read_range() -> crate::Result<(), ImageError<Infallible>, Infallible> {
        init_logger();

        let cursor = Cursor::new(4096);
        let expected = cursor.data[1000..3100].to_vec();
        let mut reader = ChunkedRangeReader::new(ImageDevice::new(cursor));
        let mut out = Vec::new();
        let written = reader
            .read(TransferRequest::new(1000, 2100), &mut out, &mut |_: u64, _: u64| {})
            .await?;

        assert_eq!(written, 2100, "written length should be correct");
        assert_eq!(out, expected, "image contents should be correct");

        Ok(())
    }

    #[tokio::test]
    async fn error_unexpected_eof() {
        init_logger();

        let mut dev = ImageDevice::new(Cursor::new(600));
        let mut buf = [0x00; 512];
        let res = dev.read_block(0x200, &mut buf).await;

        assert_eq!(
            res.unwrap_err(),
            ImageError::UnexpectedEof,
            "result should be unexpected end-of-file error"
        );
    }
}
