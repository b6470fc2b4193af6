//! The byte-addressable backend a [`Filesystem`](crate::fs::Filesystem) reads and writes
//! through.
//!
//! JEEFS doesn't care whether the bytes live in a memory-mapped buffer or a POSIX file opened
//! over the real EEPROM device node; both are equally valid as long as they satisfy
//! [`ImageBackend`]. Two reference implementations are provided: [`MemoryImage`] for tests and
//! host tooling, and [`FileImage`] for the common embedded-Linux case of an EEPROM exposed as a
//! fixed-size device file.

#[cfg(feature = "std")]
use std::path::Path;

use snafu::prelude::*;

#[cfg(not(feature = "std"))]
use crate::no_std::*;

/// Error conditions for reading/writing through an image backend.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown when `offset + buf.len()` exceeds the backend's reported size.
    #[snafu(display("Out of bounds access: offset {offset} + {length} > size {size}!"))]
    OutOfBounds { offset: u16, length: usize, size: u16 },
    /// Thrown when the underlying file I/O fails.
    #[cfg(feature = "std")]
    #[snafu(display("EEPROM backend I/O error!"))]
    Io { source: std::io::Error },
}
type Result<T> = core::result::Result<T, Error>;

/// The byte-level contract a JEEFS image backend must satisfy.
///
/// `size` is fixed for the lifetime of the backend; images larger than `u16::MAX` bytes are not
/// representable since every on-image offset is a 16-bit value.
pub trait ImageBackend {
    /// Total capacity of the image, in bytes.
    fn size(&self) -> u16;

    /// Reads `buf.len()` bytes starting at `offset` into `buf`, returning the number of bytes
    /// read.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`](Error::OutOfBounds) if `offset + buf.len() > self.size()`.
    fn read(&mut self, buf: &mut [u8], offset: u16) -> Result<usize>;

    /// Writes `buf` to the image starting at `offset`, returning the number of bytes written.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`](Error::OutOfBounds) if `offset + buf.len() > self.size()`.
    fn write(&mut self, buf: &[u8], offset: u16) -> Result<usize>;
}

/// An in-memory image backend, for tests and for host-side tooling that works against a
/// snapshot of the EEPROM contents rather than the device itself.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    data: Box<[u8]>,
}

impl MemoryImage {
    /// Creates a new image of exactly `size` zeroed bytes.
    #[must_use]
    #[inline]
    pub fn new(size: u16) -> Self {
        Self { data: vec![0u8; usize::from(size)].into_boxed_slice() }
    }

    /// Wraps existing bytes as an image. The image size is `data.len()`, truncated to
    /// [`u16::MAX`].
    #[must_use]
    #[inline]
    pub fn from_bytes<I: Into<Box<[u8]>>>(data: I) -> Self {
        Self { data: data.into() }
    }

    /// Returns the raw image bytes.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes this image, returning the raw bytes.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> Box<[u8]> {
        self.data
    }
}

impl ImageBackend for MemoryImage {
    #[inline]
    fn size(&self) -> u16 {
        self.data.len() as u16
    }

    #[inline]
    fn read(&mut self, buf: &mut [u8], offset: u16) -> Result<usize> {
        let offset = usize::from(offset);
        ensure!(
            offset + buf.len() <= self.data.len(),
            OutOfBoundsSnafu { offset: offset as u16, length: buf.len(), size: self.size() }
        );
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(buf.len())
    }

    #[inline]
    fn write(&mut self, buf: &[u8], offset: u16) -> Result<usize> {
        let offset = usize::from(offset);
        ensure!(
            offset + buf.len() <= self.data.len(),
            OutOfBoundsSnafu { offset: offset as u16, length: buf.len(), size: self.size() }
        );
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}

/// A POSIX file backend, opened read-write over a file whose length equals the EEPROM's
/// capacity. Grounded in the reference `eeprom_open`/`eeprom_read`/`eeprom_write` contract: the
/// file's own length is trusted as the image size and is never extended.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct FileImage {
    file: std::fs::File,
    size: u16,
}

#[cfg(feature = "std")]
impl FileImage {
    /// Opens `path` read-write and uses its current length as the image size.
    ///
    /// # Errors
    /// Returns [`Io`](Error::Io) if the file can't be opened or its metadata can't be read, or
    /// if the file is larger than [`u16::MAX`] bytes.
    #[inline]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path).context(IoSnafu)?;
        let metadata = file.metadata().context(IoSnafu)?;
        let size = u16::try_from(metadata.len()).unwrap_or(u16::MAX);
        Ok(Self { file, size })
    }
}

#[cfg(feature = "std")]
impl ImageBackend for FileImage {
    #[inline]
    fn size(&self) -> u16 {
        self.size
    }

    #[inline]
    fn read(&mut self, buf: &mut [u8], offset: u16) -> Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        ensure!(
            usize::from(offset) + buf.len() <= usize::from(self.size),
            OutOfBoundsSnafu { offset, length: buf.len(), size: self.size }
        );
        self.file.seek(SeekFrom::Start(u64::from(offset))).context(IoSnafu)?;
        self.file.read_exact(buf).context(IoSnafu)?;
        Ok(buf.len())
    }

    #[inline]
    fn write(&mut self, buf: &[u8], offset: u16) -> Result<usize> {
        use std::io::{Seek, SeekFrom, Write};
        ensure!(
            usize::from(offset) + buf.len() <= usize::from(self.size),
            OutOfBoundsSnafu { offset, length: buf.len(), size: self.size }
        );
        self.file.seek(SeekFrom::Start(u64::from(offset))).context(IoSnafu)?;
        self.file.write_all(buf).context(IoSnafu)?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_image_round_trips() {
        let mut image = MemoryImage::new(64);
        image.write(b"hello", 10).unwrap();
        let mut buf = [0u8; 5];
        image.read(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn memory_image_rejects_out_of_bounds() {
        let mut image = MemoryImage::new(8);
        let mut buf = [0u8; 4];
        assert!(matches!(image.read(&mut buf, 6), Err(Error::OutOfBounds { .. })));
    }
}
