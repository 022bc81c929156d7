//! Byte sources the archive is read from.
//!
//! The engine only needs two capabilities: seek to an absolute position and
//! read some bytes. [`ByteSource`] captures that; [`ReaderSource`] adapts any
//! `Read + Seek` value (files, cursors) and [`MemorySource`] serves an
//! in-memory archive.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::{Error, Result};

/// A seekable, readable archive input.
pub trait ByteSource {
    /// Moves to `position` bytes from the start of the archive.
    fn seek(&mut self, position: u64) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes, returning how many were read.
    ///
    /// Returning `0` for a non-empty `buf` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns the total length of the source.
    fn len(&mut self) -> io::Result<u64>;

    /// Returns `true` if the source holds no bytes.
    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Seeks to `position` and fills `buf` completely.
///
/// End of stream before `buf` is full is reported as [`Error::Truncated`].
pub fn read_exact_at<S: ByteSource + ?Sized>(
    source: &mut S,
    position: u64,
    buf: &mut [u8],
) -> Result<()> {
    source.seek(position)?;
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::Truncated {
                    offset: position + filled as u64,
                    needed: (buf.len() - filled) as u64,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

/// Adapts any `Read + Seek` value.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl ReaderSource<BufReader<File>> {
    /// Opens a file on disk.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn seek(&mut self, position: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(position)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        let current = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(current))?;
        Ok(end)
    }
}

/// An archive held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    /// Wraps an owned byte buffer.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn seek(&mut self, position: u64) -> io::Result<()> {
        // Seeking past the end is allowed; reads there return 0.
        self.position = usize::try_from(position).unwrap_or(usize::MAX);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.get(self.position..).unwrap_or(&[]);
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}
