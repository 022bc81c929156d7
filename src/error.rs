//! Error types for 7z decoding.
//!
//! This module provides the [`Error`] enum which represents every way opening
//! or extracting an archive can fail, along with a convenient [`Result<T>`]
//! type alias.
//!
//! Every parsing and decoding function returns on the first error. No partial
//! catalog is ever handed out and no best-effort decode is attempted, so a
//! damaged solid block never yields wrong bytes for the files that share it.
//!
//! # Example
//!
//! ```rust
//! use sevenz_decode::{Archive, Error, MemorySource};
//!
//! match Archive::open(MemorySource::new(b"not an archive".to_vec())) {
//!     Err(Error::InvalidArchive(msg)) => println!("rejected: {}", msg),
//!     Err(e) if e.is_corruption() => println!("damaged archive: {}", e),
//!     Err(e) => println!("other failure: {}", e),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use std::fmt;
use std::io;

/// Identifies which checksum failed in a [`Error::CrcMismatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrcScope {
    /// The 20-byte record that follows the signature.
    StartHeader,
    /// The header block located through the start header.
    Header,
    /// The unpacked bytes of a folder (solid block).
    Folder(usize),
    /// A single file's byte range inside its folder.
    Entry {
        /// Index of the file in archive order.
        index: usize,
        /// Name of the file.
        name: String,
    },
}

impl fmt::Display for CrcScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcScope::StartHeader => write!(f, "start header"),
            CrcScope::Header => write!(f, "header"),
            CrcScope::Folder(index) => write!(f, "folder {}", index),
            CrcScope::Entry { index, name } => write!(f, "entry {} ({})", index, name),
        }
    }
}

/// The error type for 7z decoding.
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | I/O | [`Io`][Self::Io] | Byte source failures |
/// | Structure | [`Truncated`][Self::Truncated], [`InvalidArchive`][Self::InvalidArchive], [`ValueTooLarge`][Self::ValueTooLarge] | Malformed header data |
/// | Decoding | [`DataError`][Self::DataError] | Corrupt compressed streams |
/// | Integrity | [`CrcMismatch`][Self::CrcMismatch] | Corrupt source bytes that decoded cleanly |
/// | Compatibility | [`UnsupportedFolder`][Self::UnsupportedFolder], [`UnsupportedMethod`][Self::UnsupportedMethod] | Coder graphs this engine does not run |
/// | Resources | [`OutOfMemory`][Self::OutOfMemory], [`ResourceLimitExceeded`][Self::ResourceLimitExceeded] | Allocator refusal, configured limits |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The byte source failed to seek or read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A structure ended before all of its bytes were available.
    ///
    /// Raised by the byte cursor when a read runs past the end of its region
    /// and by the byte source when it reports end-of-stream early.
    #[error("truncated data at offset {offset:#x}: {needed} more byte(s) required")]
    Truncated {
        /// Position at which the read was attempted.
        offset: u64,
        /// Number of bytes that were still required.
        needed: u64,
    },

    /// The archive is structurally invalid.
    ///
    /// Covers a bad signature, a missing expected tag, a malformed UTF-16
    /// name, inconsistent stream counts, and similar well-bounded problems.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// A number read from the header does not fit the range its consumer needs.
    #[error("value {value:#x} is too large")]
    ValueTooLarge {
        /// The decoded value.
        value: u64,
    },

    /// A coder failed to produce the expected output.
    #[error("data error: {0}")]
    DataError(String),

    /// Decoded bytes do not match a declared checksum.
    #[error("CRC mismatch for {scope}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// What the checksum covers.
        scope: CrcScope,
        /// The checksum stored in the archive.
        expected: u32,
        /// The checksum of the bytes actually decoded.
        actual: u32,
    },

    /// The folder's coder graph is not one of the supported shapes.
    #[error("unsupported folder: {reason}")]
    UnsupportedFolder {
        /// Which part of the graph was rejected.
        reason: &'static str,
    },

    /// A coder uses a method this engine cannot decode.
    ///
    /// Method IDs are shown in their big-endian numeric form, e.g. `0x30101`
    /// for LZMA or `0x21` for LZMA2.
    #[error("unsupported method: {method_id:#x}")]
    UnsupportedMethod {
        /// The method ID that is not supported.
        method_id: u64,
    },

    /// An allocator declined to provide a buffer.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Size of the refused allocation.
        requested: usize,
    },

    /// A configured resource limit was exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// `extract` was called with an index past the end of the file list.
    #[error("file index {index} out of range (archive has {count} files)")]
    FileIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of files in the archive.
        count: usize,
    },
}

impl Error {
    /// Returns `true` if the archive bytes themselves are damaged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sevenz_decode::Error;
    ///
    /// let err = Error::DataError("range decoder ran dry".into());
    /// assert!(err.is_corruption());
    /// ```
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. }
                | Error::InvalidArchive(_)
                | Error::ValueTooLarge { .. }
                | Error::DataError(_)
                | Error::CrcMismatch { .. }
        )
    }

    /// Returns `true` if the archive is valid but uses something this engine
    /// does not decode.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFolder { .. } | Error::UnsupportedMethod { .. }
        )
    }

    /// Creates a [`Error::CrcMismatch`].
    pub fn crc_mismatch(scope: CrcScope, expected: u32, actual: u32) -> Self {
        Error::CrcMismatch {
            scope,
            expected,
            actual,
        }
    }

    /// Creates a [`Error::Truncated`] for a read of `needed` bytes at `offset`.
    pub fn truncated(offset: usize, needed: usize) -> Self {
        Error::Truncated {
            offset: offset as u64,
            needed: needed as u64,
        }
    }
}

/// A specialized Result type for 7z decoding.
pub type Result<T> = std::result::Result<T, Error>;
