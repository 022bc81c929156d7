//! Coders used by the supported folder shapes.
//!
//! Every coder here works on fully buffered slices: the folder pipeline reads
//! each pack stream into memory and hands the coder an exact-size output
//! buffer. LZMA decoding is delegated through the [`LzmaDecoder`] trait so a
//! host can plug in its own implementation; the `lzma` feature provides a
//! default backed by `lzma-rust2`.

use std::fmt;
use std::sync::Arc;

use crate::format::method_id;
use crate::Error;

pub mod bcj2;
pub mod copy;
pub mod filters;
#[cfg(feature = "lzma")]
pub mod lzma;

/// Coder methods known to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Stored bytes.
    Copy,
    /// LZMA.
    Lzma,
    /// x86 BCJ branch filter.
    BcjX86,
    /// x86 BCJ2 four-stream branch filter.
    Bcj2,
    /// ARM-Thumb branch filter.
    ArmThumb,
    /// LZMA2. Recognized so it can be reported by name, never decoded.
    Lzma2,
    /// Any other method ID.
    Unknown(u64),
}

impl Method {
    /// Classifies a method ID.
    pub fn from_id(id: u64) -> Self {
        match id {
            method_id::COPY => Self::Copy,
            method_id::LZMA => Self::Lzma,
            method_id::BCJ_X86 => Self::BcjX86,
            method_id::BCJ2 => Self::Bcj2,
            method_id::ARMT => Self::ArmThumb,
            method_id::LZMA2 => Self::Lzma2,
            other => Self::Unknown(other),
        }
    }

    /// Returns the method ID.
    pub fn id(self) -> u64 {
        match self {
            Self::Copy => method_id::COPY,
            Self::Lzma => method_id::LZMA,
            Self::BcjX86 => method_id::BCJ_X86,
            Self::Bcj2 => method_id::BCJ2,
            Self::ArmThumb => method_id::ARMT,
            Self::Lzma2 => method_id::LZMA2,
            Self::Unknown(id) => id,
        }
    }

    /// Human-readable method name, as 7-Zip displays it.
    pub fn name(self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Lzma => "LZMA",
            Self::BcjX86 => "BCJ",
            Self::Bcj2 => "BCJ2",
            Self::ArmThumb => "ARMT",
            Self::Lzma2 => "LZMA2",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Returns `true` for methods that can feed a branch filter (Copy, LZMA).
    pub fn is_main_coder(self) -> bool {
        matches!(self, Self::Copy | Self::Lzma)
    }

    /// Returns `true` for single-stream branch filters.
    pub fn is_branch_filter(self) -> bool {
        matches!(self, Self::BcjX86 | Self::ArmThumb)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "Unknown({:#x})", id),
            other => f.write_str(other.name()),
        }
    }
}

/// Failure reported by an [`LzmaDecoder`].
#[derive(Debug, thiserror::Error)]
pub enum LzmaError {
    /// The coder's properties blob is malformed.
    #[error("invalid LZMA properties")]
    InvalidProperties,

    /// The compressed stream is corrupt or ended early.
    #[error("LZMA data error: {0}")]
    Data(String),

    /// The decoder could not allocate its state.
    #[error("LZMA decoder out of memory ({requested} bytes)")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
    },
}

impl From<LzmaError> for Error {
    fn from(e: LzmaError) -> Self {
        match e {
            LzmaError::InvalidProperties => Error::InvalidArchive(e.to_string()),
            LzmaError::Data(msg) => Error::DataError(msg),
            LzmaError::OutOfMemory { requested } => Error::OutOfMemory { requested },
        }
    }
}

/// An LZMA decoding engine.
///
/// Implementations decode `input` into exactly `output.len()` bytes and
/// return how many bytes they produced. Producing fewer bytes is reported by
/// the caller as [`Error::DataError`].
pub trait LzmaDecoder: Send + Sync {
    /// Decodes one raw LZMA stream (no `.lzma` file header).
    fn decode(
        &self,
        properties: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, LzmaError>;
}

impl fmt::Debug for dyn LzmaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LzmaDecoder")
    }
}

/// Returns the built-in LZMA decoder, if the `lzma` feature is enabled.
pub fn default_lzma_decoder() -> Option<Arc<dyn LzmaDecoder>> {
    #[cfg(feature = "lzma")]
    {
        Some(Arc::new(lzma::RustLzmaDecoder))
    }
    #[cfg(not(feature = "lzma"))]
    {
        None
    }
}
