//! # sevenz-decode
//!
//! A small, strict decoder for 7z archives.
//!
//! The crate parses the archive header into an immutable catalog and extracts
//! files on demand. It decodes exactly the folder shapes 7-Zip writes for
//! Copy, LZMA, BCJ, ARM-Thumb and BCJ2 archives; anything else is reported as
//! unsupported rather than guessed at.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sevenz_decode::{Archive, DecodeCache, Result};
//!
//! fn main() -> Result<()> {
//!     let mut archive = Archive::open_path("archive.7z")?;
//!     let mut cache = DecodeCache::new();
//!
//!     for index in 0..archive.len() {
//!         let name = archive.file(index).map(|f| f.name.clone()).unwrap_or_default();
//!         let data = archive.extract(index, &mut cache)?;
//!         println!("{}: {} bytes", name, data.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Memory
//!
//! Every buffer comes from one of two [`Allocator`]s: a *main* allocator for
//! the decoded folder kept in the [`DecodeCache`], and a *temp* allocator for
//! header bytes, pack streams and coder scratch space. Scratch buffers are
//! released on every return path.
//!
//! ```rust
//! use std::sync::Arc;
//! use sevenz_decode::{Archive, BudgetAllocator, Error, MemorySource};
//!
//! let main = Arc::new(BudgetAllocator::new(64 << 20));
//! let temp = Arc::new(BudgetAllocator::new(16 << 20));
//! let result = Archive::open_with_allocators(MemorySource::new(vec![0u8; 8]), main, temp);
//! assert!(matches!(result, Err(Error::InvalidArchive(_))));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `lzma` | Yes | Built-in LZMA decoder backed by `lzma-rust2` |
//!
//! Without `lzma`, LZMA coders need a decoder supplied through
//! [`OpenOptions::lzma_decoder`].
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Corrupt data and unsupported content
//! can be told apart with [`Error::is_corruption`] and
//! [`Error::is_unsupported`].
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod format;
pub mod read;
pub mod source;
pub mod timestamp;

pub use alloc::{AllocBuf, Allocator, AllocatorExt, Allocators, BudgetAllocator, SystemAllocator};
pub use error::{CrcScope, Error, Result};
pub use source::{ByteSource, MemorySource, ReaderSource};
pub use timestamp::Timestamp;

// Re-export reading API at crate root for convenience
pub use read::{Archive, DecodeCache, OpenOptions, check_supported_folder};

pub use codec::{LzmaDecoder, LzmaError, Method};
pub use format::catalog::{ArchiveCatalog, CatalogIndex};
pub use format::files::FileEntry;
pub use format::streams::{Folder, ResourceLimits};

#[cfg(feature = "lzma")]
#[cfg_attr(docsrs, doc(cfg(feature = "lzma")))]
pub use codec::lzma::RustLzmaDecoder;
