//! Archive reading API.
//!
//! [`Archive`] parses the header once on open and then serves extraction
//! requests. Decoded folders live in a caller-owned [`DecodeCache`], so
//! consecutive files from one solid folder are sliced out of a single decode.
//!
//! # Example
//!
//! ```rust,no_run
//! use sevenz_decode::{Archive, DecodeCache};
//!
//! let mut archive = Archive::open_path("archive.7z")?;
//! let mut cache = DecodeCache::new();
//!
//! let names: Vec<String> = archive.list_files().map(|f| f.name.clone()).collect();
//! for (index, name) in names.iter().enumerate() {
//!     let data = archive.extract(index, &mut cache)?;
//!     println!("{}: {} bytes", name, data.len());
//! }
//! # Ok::<(), sevenz_decode::Error>(())
//! ```

mod cache;
pub(crate) mod decompression;
pub(crate) mod options;

pub use cache::DecodeCache;
pub use decompression::check_supported_folder;
pub use options::OpenOptions;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alloc::{Allocator, Allocators};
use crate::checksum;
use crate::error::CrcScope;
use crate::format::catalog::ArchiveCatalog;
use crate::format::files::FileEntry;
use crate::format::parser::read_catalog;
use crate::source::{ByteSource, ReaderSource};
use crate::{Error, Result};

use decompression::{decode_catalog_folder, verify_folder_crc};

/// Source of the identity stamped on cached folders.
static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// An open 7z archive.
pub struct Archive<S> {
    source: S,
    catalog: ArchiveCatalog,
    allocators: Allocators,
    options: OpenOptions,
    id: u64,
}

impl<S> std::fmt::Debug for Archive<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("files", &self.catalog.files.len())
            .field("folders", &self.catalog.folders.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Archive<ReaderSource<BufReader<File>>> {
    /// Opens the archive at `path` with default options.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(ReaderSource::open_path(path)?)
    }
}

impl<S: ByteSource> Archive<S> {
    /// Opens an archive with the system allocator and default options.
    ///
    /// # Errors
    ///
    /// Any parse error: a bad signature or version, a CRC mismatch in the
    /// start header or header, a truncated source, or a malformed header.
    pub fn open(source: S) -> Result<Self> {
        Self::open_with_options(source, Allocators::default(), OpenOptions::default())
    }

    /// Opens an archive using `main` for decoded folders and `temp` for
    /// scratch buffers.
    pub fn open_with_allocators(
        source: S,
        main: Arc<dyn Allocator>,
        temp: Arc<dyn Allocator>,
    ) -> Result<Self> {
        Self::open_with_options(source, Allocators::new(main, temp), OpenOptions::default())
    }

    /// Opens an archive with explicit allocators and options.
    pub fn open_with_options(
        mut source: S,
        allocators: Allocators,
        options: OpenOptions,
    ) -> Result<Self> {
        let catalog = read_catalog(&mut source, &allocators, &options)?;
        log::debug!(
            "opened archive: {} files in {} folders",
            catalog.files.len(),
            catalog.folders.len()
        );
        Ok(Self {
            source,
            catalog,
            allocators,
            options,
            id: NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Extracts file `index`, returning a view into `cache`.
    ///
    /// If the file's folder is not the one held by `cache`, the folder is
    /// decoded with the main allocator, checked against its CRC, and replaces
    /// the cached folder. The returned slice stays valid until `cache` is used
    /// again. Files without data return an empty slice and leave `cache`
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::FileIndexOutOfRange`] for a bad `index`
    /// - [`Error::CrcMismatch`] if the folder or file CRC does not match and
    ///   CRC verification is enabled; on a file mismatch the cache is cleared
    /// - any decode error from the folder's coders
    pub fn extract<'c>(&mut self, index: usize, cache: &'c mut DecodeCache) -> Result<&'c [u8]> {
        let count = self.catalog.files.len();
        let entry = self
            .catalog
            .files
            .get(index)
            .ok_or(Error::FileIndexOutOfRange { index, count })?;
        let Some((folder, offset, size)) = self.catalog.file_range(index) else {
            return Ok(&[]);
        };

        if !cache.holds(self.id, folder) {
            cache.clear();
            let data = decode_catalog_folder(
                &mut self.source,
                &self.catalog,
                folder,
                &self.allocators.main,
                &self.allocators,
                &self.options,
            )?;
            if let Err(e) = verify_folder_crc(&self.catalog.folders[folder], folder, &data) {
                if self.options.verify_crc {
                    return Err(e);
                }
                log::warn!("{}; CRC verification disabled", e);
            }
            cache.store(self.id, folder, data);
        }

        let start = usize::try_from(offset).ok();
        let end = start.and_then(|s| usize::try_from(size).ok().and_then(|n| s.checked_add(n)));
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) if end <= cache.data().len() => (start, end),
            _ => {
                return Err(Error::InvalidArchive(format!(
                    "file {} lies outside its folder",
                    index
                )));
            }
        };

        if let Some(expected) = entry.crc {
            let actual = checksum::crc32(&cache.data()[start..end]);
            if actual != expected {
                let err = Error::crc_mismatch(
                    CrcScope::Entry {
                        index,
                        name: entry.name.clone(),
                    },
                    expected,
                    actual,
                );
                if self.options.verify_crc {
                    cache.clear();
                    return Err(err);
                }
                log::warn!("{}; CRC verification disabled", err);
            }
        }

        Ok(&cache.data()[start..end])
    }

    /// Extracts file `index` into a new vector, using a private cache.
    pub fn extract_to_vec(&mut self, index: usize) -> Result<Vec<u8>> {
        let mut cache = DecodeCache::new();
        self.extract(index, &mut cache).map(<[u8]>::to_vec)
    }
}

impl<S> Archive<S> {
    /// The parsed catalog.
    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    /// Options the archive was opened with.
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Number of files, directories included.
    pub fn len(&self) -> usize {
        self.catalog.files.len()
    }

    /// Returns `true` if the archive lists no files.
    pub fn is_empty(&self) -> bool {
        self.catalog.files.is_empty()
    }

    /// Iterates over the file entries in archive order.
    pub fn list_files(&self) -> std::slice::Iter<'_, FileEntry> {
        self.catalog.files.iter()
    }

    /// Returns file `index`, if it exists.
    pub fn file(&self, index: usize) -> Option<&FileEntry> {
        self.catalog.files.get(index)
    }

    /// Folder holding file `index`'s data.
    pub fn folder_for_file(&self, index: usize) -> Option<usize> {
        self.catalog.folder_for_file(index)
    }

    /// Returns `true` if some folder holds more than one file.
    pub fn is_solid(&self) -> bool {
        self.catalog.is_solid()
    }

    /// Gives back the byte source.
    pub fn into_source(self) -> S {
        self.source
    }
}
