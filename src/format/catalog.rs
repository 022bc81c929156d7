//! The parsed archive catalog and its derived lookup tables.

use crate::{Error, Result};

use super::SIGNATURE_HEADER_SIZE;
use super::files::FileEntry;
use super::streams::{Folder, StreamsInfo};

/// Lookup tables derived from the catalog once, after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogIndex {
    /// First global pack stream used by each folder.
    pub folder_start_pack_stream_index: Vec<usize>,
    /// Offset of each pack stream from the start of the packed data.
    pub pack_stream_offsets: Vec<u64>,
    /// First file stored in each folder.
    pub folder_start_file_index: Vec<usize>,
    /// Folder holding each file's data, `None` for files without a stream.
    pub file_index_to_folder_index: Vec<Option<usize>>,
}

impl CatalogIndex {
    /// Builds the index tables.
    ///
    /// Fails with [`Error::InvalidArchive`] if the folders reference more pack
    /// streams than exist, or if more files carry data than the folders hold.
    pub fn build(pack_sizes: &[u64], folders: &[Folder], files: &[FileEntry]) -> Result<Self> {
        let mut folder_start_pack_stream_index = Vec::with_capacity(folders.len());
        let mut next_pack = 0usize;
        for (index, folder) in folders.iter().enumerate() {
            folder_start_pack_stream_index.push(next_pack);
            next_pack += folder.pack_streams.len();
            if next_pack > pack_sizes.len() {
                return Err(Error::InvalidArchive(format!(
                    "folder {} needs pack stream {} but only {} exist",
                    index,
                    next_pack - 1,
                    pack_sizes.len()
                )));
            }
        }

        let mut pack_stream_offsets = Vec::with_capacity(pack_sizes.len());
        let mut offset = 0u64;
        for &size in pack_sizes {
            pack_stream_offsets.push(offset);
            offset = offset
                .checked_add(size)
                .ok_or_else(|| Error::InvalidArchive("pack stream sizes overflow".into()))?;
        }

        let mut folder_start_file_index = vec![files.len(); folders.len()];
        let mut file_index_to_folder_index = Vec::with_capacity(files.len());
        let mut folder_index = 0usize;
        let mut index_in_folder = 0u32;

        for (file_index, file) in files.iter().enumerate() {
            if !file.has_stream {
                file_index_to_folder_index.push(None);
                continue;
            }
            if index_in_folder == 0 {
                // Folders without substreams hold no files.
                loop {
                    let folder = folders.get(folder_index).ok_or_else(|| {
                        Error::InvalidArchive(format!(
                            "file {} has data but no folder is left",
                            file_index
                        ))
                    })?;
                    folder_start_file_index[folder_index] = file_index;
                    if folder.num_unpack_substreams != 0 {
                        break;
                    }
                    folder_index += 1;
                }
            }
            file_index_to_folder_index.push(Some(folder_index));
            index_in_folder += 1;
            if index_in_folder >= folders[folder_index].num_unpack_substreams {
                folder_index += 1;
                index_in_folder = 0;
            }
        }

        Ok(Self {
            folder_start_pack_stream_index,
            pack_stream_offsets,
            folder_start_file_index,
            file_index_to_folder_index,
        })
    }
}

/// Everything the header says about an archive.
///
/// Built once by the header parser and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveCatalog {
    /// Absolute position of the first pack stream.
    pub data_start: u64,
    /// Size of each pack stream.
    pub pack_sizes: Vec<u64>,
    /// CRC of each pack stream, if declared.
    pub pack_crcs: Vec<Option<u32>>,
    /// Folders (solid blocks).
    pub folders: Vec<Folder>,
    /// Files in archive order.
    pub files: Vec<FileEntry>,
    index: CatalogIndex,
}

impl ArchiveCatalog {
    /// Assembles a catalog from parsed streams info and file entries.
    pub fn new(streams: StreamsInfo, files: Vec<FileEntry>) -> Result<Self> {
        let data_start = SIGNATURE_HEADER_SIZE
            .checked_add(streams.pack_info.pack_pos)
            .ok_or_else(|| Error::InvalidArchive("pack position overflows".into()))?;
        let index = CatalogIndex::build(&streams.pack_info.pack_sizes, &streams.folders, &files)?;
        Ok(Self {
            data_start,
            pack_sizes: streams.pack_info.pack_sizes,
            pack_crcs: streams.pack_info.pack_crcs,
            folders: streams.folders,
            files,
            index,
        })
    }

    /// Returns the derived lookup tables.
    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    /// Folder holding `file_index`'s data, or `None` if the file has no data
    /// (or the index is out of range).
    pub fn folder_for_file(&self, file_index: usize) -> Option<usize> {
        self.index
            .file_index_to_folder_index
            .get(file_index)
            .copied()
            .flatten()
    }

    /// Unpacked size of a folder.
    pub fn folder_unpack_size(&self, folder_index: usize) -> Option<u64> {
        self.folders.get(folder_index)?.unpack_size().ok()
    }

    /// Absolute position of a pack stream in the archive.
    pub fn pack_stream_position(&self, pack_index: usize) -> Option<u64> {
        let offset = *self.index.pack_stream_offsets.get(pack_index)?;
        self.data_start.checked_add(offset)
    }

    /// Absolute position of a folder's first pack stream and the sizes of all
    /// its pack streams.
    pub fn folder_pack_streams(&self, folder_index: usize) -> Option<(u64, &[u64])> {
        let folder = self.folders.get(folder_index)?;
        let first = *self.index.folder_start_pack_stream_index.get(folder_index)?;
        let sizes = self.pack_sizes.get(first..first + folder.pack_streams.len())?;
        let position = if sizes.is_empty() {
            self.data_start
        } else {
            self.pack_stream_position(first)?
        };
        Some((position, sizes))
    }

    /// Byte range of a file inside its folder's unpacked output, as
    /// `(folder_index, offset, size)`.
    pub fn file_range(&self, file_index: usize) -> Option<(usize, u64, u64)> {
        let folder_index = self.folder_for_file(file_index)?;
        let start = self.index.folder_start_file_index[folder_index];
        let offset = self.files[start..file_index]
            .iter()
            .try_fold(0u64, |acc, f| acc.checked_add(f.size))?;
        Some((folder_index, offset, self.files[file_index].size))
    }

    /// Returns `true` if any folder holds more than one file.
    pub fn is_solid(&self) -> bool {
        self.folders.iter().any(|f| f.num_unpack_substreams > 1)
    }
}
