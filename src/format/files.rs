//! File entries and the files-info header section.

use crate::timestamp::Timestamp;
use crate::{Error, Result};

use super::property_id;
use super::reader::ByteCursor;
use super::streams::{ResourceLimits, SubStreamsInfo};

/// A file record from the archive header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    /// Path inside the archive, `/` or `\` separated as stored.
    pub name: String,
    /// Unpacked size in bytes (0 for directories and empty files).
    pub size: u64,
    /// CRC of the file contents, if declared.
    pub crc: Option<u32>,
    /// Whether the file occupies a substream in some folder.
    pub has_stream: bool,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Whether this is an anti-item (a deletion marker in update archives).
    pub is_anti: bool,
    /// Last modification time.
    pub last_write_time: Option<Timestamp>,
    /// Windows attributes, with Unix mode in the high 16 bits if set by the archiver.
    pub attributes: Option<u32>,
}

fn read_external_flag(c: &mut ByteCursor<'_>, what: &str) -> Result<()> {
    if c.read_byte()? != 0 {
        return Err(Error::InvalidArchive(format!(
            "{} stored in additional streams are not supported",
            what
        )));
    }
    Ok(())
}

/// Reads per-file `u32` values guarded by a defined-vector.
fn read_defined_u32s(c: &mut ByteCursor<'_>, n: usize, what: &str) -> Result<Vec<Option<u32>>> {
    let defined = c.read_bool_vector2(n)?;
    read_external_flag(c, what)?;
    defined
        .into_iter()
        .map(|d| if d { c.read_u32_le().map(Some) } else { Ok(None) })
        .collect()
}

/// Parses the files-info section (after its tag) and reconciles it with the
/// substream sizes and CRCs read earlier.
pub fn parse_files_info(
    c: &mut ByteCursor<'_>,
    substreams: &SubStreamsInfo,
    limits: &ResourceLimits,
) -> Result<Vec<FileEntry>> {
    let num_files = c.read_number_as_u32()? as usize;
    limits.check_entries("files", num_files as u64)?;

    // Files beyond the substream count need an EmptyStream bit each, which
    // must fit in the bytes that are left.
    let describable = substreams
        .unpack_sizes
        .len()
        .saturating_add(c.remaining().saturating_mul(8));
    if num_files > describable {
        return Err(Error::InvalidArchive(format!(
            "{} files declared but the header can describe at most {}",
            num_files, describable
        )));
    }

    let mut names: Vec<String> = Vec::new();
    let mut empty_stream: Option<Vec<bool>> = None;
    let mut empty_file: Option<Vec<bool>> = None;
    let mut anti: Option<Vec<bool>> = None;
    let mut mtimes: Vec<Option<Timestamp>> = Vec::new();
    let mut attributes: Vec<Option<u32>> = Vec::new();
    let mut num_empty_streams = 0;

    loop {
        let id = c.read_number()?;
        if id == property_id::END {
            break;
        }
        let size = c.read_number()?;
        let mut section = c.sub_cursor(size)?;

        match id {
            property_id::NAME => {
                read_external_flag(&mut section, "file names")?;
                if section.remaining() % 2 != 0 {
                    return Err(Error::InvalidArchive(
                        "file names section has odd length".into(),
                    ));
                }
                names = Vec::with_capacity(num_files.min(section.remaining() / 2));
                for _ in 0..num_files {
                    names.push(section.read_name_utf16le_to_utf8()?);
                }
            }
            property_id::EMPTY_STREAM => {
                let v = section.read_bool_vector(num_files)?;
                num_empty_streams = v.iter().filter(|&&b| b).count();
                empty_stream = Some(v);
            }
            property_id::EMPTY_FILE => {
                empty_file = Some(section.read_bool_vector(num_empty_streams)?);
            }
            property_id::ANTI => {
                anti = Some(section.read_bool_vector(num_empty_streams)?);
            }
            property_id::MTIME => {
                let defined = section.read_bool_vector2(num_files)?;
                read_external_flag(&mut section, "modification times")?;
                mtimes = defined
                    .into_iter()
                    .map(|d| {
                        if d {
                            let low = section.read_u32_le()?;
                            let high = section.read_u32_le()?;
                            Ok(Some(Timestamp::from_words(low, high)))
                        } else {
                            Ok(None)
                        }
                    })
                    .collect::<Result<_>>()?;
            }
            property_id::WIN_ATTRIBUTES => {
                attributes = read_defined_u32s(&mut section, num_files, "attributes")?;
            }
            other => {
                log::trace!("skipping file property {:#x} ({} bytes)", other, size);
            }
        }
    }

    if num_files > substreams.unpack_sizes.len() + num_empty_streams {
        return Err(Error::InvalidArchive(format!(
            "{} files but only {} substreams and {} empty streams",
            num_files,
            substreams.unpack_sizes.len(),
            num_empty_streams
        )));
    }

    let mut streams = substreams
        .unpack_sizes
        .iter()
        .zip(substreams.digests.iter());
    let mut empty_index = 0;
    let mut files = Vec::with_capacity(num_files);

    for i in 0..num_files {
        let has_stream = !empty_stream
            .as_ref()
            .is_some_and(|v| v.get(i).copied().unwrap_or(false));

        let mut entry = FileEntry {
            name: names.get(i).cloned().unwrap_or_default(),
            has_stream,
            last_write_time: mtimes.get(i).copied().flatten(),
            attributes: attributes.get(i).copied().flatten(),
            ..FileEntry::default()
        };

        if has_stream {
            let (&size, &crc) = streams.next().ok_or_else(|| {
                Error::InvalidArchive(format!("file {} has no matching substream", i))
            })?;
            entry.size = size;
            entry.crc = crc;
        } else {
            entry.is_directory = !empty_file
                .as_ref()
                .is_some_and(|v| v.get(empty_index).copied().unwrap_or(false));
            entry.is_anti = anti
                .as_ref()
                .is_some_and(|v| v.get(empty_index).copied().unwrap_or(false));
            empty_index += 1;
        }
        files.push(entry);
    }

    Ok(files)
}
