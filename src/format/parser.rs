//! Header parsing: from the start header to a complete [`ArchiveCatalog`].
//!
//! The header block is read into memory, checked against the CRC in the
//! start header, and walked section by section. An encoded header is decoded
//! through the normal folder pipeline first; only one level of encoding is
//! accepted.

use crate::alloc::{AllocatorExt, Allocators};
use crate::checksum;
use crate::error::CrcScope;
use crate::read::decompression::{decode_catalog_folder, verify_folder_crc};
use crate::read::options::OpenOptions;
use crate::source::{ByteSource, read_exact_at};
use crate::{Error, Result};

use super::catalog::ArchiveCatalog;
use super::files::parse_files_info;
use super::header::StartHeader;
use super::property_id;
use super::reader::ByteCursor;
use super::streams::{ResourceLimits, StreamsInfo};

/// Reads the start header and header block of `source` and builds its catalog.
///
/// The raw header block is held in a temp-allocator buffer for the duration
/// of the parse.
pub(crate) fn read_catalog<S: ByteSource + ?Sized>(
    source: &mut S,
    allocators: &Allocators,
    options: &OpenOptions,
) -> Result<ArchiveCatalog> {
    let start = StartHeader::read(source)?;
    if start.next_header_size == 0 {
        log::debug!("archive has an empty header");
        return ArchiveCatalog::new(StreamsInfo::default(), Vec::new());
    }

    let limits = &options.limits;
    if start.next_header_size > limits.max_header_bytes {
        return Err(Error::ResourceLimitExceeded(format!(
            "header is {} bytes (limit {})",
            start.next_header_size, limits.max_header_bytes
        )));
    }

    let position = start
        .next_header_position()
        .ok_or_else(|| Error::InvalidArchive("header offset overflows".into()))?;
    let end = position
        .checked_add(start.next_header_size)
        .ok_or_else(|| Error::InvalidArchive("header offset overflows".into()))?;
    let source_len = source.len()?;
    if end > source_len {
        return Err(Error::Truncated {
            offset: position,
            needed: end - source_len,
        });
    }

    let size = usize::try_from(start.next_header_size).map_err(|_| Error::ValueTooLarge {
        value: start.next_header_size,
    })?;
    let mut header = allocators.temp.try_alloc(size)?;
    read_exact_at(source, position, &mut header)?;

    let actual = checksum::crc32(&header);
    if actual != start.next_header_crc {
        return Err(Error::crc_mismatch(
            CrcScope::Header,
            start.next_header_crc,
            actual,
        ));
    }

    let mut c = ByteCursor::new(&header);
    match c.read_number()? {
        property_id::HEADER => parse_header(&mut c, limits),
        property_id::ENCODED_HEADER => {
            let streams = StreamsInfo::parse(&mut c, limits)?;
            let decoded = decode_encoded_header(source, streams, allocators, options)?;
            let mut c = ByteCursor::new(&decoded);
            match c.read_number()? {
                property_id::HEADER => parse_header(&mut c, limits),
                property_id::ENCODED_HEADER => Err(Error::InvalidArchive(
                    "encoded header decodes to another encoded header".into(),
                )),
                other => Err(unexpected_top_level(other)),
            }
        }
        other => Err(unexpected_top_level(other)),
    }
}

fn unexpected_top_level(id: u64) -> Error {
    Error::InvalidArchive(format!("unexpected top-level property {:#x}", id))
}

/// Decodes the single folder of an encoded header into a temp buffer.
fn decode_encoded_header<S: ByteSource + ?Sized>(
    source: &mut S,
    streams: StreamsInfo,
    allocators: &Allocators,
    options: &OpenOptions,
) -> Result<crate::alloc::AllocBuf> {
    if streams.folders.len() != 1 {
        return Err(Error::InvalidArchive(format!(
            "encoded header has {} folders",
            streams.folders.len()
        )));
    }
    let unpack_size = streams.folders[0].unpack_size()?;
    if unpack_size > options.limits.max_header_bytes {
        return Err(Error::ResourceLimitExceeded(format!(
            "decoded header is {} bytes (limit {})",
            unpack_size, options.limits.max_header_bytes
        )));
    }

    let mini = ArchiveCatalog::new(streams, Vec::new())?;
    log::debug!(
        "decoding encoded header: {} bytes from {} pack streams",
        unpack_size,
        mini.pack_sizes.len()
    );
    let decoded = decode_catalog_folder(source, &mini, 0, &allocators.temp, allocators, options)?;
    verify_folder_crc(&mini.folders[0], 0, &decoded).map_err(|e| match e {
        Error::CrcMismatch {
            expected, actual, ..
        } => Error::crc_mismatch(CrcScope::Header, expected, actual),
        other => other,
    })?;
    Ok(decoded)
}

/// Parses a plain header (after its `Header` tag).
///
/// Sections appear in a fixed order, each optional, and the header ends with
/// `End`.
fn parse_header(c: &mut ByteCursor<'_>, limits: &ResourceLimits) -> Result<ArchiveCatalog> {
    let mut id = c.read_number()?;

    if id == property_id::ARCHIVE_PROPERTIES {
        skip_archive_properties(c)?;
        id = c.read_number()?;
    }

    if id == property_id::ADDITIONAL_STREAMS_INFO {
        let additional = StreamsInfo::parse(c, limits)?;
        log::trace!(
            "ignoring {} additional folders",
            additional.folders.len()
        );
        id = c.read_number()?;
    }

    let mut streams = StreamsInfo::default();
    if id == property_id::MAIN_STREAMS_INFO {
        streams = StreamsInfo::parse(c, limits)?;
        id = c.read_number()?;
    }

    let mut files = Vec::new();
    if id == property_id::FILES_INFO {
        files = parse_files_info(c, &streams.substreams, limits)?;
        id = c.read_number()?;
    }

    if id != property_id::END {
        return Err(Error::InvalidArchive(format!(
            "unexpected property {:#x} in header",
            id
        )));
    }

    ArchiveCatalog::new(streams, files)
}

fn skip_archive_properties(c: &mut ByteCursor<'_>) -> Result<()> {
    loop {
        let id = c.read_number()?;
        if id == property_id::END {
            return Ok(());
        }
        log::trace!("skipping archive property {:#x}", id);
        c.skip_number_prefixed()?;
    }
}
