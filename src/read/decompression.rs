//! Folder decoding.
//!
//! Only the coder graphs 7-Zip itself writes for Copy/LZMA/BCJ/BCJ2 archives
//! are accepted. [`check_supported_folder`] matches a folder against those
//! fixed shapes and [`decode_folder`] runs the matching pipeline:
//!
//! | Coders | Shape |
//! |--------|-------|
//! | 1 | Copy or LZMA |
//! | 2 | Copy/LZMA, then BCJ or ARMT in place |
//! | 4 | three Copy/LZMA coders feeding BCJ2 |

use std::sync::Arc;

use crate::alloc::{AllocBuf, Allocator, AllocatorExt, Allocators};
use crate::checksum;
use crate::codec::{self, LzmaDecoder, Method, bcj2, filters};
use crate::error::CrcScope;
use crate::format::catalog::ArchiveCatalog;
use crate::format::streams::{BindPair, Coder, Folder};
use crate::source::{ByteSource, read_exact_at};
use crate::{Error, Result};

use super::options::OpenOptions;

/// `(coder, pack stream)` for the three main coders of a BCJ2 folder, main
/// stream first so its packed copy is released before the others are read.
const BCJ2_CODER_INPUTS: [(usize, usize); 3] = [(2, 0), (0, 3), (1, 2)];

/// The coder of a one- or two-coder folder reads pack stream 0.
const SINGLE_CODER_INPUT: [(usize, usize); 1] = [(0, 0)];

/// Coder index of the BCJ2 main stream.
const BCJ2_MAIN_CODER: usize = 2;

/// Pack stream holding the BCJ2 range-coder data.
const BCJ2_RANGE_PACK_STREAM: usize = 1;

/// Folder input streams bound to pack streams in a BCJ2 folder.
const BCJ2_PACK_STREAMS: [u32; 4] = [2, 6, 1, 0];

/// Bind pairs of a BCJ2 folder.
const BCJ2_BIND_PAIRS: [BindPair; 3] = [
    BindPair {
        in_index: 5,
        out_index: 0,
    },
    BindPair {
        in_index: 4,
        out_index: 1,
    },
    BindPair {
        in_index: 3,
        out_index: 2,
    },
];

fn is_simple(coder: &Coder) -> bool {
    coder.num_in_streams == 1 && coder.num_out_streams == 1
}

fn is_main_coder(coder: &Coder) -> bool {
    is_simple(coder) && Method::from_id(coder.method_id).is_main_coder()
}

fn unsupported(reason: &'static str) -> Error {
    Error::UnsupportedFolder { reason }
}

/// Checks that `folder` has one of the supported coder graphs.
///
/// Accepted shapes, with Copy or LZMA as every main coder:
/// - one main coder reading pack stream 0;
/// - a main coder followed by a BCJ (x86) or ARMT filter, bind pair (1, 0);
/// - three main coders feeding BCJ2, pack streams `[2, 6, 1, 0]` and bind
///   pairs `(5, 0)`, `(4, 1)`, `(3, 2)`.
///
/// # Errors
///
/// [`Error::UnsupportedMethod`] if a coder uses a method this crate does not
/// decode, [`Error::UnsupportedFolder`] if the graph has any other shape.
pub fn check_supported_folder(folder: &Folder) -> Result<()> {
    if let Some(coder) = folder
        .coders
        .iter()
        .find(|c| matches!(Method::from_id(c.method_id), Method::Unknown(_) | Method::Lzma2))
    {
        return Err(Error::UnsupportedMethod {
            method_id: coder.method_id,
        });
    }

    let coders = &folder.coders;
    if coders.is_empty() || coders.len() > 4 {
        return Err(unsupported("unsupported number of coders"));
    }
    if !is_main_coder(&coders[0]) {
        return Err(unsupported("first coder must be Copy or LZMA"));
    }

    match coders.len() {
        1 => {
            if folder.pack_streams != [0] || !folder.bind_pairs.is_empty() {
                return Err(unsupported("single coder must read one pack stream"));
            }
            Ok(())
        }
        2 => {
            let filter = &coders[1];
            if !is_simple(filter) || !Method::from_id(filter.method_id).is_branch_filter() {
                return Err(unsupported("second coder must be a BCJ or ARMT filter"));
            }
            let expected = [BindPair {
                in_index: 1,
                out_index: 0,
            }];
            if folder.pack_streams != [0] || folder.bind_pairs != expected {
                return Err(unsupported("filter must consume the first coder's output"));
            }
            Ok(())
        }
        4 => {
            if !is_main_coder(&coders[1]) || !is_main_coder(&coders[2]) {
                return Err(unsupported("BCJ2 inputs must be Copy or LZMA"));
            }
            let bcj2 = &coders[3];
            if Method::from_id(bcj2.method_id) != Method::Bcj2
                || bcj2.num_in_streams != 4
                || bcj2.num_out_streams != 1
            {
                return Err(unsupported("fourth coder must be BCJ2"));
            }
            if folder.pack_streams != BCJ2_PACK_STREAMS || folder.bind_pairs != BCJ2_BIND_PAIRS {
                return Err(unsupported("non-standard BCJ2 stream layout"));
            }
            Ok(())
        }
        _ => Err(unsupported("unsupported number of coders")),
    }
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::ValueTooLarge { value })
}

/// Reads one whole pack stream into a scratch buffer.
///
/// A stream reaching past the end of the source is rejected before any
/// memory is reserved for it.
fn read_pack_stream<S: ByteSource + ?Sized>(
    source: &mut S,
    temp: &Arc<dyn Allocator>,
    position: u64,
    size: u64,
) -> Result<AllocBuf> {
    let available = source.len()?.saturating_sub(position);
    if size > available {
        return Err(Error::Truncated {
            offset: position,
            needed: size - available,
        });
    }
    let mut buf = temp.try_alloc(to_usize(size)?)?;
    read_exact_at(source, position, &mut buf)?;
    Ok(buf)
}

/// Pairs each main coder of a supported folder with the pack stream it reads.
fn coder_inputs(folder: &Folder) -> &'static [(usize, usize)] {
    if folder.coders.len() == 4 {
        &BCJ2_CODER_INPUTS
    } else {
        &SINGLE_CODER_INPUT
    }
}

fn coder_unpack_size(folder: &Folder, coder: usize) -> Result<u64> {
    folder
        .unpack_sizes
        .get(coder)
        .copied()
        .ok_or_else(|| Error::InvalidArchive(format!("coder {} has no unpack size", coder)))
}

/// Rejects pack streams that cannot back the folder's declared sizes.
///
/// Runs before the output buffer is reserved: every pack stream must lie
/// inside the source, and a Copy coder's pack stream must be exactly as long
/// as its declared output.
fn check_pack_streams<S: ByteSource + ?Sized>(
    source: &mut S,
    folder: &Folder,
    pack_position: u64,
    pack_sizes: &[u64],
) -> Result<()> {
    if pack_sizes.len() != folder.pack_streams.len() {
        return Err(Error::InvalidArchive(format!(
            "folder expects {} pack streams, got {}",
            folder.pack_streams.len(),
            pack_sizes.len()
        )));
    }

    let source_len = source.len()?;
    let mut position = pack_position;
    for &size in pack_sizes {
        let available = source_len.saturating_sub(position);
        if size > available {
            return Err(Error::Truncated {
                offset: position,
                needed: size - available,
            });
        }
        position += size;
    }

    for &(coder, pack) in coder_inputs(folder) {
        if Method::from_id(folder.coders[coder].method_id) != Method::Copy {
            continue;
        }
        let unpacked = coder_unpack_size(folder, coder)?;
        if pack_sizes[pack] != unpacked {
            return Err(Error::DataError(format!(
                "stored stream is {} bytes, expected {}",
                pack_sizes[pack], unpacked
            )));
        }
    }
    Ok(())
}

/// Runs a Copy or LZMA coder over a complete input.
fn decode_main_coder(
    coder: &Coder,
    input: &[u8],
    output: &mut [u8],
    lzma: Option<&dyn LzmaDecoder>,
) -> Result<()> {
    match Method::from_id(coder.method_id) {
        Method::Copy => codec::copy::decode(input, output),
        Method::Lzma => {
            let decoder = lzma.ok_or(Error::UnsupportedMethod {
                method_id: coder.method_id,
            })?;
            let produced = decoder.decode(&coder.properties, input, output)?;
            if produced != output.len() {
                return Err(Error::DataError(format!(
                    "LZMA produced {} of {} bytes",
                    produced,
                    output.len()
                )));
            }
            Ok(())
        }
        _ => Err(Error::UnsupportedMethod {
            method_id: coder.method_id,
        }),
    }
}

/// Decodes `folder` into `output`, which must be exactly the folder's
/// unpacked size.
///
/// `pack_position` is the absolute position of the folder's first pack
/// stream and `pack_sizes` the sizes of its pack streams in stored order.
/// Scratch buffers come from the temp allocator and are released before
/// returning, on success and on failure.
pub fn decode_folder<S: ByteSource + ?Sized>(
    source: &mut S,
    folder: &Folder,
    pack_position: u64,
    pack_sizes: &[u64],
    output: &mut [u8],
    allocators: &Allocators,
    lzma: Option<&dyn LzmaDecoder>,
) -> Result<()> {
    check_supported_folder(folder)?;
    check_pack_streams(source, folder, pack_position, pack_sizes)?;

    let mut pack_offsets = Vec::with_capacity(pack_sizes.len());
    let mut position = pack_position;
    for &size in pack_sizes {
        pack_offsets.push(position);
        position = position
            .checked_add(size)
            .ok_or_else(|| Error::InvalidArchive("pack stream position overflows".into()))?;
    }
    let read_pack = |source: &mut S, index: usize| {
        read_pack_stream(source, &allocators.temp, pack_offsets[index], pack_sizes[index])
    };

    let coders = &folder.coders;
    match coders.len() {
        1 => {
            let input = read_pack(source, 0)?;
            decode_main_coder(&coders[0], &input, output, lzma)
        }
        2 => {
            {
                let input = read_pack(source, 0)?;
                decode_main_coder(&coders[0], &input, output, lzma)?;
            }
            match Method::from_id(coders[1].method_id) {
                Method::BcjX86 => {
                    filters::X86Filter::new().decode(output);
                }
                _ => {
                    filters::arm_thumb_convert(output, 0, false);
                }
            }
            Ok(())
        }
        _ => {
            // BCJ2: coder 0 yields the jump stream, coder 1 the call stream.
            // Coder 2 writes the main stream straight into the tail of
            // `output`, which the merge then fills from the front.
            let main_len = to_usize(coder_unpack_size(folder, BCJ2_MAIN_CODER)?)?;
            let main_start = output.len().checked_sub(main_len).ok_or_else(|| {
                Error::DataError(format!(
                    "BCJ2 main stream is {} bytes, folder only {}",
                    main_len,
                    output.len()
                ))
            })?;

            let mut streams = Vec::with_capacity(2);
            for &(ci, pack_index) in &BCJ2_CODER_INPUTS {
                let input = read_pack(source, pack_index)?;
                if ci == BCJ2_MAIN_CODER {
                    decode_main_coder(&coders[ci], &input, &mut output[main_start..], lzma)?;
                } else {
                    let size = to_usize(coder_unpack_size(folder, ci)?)?;
                    let mut buf = allocators.temp.try_alloc(size)?;
                    decode_main_coder(&coders[ci], &input, &mut buf, lzma)?;
                    streams.push(buf);
                }
            }
            let range = read_pack(source, BCJ2_RANGE_PACK_STREAM)?;
            bcj2::decode_in_place(output, main_start, &streams[1], &streams[0], &range)
        }
    }
}

/// Compares `data` against the folder's declared CRC, if any.
pub fn verify_folder_crc(folder: &Folder, folder_index: usize, data: &[u8]) -> Result<()> {
    match folder.unpack_crc {
        Some(expected) => {
            let actual = checksum::crc32(data);
            if actual != expected {
                return Err(Error::crc_mismatch(
                    CrcScope::Folder(folder_index),
                    expected,
                    actual,
                ));
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Decodes one folder of `catalog` into a buffer from `allocator`.
///
/// The folder CRC is not checked here.
pub fn decode_catalog_folder<S: ByteSource + ?Sized>(
    source: &mut S,
    catalog: &ArchiveCatalog,
    folder_index: usize,
    allocator: &Arc<dyn Allocator>,
    allocators: &Allocators,
    options: &OpenOptions,
) -> Result<AllocBuf> {
    let folder = catalog.folders.get(folder_index).ok_or_else(|| {
        Error::InvalidArchive(format!("folder {} does not exist", folder_index))
    })?;
    check_supported_folder(folder)?;

    let unpack_size = folder.unpack_size()?;
    if unpack_size > options.limits.max_folder_unpack {
        return Err(Error::ResourceLimitExceeded(format!(
            "folder {} unpacks to {} bytes (limit {})",
            folder_index, unpack_size, options.limits.max_folder_unpack
        )));
    }
    let (pack_position, pack_sizes) = catalog.folder_pack_streams(folder_index).ok_or_else(|| {
        Error::InvalidArchive(format!("folder {} has no pack streams", folder_index))
    })?;

    log::debug!(
        "decoding folder {} ({} coders, {} bytes)",
        folder_index,
        folder.coders.len(),
        unpack_size
    );

    check_pack_streams(source, folder, pack_position, pack_sizes)?;

    let mut output = allocator.try_alloc(to_usize(unpack_size)?)?;
    decode_folder(
        source,
        folder,
        pack_position,
        pack_sizes,
        &mut output,
        allocators,
        options.lzma.as_deref(),
    )?;
    Ok(output)
}
