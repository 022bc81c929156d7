//! Tests for malformed and corrupted archive handling.
//!
//! Every case here must fail with a specific error and never panic or return
//! wrong bytes.

mod common;

use common::{
    ArchiveBuilder, CoderSpec, FolderSpec, expect_err, hello_archive, reseal, start_header,
};
use sevenz_decode::format::{method_id, property_id};
use sevenz_decode::{
    Allocators, Archive, CrcScope, Error, MemorySource, OpenOptions, ResourceLimits,
};

fn open(bytes: Vec<u8>) -> sevenz_decode::Result<Archive<MemorySource>> {
    Archive::open(MemorySource::new(bytes))
}

/// Offset of the header block inside `archive`.
fn header_start(archive: &[u8]) -> usize {
    32 + u64::from_le_bytes(archive[12..20].try_into().unwrap()) as usize
}

fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present")
}

// =============================================================================
// Signature Header
// =============================================================================

#[test]
fn test_empty_input() {
    let err = expect_err(open(Vec::new()));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_truncated_signature_header() {
    let mut bytes = hello_archive();
    bytes.truncate(20);
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_bad_signature() {
    let mut bytes = hello_archive();
    bytes[0] = b'P';
    bytes[1] = b'K';
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_unknown_major_version() {
    let mut bytes = hello_archive();
    bytes[6] = 1;
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_newer_minor_version_accepted() {
    let mut bytes = hello_archive();
    bytes[7] = 9;
    let mut archive = open(bytes).unwrap();
    assert_eq!(archive.extract_to_vec(0).unwrap(), b"hello");
}

#[test]
fn test_start_header_crc_mismatch() {
    let mut bytes = hello_archive();
    bytes[20] ^= 0x01;
    let err = expect_err(open(bytes));
    assert!(
        matches!(
            err,
            Error::CrcMismatch {
                scope: CrcScope::StartHeader,
                ..
            }
        ),
        "{:?}",
        err
    );
    assert!(err.is_corruption());
}

#[test]
fn test_header_offset_overflow() {
    let mut bytes = start_header(u64::MAX - 8, 4, 0).to_vec();
    bytes.extend_from_slice(&[0; 16]);
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

// =============================================================================
// Header Block
// =============================================================================

#[test]
fn test_header_crc_mismatch() {
    let mut bytes = hello_archive();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let err = expect_err(open(bytes));
    assert!(
        matches!(
            err,
            Error::CrcMismatch {
                scope: CrcScope::Header,
                ..
            }
        ),
        "{:?}",
        err
    );
}

#[test]
fn test_header_past_end_of_source() {
    let mut bytes = hello_archive();
    let cut = bytes.len() - 7;
    bytes.truncate(cut);
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::Truncated { needed: 7, .. }), "{:?}", err);
}

#[test]
fn test_unknown_top_level_tag() {
    let header = [0x42];
    let mut bytes = start_header(0, 1, crc32fast::hash(&header)).to_vec();
    bytes.extend_from_slice(&header);
    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_header_ends_mid_section() {
    let header = [property_id::HEADER as u8, property_id::MAIN_STREAMS_INFO as u8];
    let mut bytes = start_header(0, 2, crc32fast::hash(&header)).to_vec();
    bytes.extend_from_slice(&header);
    let err = expect_err(open(bytes));
    assert!(err.is_corruption(), "{:?}", err);
}

#[test]
fn test_unpaired_surrogate_in_name() {
    let mut bytes = hello_archive();
    let utf16: Vec<u8> = "a.txt".encode_utf16().flat_map(u16::to_le_bytes).collect();
    let at = header_start(&bytes) + find(&bytes[header_start(&bytes)..], &utf16);
    bytes[at..at + 2].copy_from_slice(&0xD800u16.to_le_bytes());
    reseal(&mut bytes);

    let err = expect_err(open(bytes));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_pack_stream_past_end() {
    let mut bytes = hello_archive();
    // HEADER, MAIN_STREAMS_INFO, PACK_INFO, then the pack position.
    let at = header_start(&bytes) + 3;
    assert_eq!(bytes[at], 0);
    bytes[at] = 0x7F;
    assert!(bytes.len() < 32 + 0x7F);
    reseal(&mut bytes);

    let mut archive = open(bytes).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::Truncated { .. }), "{:?}", err);
}

// =============================================================================
// Folder Topology
// =============================================================================

#[test]
fn test_three_coder_chain_rejected() {
    let mut folder = FolderSpec::copy(&[("a", b"data")]);
    folder.coders = vec![
        CoderSpec::simple(method_id::COPY),
        CoderSpec::simple(method_id::BCJ_X86),
        CoderSpec::simple(method_id::BCJ_X86),
    ];
    folder.bind_pairs = vec![(1, 0), (2, 1)];
    folder.unpack_sizes = vec![4, 4, 4];
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();

    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::UnsupportedFolder { .. }), "{:?}", err);
    assert!(err.is_unsupported());
}

#[test]
fn test_filter_before_main_coder_rejected() {
    let mut folder = FolderSpec::filtered(
        common::MainCoder::Copy,
        method_id::BCJ_X86,
        &[("a", b"data")],
    );
    folder.coders.swap(0, 1);
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::UnsupportedFolder { .. }), "{:?}", err);
}

#[test]
fn test_unknown_method_reported_by_id() {
    const DEFLATE: u64 = 0x04_01_08;
    let mut folder = FolderSpec::copy(&[("a", b"data")]);
    folder.coders[0].method_id = DEFLATE;
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(
        matches!(err, Error::UnsupportedMethod { method_id: DEFLATE }),
        "{:?}",
        err
    );
}

#[test]
fn test_lzma2_unsupported() {
    let mut folder = FolderSpec::copy(&[("a", b"data")]);
    folder.coders[0] = CoderSpec {
        method_id: method_id::LZMA2,
        num_in: 1,
        num_out: 1,
        properties: vec![0x10],
    };
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(
        matches!(
            err,
            Error::UnsupportedMethod {
                method_id: method_id::LZMA2
            }
        ),
        "{:?}",
        err
    );
}

#[test]
fn test_unsupported_folder_does_not_block_others() {
    let mut bad = FolderSpec::copy(&[("bad", b"xxxx")]);
    bad.coders[0].method_id = 0x04_01_08;
    let good = FolderSpec::copy(&[("good", b"fine")]);
    let mut archive = open(ArchiveBuilder::new().folder(bad).folder(good).build()).unwrap();

    assert!(archive.extract_to_vec(0).is_err());
    assert_eq!(archive.extract_to_vec(1).unwrap(), b"fine");
}

// =============================================================================
// Coded Data
// =============================================================================

#[test]
fn test_stored_size_mismatch() {
    let mut folder = FolderSpec::copy(&[("a", b"hello")]);
    folder.unpack_sizes = vec![6];
    folder.file_crcs = vec![None];
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::DataError(_)), "{:?}", err);
}

#[test]
fn test_corrupt_stored_byte_detected() {
    let mut bytes = hello_archive();
    bytes[34] ^= 0x20;
    let mut archive = open(bytes).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::CrcMismatch { .. }), "{:?}", err);
}

#[cfg(feature = "lzma")]
#[test]
fn test_corrupt_lzma_stream_detected() {
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8 ^ (i / 97) as u8).collect();
    let bytes = ArchiveBuilder::new()
        .folder(FolderSpec::lzma(&[("data.bin", &data)]))
        .build();

    let packed_len = header_start(&bytes) - 32;
    for offset in [packed_len / 4, packed_len / 2, packed_len * 3 / 4] {
        let mut damaged = bytes.clone();
        damaged[32 + offset] ^= 0x55;
        let mut archive = open(damaged).unwrap();
        match archive.extract_to_vec(0) {
            Ok(out) => panic!("offset {}: decoded {} bytes from damaged data", offset, out.len()),
            Err(e) => assert!(e.is_corruption(), "offset {}: {:?}", offset, e),
        }
    }
}

#[cfg(feature = "lzma")]
#[test]
fn test_bad_lzma_properties() {
    let data = b"some text to compress".to_vec();
    let mut folder = FolderSpec::lzma(&[("t", &data)]);
    folder.coders[0].properties = vec![0xFF, 0, 0, 1, 0];
    let mut archive = open(ArchiveBuilder::new().folder(folder).build()).unwrap();
    let err = expect_err(archive.extract_to_vec(0));
    assert!(matches!(err, Error::InvalidArchive(_)), "{:?}", err);
}

#[test]
fn test_garbage_never_panics() {
    let valid = hello_archive();
    for i in 0..valid.len() {
        for flip in [0x01u8, 0x80, 0xFF] {
            let mut bytes = valid.clone();
            bytes[i] ^= flip;
            if i >= 32 {
                reseal(&mut bytes);
            }
            let options = OpenOptions::new().limits(
                ResourceLimits::new()
                    .max_entries(10_000)
                    .max_folder_unpack(1 << 20),
            );
            let opened =
                Archive::open_with_options(MemorySource::new(bytes), Allocators::default(), options);
            if let Ok(mut archive) = opened {
                for index in 0..archive.len() {
                    let _ = archive.extract_to_vec(index);
                }
            }
        }
    }
}
