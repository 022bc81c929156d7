//! 7z archive format constants and header parsing.
//!
//! This module contains the magic numbers, property IDs and method IDs of the
//! 7z format, along with the parsers that turn the binary header into an
//! [`ArchiveCatalog`](catalog::ArchiveCatalog).

pub mod catalog;
pub mod files;
pub mod header;
pub(crate) mod parser;
pub mod reader;
pub mod streams;

/// The 7z file signature (magic bytes).
///
/// Every valid 7z archive starts with these 6 bytes: `'7' 'z' 0xBC 0xAF 0x27 0x1C`
pub const SIGNATURE: &[u8; 6] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Size of the signature header in bytes.
///
/// The signature header contains:
/// - 6 bytes: signature
/// - 2 bytes: version (major, minor)
/// - 4 bytes: start header CRC
/// - 8 bytes: next header offset
/// - 8 bytes: next header size
/// - 4 bytes: next header CRC
pub const SIGNATURE_HEADER_SIZE: u64 = 32;

/// Archive version - major. Archives with any other major version are rejected.
pub const VERSION_MAJOR: u8 = 0;

/// Archive version - minor written by current archivers.
pub const VERSION_MINOR: u8 = 4;

/// Property IDs (tags) used in 7z headers.
///
/// Tags are stored with the variable-length number encoding, so they are
/// compared as `u64`.
pub mod property_id {
    /// End of a section.
    pub const END: u64 = 0x00;
    /// Plain header.
    pub const HEADER: u64 = 0x01;
    /// Archive properties.
    pub const ARCHIVE_PROPERTIES: u64 = 0x02;
    /// Additional streams info.
    pub const ADDITIONAL_STREAMS_INFO: u64 = 0x03;
    /// Main streams info.
    pub const MAIN_STREAMS_INFO: u64 = 0x04;
    /// Files info.
    pub const FILES_INFO: u64 = 0x05;
    /// Pack info.
    pub const PACK_INFO: u64 = 0x06;
    /// Unpack info.
    pub const UNPACK_INFO: u64 = 0x07;
    /// Substreams info.
    pub const SUBSTREAMS_INFO: u64 = 0x08;
    /// Sizes.
    pub const SIZE: u64 = 0x09;
    /// CRC digests.
    pub const CRC: u64 = 0x0A;
    /// Folders.
    pub const FOLDER: u64 = 0x0B;
    /// Coder output sizes.
    pub const CODERS_UNPACK_SIZE: u64 = 0x0C;
    /// Files per folder.
    pub const NUM_UNPACK_STREAM: u64 = 0x0D;
    /// Empty stream bit vector.
    pub const EMPTY_STREAM: u64 = 0x0E;
    /// Empty file bit vector.
    pub const EMPTY_FILE: u64 = 0x0F;
    /// Anti-item bit vector.
    pub const ANTI: u64 = 0x10;
    /// File names.
    pub const NAME: u64 = 0x11;
    /// Creation times.
    pub const CTIME: u64 = 0x12;
    /// Last access times.
    pub const ATIME: u64 = 0x13;
    /// Last write times.
    pub const MTIME: u64 = 0x14;
    /// Windows attributes.
    pub const WIN_ATTRIBUTES: u64 = 0x15;
    /// Archive comment.
    pub const COMMENT: u64 = 0x16;
    /// Compressed header.
    pub const ENCODED_HEADER: u64 = 0x17;
    /// Start positions.
    pub const START_POS: u64 = 0x18;
    /// Padding.
    pub const DUMMY: u64 = 0x19;
}

/// Method IDs, as the big-endian number formed by the coder's ID bytes.
pub mod method_id {
    /// Copy (stored).
    pub const COPY: u64 = 0x00;
    /// LZMA.
    pub const LZMA: u64 = 0x03_01_01;
    /// x86 BCJ branch filter.
    pub const BCJ_X86: u64 = 0x03_03_01_03;
    /// x86 BCJ2 four-stream branch filter.
    pub const BCJ2: u64 = 0x03_03_01_1B;
    /// ARM-Thumb branch filter.
    pub const ARMT: u64 = 0x03_03_07_01;
    /// LZMA2 (recognized, not decoded).
    pub const LZMA2: u64 = 0x21;
}
