//! The 32-byte signature header.

use crate::error::CrcScope;
use crate::source::ByteSource;
use crate::{Error, Result};

use super::reader::ByteCursor;
use super::{SIGNATURE, SIGNATURE_HEADER_SIZE, VERSION_MAJOR};

/// The start header of a 7z archive.
///
/// Located at offset 0, it points at the header block that describes the rest
/// of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartHeader {
    /// Archive format version - major number.
    pub version_major: u8,
    /// Archive format version - minor number.
    pub version_minor: u8,
    /// Offset of the header block, counted from the end of the start header.
    pub next_header_offset: u64,
    /// Size of the header block (compressed size if encoded).
    pub next_header_size: u64,
    /// CRC of the header block bytes.
    pub next_header_crc: u32,
}

impl StartHeader {
    /// Parses the signature header from its 32 raw bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArchive`] on a bad signature or major version
    /// - [`Error::CrcMismatch`] if the 20-byte record fails its CRC
    pub fn parse(bytes: &[u8; 32]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        if cursor.read_bytes(6)? != SIGNATURE {
            return Err(Error::InvalidArchive("invalid 7z signature".into()));
        }

        let version_major = cursor.read_byte()?;
        let version_minor = cursor.read_byte()?;
        if version_major != VERSION_MAJOR {
            return Err(Error::InvalidArchive(format!(
                "unsupported archive version {}.{}",
                version_major, version_minor
            )));
        }

        let start_header_crc = cursor.read_u32_le()?;
        cursor.begin_crc();
        let next_header_offset = cursor.read_u64_le()?;
        let next_header_size = cursor.read_u64_le()?;
        let next_header_crc = cursor.read_u32_le()?;
        let actual = cursor.end_crc().unwrap_or_default();
        if actual != start_header_crc {
            return Err(Error::crc_mismatch(
                CrcScope::StartHeader,
                start_header_crc,
                actual,
            ));
        }

        Ok(Self {
            version_major,
            version_minor,
            next_header_offset,
            next_header_size,
            next_header_crc,
        })
    }

    /// Reads and parses the signature header from the start of `source`.
    ///
    /// A source shorter than 32 bytes is not an archive at all and is reported
    /// as [`Error::InvalidArchive`].
    pub fn read<S: ByteSource + ?Sized>(source: &mut S) -> Result<Self> {
        let mut bytes = [0u8; SIGNATURE_HEADER_SIZE as usize];
        source.seek(0)?;
        let mut filled = 0;
        while filled < bytes.len() {
            let n = source.read(&mut bytes[filled..])?;
            if n == 0 {
                return Err(Error::InvalidArchive(format!(
                    "file too small for a 7z archive ({} bytes)",
                    filled
                )));
            }
            filled += n;
        }
        Self::parse(&bytes)
    }

    /// Absolute position of the header block.
    ///
    /// Returns `None` if the offset overflows.
    pub fn next_header_position(&self) -> Option<u64> {
        SIGNATURE_HEADER_SIZE.checked_add(self.next_header_offset)
    }
}

#[cfg(test)]
pub(crate) fn build_start_header(offset: u64, size: u64, crc: u32) -> [u8; 32] {
    use crate::checksum;

    let mut bytes = [0u8; 32];
    bytes[..6].copy_from_slice(SIGNATURE);
    bytes[6] = VERSION_MAJOR;
    bytes[7] = super::VERSION_MINOR;
    bytes[12..20].copy_from_slice(&offset.to_le_bytes());
    bytes[20..28].copy_from_slice(&size.to_le_bytes());
    bytes[28..32].copy_from_slice(&crc.to_le_bytes());
    let start_crc = checksum::crc32(&bytes[12..32]);
    bytes[8..12].copy_from_slice(&start_crc.to_le_bytes());
    bytes
}
