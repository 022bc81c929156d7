//! Bounds-checked reading of header bytes.
//!
//! [`ByteCursor`] walks a fully buffered header region. Every read checks the
//! remaining length first and fails with [`Error::Truncated`] instead of
//! reading past the end; no I/O happens here.

use crate::checksum;
use crate::{Error, Result};

/// Largest value [`ByteCursor::read_number_as_u32`] accepts.
///
/// Counts and indices above this are rejected so a corrupt header cannot
/// request absurd allocations.
pub const MAX_U32_NUMBER: u64 = 0x7FFF_FFFF;

/// A cursor over an in-memory byte region.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    crc: Option<u32>,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            crc: None,
        }
    }

    /// Current offset from the start of the region.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns `true` if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Starts folding every consumed byte into a running CRC.
    pub fn begin_crc(&mut self) {
        self.crc = Some(checksum::CRC32_INIT);
    }

    /// Stops CRC tracking and returns the checksum of the bytes consumed since
    /// [`begin_crc`](Self::begin_crc).
    pub fn end_crc(&mut self) -> Option<u32> {
        self.crc.take().map(checksum::finalize)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::truncated(self.pos, n - self.remaining()));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        if let Some(running) = self.crc.as_mut() {
            *running = checksum::update(*running, bytes);
        }
        Ok(bytes)
    }

    /// Reads one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a variable-length number.
    ///
    /// The leading one bits of the first byte give the count of extension
    /// bytes that follow (0 to 8). Extension bytes are the low-order value
    /// bytes, little-endian; the bits of the first byte below the terminating
    /// zero supply the high-order bits.
    ///
    /// - `0xxxxxxx`: 0-127
    /// - `10xxxxxx` + 1 byte: up to 2^14 - 1
    /// - `110xxxxx` + 2 bytes: up to 2^21 - 1
    /// - ...
    /// - `11111111` + 8 bytes: full u64
    pub fn read_number(&mut self) -> Result<u64> {
        let first = self.read_byte()?;
        let mut mask = 0x80u8;
        let mut value = 0u64;
        for i in 0..8 {
            if first & mask == 0 {
                let high = u64::from(first & mask.wrapping_sub(1));
                return Ok(value | (high << (8 * i)));
            }
            value |= u64::from(self.read_byte()?) << (8 * i);
            mask >>= 1;
        }
        Ok(value)
    }

    /// Reads a number used as a count or index.
    ///
    /// Fails with [`Error::ValueTooLarge`] above [`MAX_U32_NUMBER`].
    pub fn read_number_as_u32(&mut self) -> Result<u32> {
        let value = self.read_number()?;
        if value > MAX_U32_NUMBER {
            return Err(Error::ValueTooLarge { value });
        }
        Ok(value as u32)
    }

    /// Reads a number used as a byte count within this region.
    pub fn read_number_as_usize(&mut self) -> Result<usize> {
        let value = self.read_number()?;
        usize::try_from(value).map_err(|_| Error::ValueTooLarge { value })
    }

    /// Unpacks `n` bits, most significant bit of each byte first.
    pub fn read_bool_vector(&mut self, n: usize) -> Result<Vec<bool>> {
        let bytes = self.take(n.div_ceil(8))?;
        Ok((0..n)
            .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect())
    }

    /// Reads an "all defined" flag byte, then a bit vector only if the flag is zero.
    pub fn read_bool_vector2(&mut self, n: usize) -> Result<Vec<bool>> {
        if self.read_byte()? != 0 {
            return Ok(vec![true; n]);
        }
        self.read_bool_vector(n)
    }

    /// Decodes one NUL-terminated UTF-16LE string into UTF-8.
    ///
    /// Surrogate pairs are combined; an unpaired surrogate is an
    /// [`Error::InvalidArchive`].
    pub fn read_name_utf16le_to_utf8(&mut self) -> Result<String> {
        let start = self.pos;
        let mut units = Vec::new();
        loop {
            let pair = self.take(2)?;
            let unit = u16::from_le_bytes([pair[0], pair[1]]);
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        char::decode_utf16(units.iter().copied())
            .collect::<std::result::Result<String, _>>()
            .map_err(|e| {
                Error::InvalidArchive(format!(
                    "unpaired UTF-16 surrogate {:#06x} in name at offset {:#x}",
                    e.unpaired_surrogate(),
                    start
                ))
            })
    }

    /// Advances `n` bytes without decoding them.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let n = usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| Error::Truncated {
                offset: self.pos as u64,
                needed: n.saturating_sub(self.remaining() as u64),
            })?;
        self.take(n).map(|_| ())
    }

    /// Reads a size number and skips that many bytes.
    pub fn skip_number_prefixed(&mut self) -> Result<()> {
        let size = self.read_number()?;
        self.skip(size)
    }

    /// Splits off the next `n` bytes as their own cursor.
    pub fn sub_cursor(&mut self, n: u64) -> Result<ByteCursor<'a>> {
        let n = usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| Error::Truncated {
                offset: self.pos as u64,
                needed: n.saturating_sub(self.remaining() as u64),
            })?;
        Ok(ByteCursor::new(self.take(n)?))
    }
}

/// Appends `value` using the variable-length number encoding.
///
/// The shortest encoding is always produced.
pub fn write_number(out: &mut Vec<u8>, value: u64) {
    let extra = (0..8)
        .find(|&n| {
            let bits = 8 * n + (7 - n);
            value >> bits == 0
        })
        .unwrap_or(8);
    let bytes = value.to_le_bytes();
    if extra == 8 {
        out.push(0xFF);
        out.extend_from_slice(&bytes);
        return;
    }
    let prefix = !(0xFFu8 >> extra);
    let high = (value >> (8 * extra)) as u8;
    out.push(prefix | high);
    out.extend_from_slice(&bytes[..extra]);
}
