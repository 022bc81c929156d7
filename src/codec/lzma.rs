//! Default LZMA decoder backed by `lzma-rust2`.

use std::io::{Cursor, Read};

use super::{LzmaDecoder, LzmaError};

/// Size of the LZMA properties blob: one lc/lp/pb byte plus a `u32` dictionary size.
pub const PROPERTIES_SIZE: usize = 5;

/// Largest valid lc/lp/pb byte, `(4 * 5 + 4) * 9 + 8`.
const MAX_PROPS_BYTE: u8 = 224;

/// Smallest dictionary the decoder is given.
const MIN_DICT_SIZE: u32 = 4096;

/// Splits a 7z LZMA properties blob into the lc/lp/pb byte and dictionary size.
pub fn parse_properties(properties: &[u8]) -> Result<(u8, u32), LzmaError> {
    if properties.len() < PROPERTIES_SIZE || properties[0] > MAX_PROPS_BYTE {
        return Err(LzmaError::InvalidProperties);
    }
    let dict_size = u32::from_le_bytes([
        properties[1],
        properties[2],
        properties[3],
        properties[4],
    ]);
    Ok((properties[0], dict_size))
}

/// The built-in [`LzmaDecoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RustLzmaDecoder;

impl LzmaDecoder for RustLzmaDecoder {
    fn decode(
        &self,
        properties: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, LzmaError> {
        let (props, dict_size) = parse_properties(properties)?;

        // The window never needs to exceed the output it produces.
        let out_len = u32::try_from(output.len()).unwrap_or(u32::MAX);
        let dict_size = dict_size.min(out_len.max(MIN_DICT_SIZE));

        let mut reader = lzma_rust2::LzmaReader::new_with_props(
            Cursor::new(input),
            output.len() as u64,
            props,
            dict_size,
            None,
        )
        .map_err(|_| LzmaError::InvalidProperties)?;

        let mut filled = 0;
        while filled < output.len() {
            match reader.read(&mut output[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(LzmaError::Data(e.to_string())),
            }
        }
        Ok(filled)
    }
}
