//! Copy coder (stored data).

use crate::{Error, Result};

/// Copies a pack stream verbatim into `output`.
///
/// The stored size must equal the coder's declared output size.
pub fn decode(input: &[u8], output: &mut [u8]) -> Result<()> {
    if input.len() != output.len() {
        return Err(Error::DataError(format!(
            "stored stream is {} bytes, expected {}",
            input.len(),
            output.len()
        )));
    }
    output.copy_from_slice(input);
    Ok(())
}
