//! CRC-32 computation.
//!
//! 7z archives protect the start header, the header block, every folder's
//! unpacked bytes and every file's byte range with the standard CRC-32
//! (ISO-HDLC, reflected polynomial `0xEDB88320`). The lookup table is built at
//! compile time, so there is no process-wide mutable state. The property
//! test `crc32_matches_reference` checks it against `crc32fast`.
//!
//! # Example
//!
//! ```rust
//! use sevenz_decode::checksum::{self, Crc32};
//!
//! let mut crc = Crc32::new();
//! crc.update(b"1234");
//! crc.update(b"56789");
//! assert_eq!(crc.finalize(), 0xCBF43926);
//!
//! // Raw running-value interface
//! let running = checksum::update(checksum::CRC32_INIT, b"123456789");
//! assert_eq!(checksum::finalize(running), 0xCBF43926);
//! ```

/// Reflected CRC-32 polynomial.
pub const CRC32_POLY: u32 = 0xEDB8_8320;

/// Initial running value.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

static TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = i as u32;
        let mut j = 0;
        while j < 8 {
            r = if r & 1 != 0 { (r >> 1) ^ CRC32_POLY } else { r >> 1 };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// Returns the 256-entry lookup table.
pub fn table() -> &'static [u32; 256] {
    &TABLE
}

/// Folds `data` into a running CRC value.
#[inline]
pub fn update(mut running: u32, data: &[u8]) -> u32 {
    for &byte in data {
        running = TABLE[((running ^ byte as u32) & 0xFF) as usize] ^ (running >> 8);
    }
    running
}

/// Converts a running value into the final checksum.
#[inline]
pub fn finalize(running: u32) -> u32 {
    running ^ 0xFFFF_FFFF
}

/// Computes the CRC-32 of a single slice.
pub fn crc32(data: &[u8]) -> u32 {
    finalize(update(CRC32_INIT, data))
}

/// Incremental CRC-32 calculator.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    running: u32,
}

impl Crc32 {
    /// Creates a calculator in its initial state.
    pub fn new() -> Self {
        Self {
            running: CRC32_INIT,
        }
    }

    /// Feeds more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.running = update(self.running, data);
    }

    /// Returns the checksum of everything fed so far.
    pub fn finalize(&self) -> u32 {
        finalize(self.running)
    }

    /// Restores the initial state.
    pub fn reset(&mut self) {
        self.running = CRC32_INIT;
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
