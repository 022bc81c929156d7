//! Options for opening archives.

use std::sync::Arc;

use crate::codec::{self, LzmaDecoder};
use crate::format::streams::ResourceLimits;

/// Options controlling how an archive is opened and extracted.
///
/// # Example
///
/// ```rust
/// use sevenz_decode::{OpenOptions, ResourceLimits};
///
/// let options = OpenOptions::new()
///     .limits(ResourceLimits::new().max_entries(10_000))
///     .verify_crc(false);
/// assert!(!options.verify_crc);
/// ```
#[derive(Clone)]
pub struct OpenOptions {
    /// Resource limits applied while parsing and decoding.
    pub limits: ResourceLimits,
    /// Whether folder and file CRC mismatches fail extraction.
    ///
    /// When disabled, mismatches are logged and the bytes are returned
    /// anyway. Header CRCs are always checked.
    pub verify_crc: bool,
    /// Decoder used for LZMA coders.
    pub lzma: Option<Arc<dyn LzmaDecoder>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            verify_crc: true,
            lzma: codec::default_lzma_decoder(),
        }
    }
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("limits", &self.limits)
            .field("verify_crc", &self.verify_crc)
            .field("lzma", &self.lzma.is_some())
            .finish()
    }
}

impl OpenOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enables or disables CRC verification of extracted data.
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Uses `decoder` for LZMA coders instead of the built-in one.
    pub fn lzma_decoder(mut self, decoder: impl LzmaDecoder + 'static) -> Self {
        self.lzma = Some(Arc::new(decoder));
        self
    }
}
