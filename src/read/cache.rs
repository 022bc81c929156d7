//! Single-folder decode cache.

use crate::alloc::AllocBuf;

/// Keeps the decoded bytes of the most recently extracted folder.
///
/// Files stored in the same solid folder are extracted from one decode. A
/// cache remembers which archive filled it, so passing the same cache to two
/// archives only costs a redundant decode.
///
/// # Example
///
/// ```rust
/// use sevenz_decode::DecodeCache;
///
/// let cache = DecodeCache::new();
/// assert_eq!(cache.cached_folder(), None);
/// assert_eq!(cache.decode_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct DecodeCache {
    slot: Option<CachedFolder>,
    decodes: u64,
}

#[derive(Debug)]
struct CachedFolder {
    owner: u64,
    folder: usize,
    data: AllocBuf,
}

impl DecodeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the folder currently held, if any.
    pub fn cached_folder(&self) -> Option<usize> {
        self.slot.as_ref().map(|s| s.folder)
    }

    /// Number of folders decoded into this cache so far.
    pub fn decode_count(&self) -> u64 {
        self.decodes
    }

    /// Releases the held buffer.
    pub fn clear(&mut self) {
        if let Some(slot) = self.slot.take() {
            log::debug!(
                "evicting folder {} ({} bytes) from decode cache",
                slot.folder,
                slot.data.len()
            );
        }
    }

    pub(crate) fn holds(&self, owner: u64, folder: usize) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|s| s.owner == owner && s.folder == folder)
    }

    pub(crate) fn store(&mut self, owner: u64, folder: usize, data: AllocBuf) {
        self.clear();
        self.decodes += 1;
        self.slot = Some(CachedFolder {
            owner,
            folder,
            data,
        });
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.slot.as_ref().map_or(&[], |s| &s.data[..])
    }
}
