//! Pluggable buffer allocation.
//!
//! Every byte buffer the engine needs (header bytes, pack streams, coder
//! scratch space, decoded folders) is obtained from an [`Allocator`]. Two
//! instances are used: a *main* allocator for data that outlives a single call
//! (the cached folder output handed back by `extract`) and a *temp* allocator
//! for scratch space that lives only inside one parse or decode. A host can
//! give them different budgets.
//!
//! Buffers come back wrapped in [`AllocBuf`], which returns them to their
//! allocator on drop, so every early `?` return releases its scratch space.
//!
//! ```rust
//! use std::sync::Arc;
//! use sevenz_decode::alloc::{Allocator, AllocatorExt, BudgetAllocator};
//!
//! let budget = Arc::new(BudgetAllocator::new(1024));
//! let shared: Arc<dyn Allocator> = budget.clone();
//! let buf = shared.alloc_buf(1000).unwrap();
//! assert_eq!(budget.in_use(), 1000);
//! assert!(shared.alloc_buf(100).is_none());
//! drop(buf);
//! assert_eq!(budget.in_use(), 0);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Error, Result};

/// A source of zero-initialized byte buffers.
pub trait Allocator: Send + Sync {
    /// Returns a zeroed buffer of exactly `size` bytes, or `None` if the
    /// allocation is refused.
    fn allocate(&self, size: usize) -> Option<Vec<u8>>;

    /// Takes back a buffer previously returned by [`allocate`](Self::allocate).
    fn free(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

/// Extension helpers for shared allocators.
pub trait AllocatorExt {
    /// Allocates a guarded buffer, or `None` if refused.
    fn alloc_buf(&self, size: usize) -> Option<AllocBuf>;

    /// Allocates a guarded buffer, mapping refusal to [`Error::OutOfMemory`].
    fn try_alloc(&self, size: usize) -> Result<AllocBuf> {
        self.alloc_buf(size)
            .ok_or(Error::OutOfMemory { requested: size })
    }
}

impl AllocatorExt for Arc<dyn Allocator> {
    fn alloc_buf(&self, size: usize) -> Option<AllocBuf> {
        let buf = self.allocate(size)?;
        Some(AllocBuf {
            buf: Some(buf),
            owner: Arc::clone(self),
        })
    }
}

/// A buffer that is handed back to its allocator when dropped.
pub struct AllocBuf {
    buf: Option<Vec<u8>>,
    owner: Arc<dyn Allocator>,
}

impl AllocBuf {
    /// Returns the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Returns the buffer contents mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Deref for AllocBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for AllocBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for AllocBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.owner.free(buf);
        }
    }
}

impl fmt::Debug for AllocBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocBuf")
            .field("len", &self.as_slice().len())
            .finish()
    }
}

/// Allocates from the global heap, reporting failure instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(buf)
    }
}

/// An allocator that refuses to hold more than a fixed number of bytes at once.
///
/// Tracks outstanding bytes and the peak, which also makes it handy for
/// checking that buffers are released.
#[derive(Debug)]
pub struct BudgetAllocator {
    limit: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
    live: AtomicUsize,
}

impl BudgetAllocator {
    /// Creates an allocator with a budget of `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Returns the configured budget.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest value [`in_use`](Self::in_use) has reached.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of buffers not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Allocator for BudgetAllocator {
    fn allocate(&self, size: usize) -> Option<Vec<u8>> {
        loop {
            let current = self.in_use.load(Ordering::SeqCst);
            let next = current.checked_add(size)?;
            if next > self.limit {
                return None;
            }
            if self
                .in_use
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.peak.fetch_max(next, Ordering::SeqCst);
                break;
            }
        }
        match SystemAllocator.allocate(size) {
            Some(buf) => {
                self.live.fetch_add(1, Ordering::SeqCst);
                Some(buf)
            }
            None => {
                self.in_use.fetch_sub(size, Ordering::SeqCst);
                None
            }
        }
    }

    fn free(&self, buffer: Vec<u8>) {
        self.in_use.fetch_sub(buffer.len(), Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The main/temp allocator pair used by an archive handle.
#[derive(Clone)]
pub struct Allocators {
    /// Long-lived data: decoded folders kept in the decode cache.
    pub main: Arc<dyn Allocator>,
    /// Scratch data scoped to one parse or decode call.
    pub temp: Arc<dyn Allocator>,
}

impl Allocators {
    /// Pairs two allocators.
    pub fn new(main: Arc<dyn Allocator>, temp: Arc<dyn Allocator>) -> Self {
        Self { main, temp }
    }
}

impl Default for Allocators {
    fn default() -> Self {
        let system: Arc<dyn Allocator> = Arc::new(SystemAllocator);
        Self {
            main: Arc::clone(&system),
            temp: system,
        }
    }
}

impl fmt::Debug for Allocators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocators").finish_non_exhaustive()
    }
}
