//! File modification times.
//!
//! 7z stores times as Windows FILETIME values: 100-nanosecond ticks since
//! 1601-01-01 UTC, written as a low and a high 32-bit word.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DIFF: u64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: u64 = 10_000_000;

/// A FILETIME value read from the archive.
///
/// ```rust
/// use sevenz_decode::Timestamp;
/// use std::time::SystemTime;
///
/// let ts = Timestamp::from_filetime(116_444_736_000_000_000);
/// assert_eq!(ts.as_unix_secs(), 0);
/// assert_eq!(ts.as_system_time(), SystemTime::UNIX_EPOCH);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    filetime: u64,
}

impl Timestamp {
    /// Wraps a raw FILETIME value.
    pub const fn from_filetime(filetime: u64) -> Self {
        Self { filetime }
    }

    /// Builds a timestamp from the two little-endian words stored on disk.
    pub const fn from_words(low: u32, high: u32) -> Self {
        Self::from_filetime(((high as u64) << 32) | low as u64)
    }

    /// Returns the raw FILETIME value.
    pub const fn as_filetime(&self) -> u64 {
        self.filetime
    }

    /// Whole seconds relative to the Unix epoch, rounded toward negative infinity.
    pub fn as_unix_secs(&self) -> i64 {
        let rel = self.filetime as i128 - FILETIME_UNIX_DIFF as i128;
        rel.div_euclid(TICKS_PER_SECOND as i128) as i64
    }

    /// Fraction of the second in 100-nanosecond ticks.
    pub fn sub_second_100ns(&self) -> u32 {
        (self.filetime % TICKS_PER_SECOND) as u32
    }

    /// Converts to [`SystemTime`], keeping the full 100ns precision.
    pub fn as_system_time(&self) -> SystemTime {
        let to_duration = |ticks: u64| {
            Duration::new(
                ticks / TICKS_PER_SECOND,
                ((ticks % TICKS_PER_SECOND) * 100) as u32,
            )
        };
        if self.filetime >= FILETIME_UNIX_DIFF {
            UNIX_EPOCH + to_duration(self.filetime - FILETIME_UNIX_DIFF)
        } else {
            UNIX_EPOCH - to_duration(FILETIME_UNIX_DIFF - self.filetime)
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> Self {
        ts.as_system_time()
    }
}
