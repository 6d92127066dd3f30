//! Monotonic time source for session timings and frame timestamps.

use std::time::Instant;

/// Monotonic clock in nanoseconds.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_nanos(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`], with the origin at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock starting at zero now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Whole milliseconds between two clock readings, saturating.
#[must_use]
pub fn elapsed_ms(start_ns: u64, end_ns: u64) -> u32 {
    u32::try_from(end_ns.saturating_sub(start_ns) / 1_000_000).unwrap_or(u32::MAX)
}
