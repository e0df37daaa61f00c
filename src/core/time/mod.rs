//! Time base
//!
//! Monotonic tick counter, ms↔tick conversion, and the tick entry point an
//! external driver calls once per tick period. Tick arithmetic is wrap-safe:
//! every deadline comparison goes through the signed-difference helpers, so
//! counter wrap is invisible within one wrap period.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::SYSTEM_TICK_MS;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::types::Tick;

/// Monotonic tick counter and tick-rate configuration
pub(crate) struct TimeBase {
    ticks: AtomicU32,
    tick_ms: AtomicU32,
}

impl TimeBase {
    pub(crate) fn new() -> Self {
        TimeBase {
            ticks: AtomicU32::new(0),
            tick_ms: AtomicU32::new(SYSTEM_TICK_MS),
        }
    }

    /// Current tick count
    #[inline]
    pub(crate) fn now(&self) -> Tick {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Increment and return the new tick count
    #[inline]
    pub(crate) fn advance(&self) -> Tick {
        self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline]
    pub(crate) fn rate_ms(&self) -> u32 {
        self.tick_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_rate_ms(&self, ms: u32) {
        self.tick_ms.store(ms, Ordering::Relaxed);
    }
}

/// `true` once `now` has reached `target`, tolerating counter wrap
#[inline]
pub(crate) fn tick_reached(now: Tick, target: Tick) -> bool {
    now.wrapping_sub(target) as i32 >= 0
}

/// `true` when `a` is strictly later than `b`, tolerating counter wrap
#[inline]
pub(crate) fn tick_after(a: Tick, b: Tick) -> bool {
    a.wrapping_sub(b) as i32 > 0
}

impl Kernel {
    /// Current system tick count.
    #[inline]
    pub fn now(&self) -> Tick {
        self.shared().time.now()
    }

    /// Convert milliseconds to ticks at the configured tick rate.
    pub fn ms_to_ticks(&self, ms: u32) -> Tick {
        ms / self.shared().time.rate_ms()
    }

    /// Convert ticks to milliseconds at the configured tick rate.
    pub fn ticks_to_ms(&self, ticks: Tick) -> u32 {
        ticks.saturating_mul(self.shared().time.rate_ms())
    }

    /// Configured tick period in milliseconds.
    pub fn tick_rate_ms(&self) -> u32 {
        self.shared().time.rate_ms()
    }

    /// Set the tick period in milliseconds.
    pub fn set_tick_rate(&self, ms: u32) -> OsResult<()> {
        if ms == 0 {
            return Err(OsError::InvalidArg);
        }
        self.shared().time.set_rate_ms(ms);
        Ok(())
    }

    /// Process one system tick.
    ///
    /// Called once per tick period by an external driver (or directly by a
    /// task in lock-step simulations). Increments the counter and runs the
    /// scheduler's tick work: delay and timeout expiry, periodic release,
    /// and round-robin time slicing. May context-switch before returning
    /// when invoked on the running task's thread.
    pub fn tick(&self) {
        let now = self.shared().time.advance();
        self.sched_tick(now);
    }
}
