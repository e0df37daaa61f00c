//! Critical section handling
//!
//! Safe critical section primitives protecting the kernel data structures
//! from reentrant access by the tick handler and other threads. Backed by
//! the `critical-section` crate's std implementation, which serializes all
//! holders process-wide and supports same-thread nesting: only the
//! outermost exit restores the previous state.

use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::RestoreState;

/// Nesting depth across all threads, for diagnostics
static DEPTH: AtomicU32 = AtomicU32::new(0);

/// RAII guard for critical sections
///
/// Creating the guard enters the kernel critical section; dropping it
/// restores the previous state.
pub struct CriticalSection {
    restore: RestoreState,
}

impl CriticalSection {
    /// Enter the critical section.
    ///
    /// Returns a guard that restores the previous state when dropped.
    #[inline]
    pub fn enter() -> Self {
        // SAFETY: the returned guard pairs this acquire with exactly one
        // release in Drop.
        let restore = unsafe { critical_section::acquire() };
        DEPTH.fetch_add(1, Ordering::Relaxed);
        CriticalSection { restore }
    }

    /// Check whether any thread currently holds the critical section
    #[inline]
    pub fn is_active() -> bool {
        DEPTH.load(Ordering::Relaxed) > 0
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        DEPTH.fetch_sub(1, Ordering::Relaxed);
        // SAFETY: paired with the acquire in `enter`.
        unsafe { critical_section::release(self.restore) };
    }
}

/// Execute a closure inside the critical section
///
/// The closure receives a reference to the guard, which can be used to
/// access [`CsCell`](crate::cs_cell::CsCell) protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}
