//! Wall-clock tick driver
//!
//! Background thread delivering `kernel.tick()` once per configured tick
//! period. This is the host stand-in for a hardware timer interrupt; the
//! kernel itself only requires that *something* calls `tick()`
//! periodically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;

/// Periodic tick delivery thread
pub struct TickDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Start delivering ticks to `kernel` at its configured tick rate.
    pub fn start(kernel: Kernel) -> OsResult<TickDriver> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("tick-driver".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(kernel.tick_rate_ms() as u64));
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                    kernel.tick();
                }
            })
            .map_err(|_| OsError::ContextAlloc)?;
        log::info!("tick driver started");
        Ok(TickDriver {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the driver and wait for its thread to exit.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::info!("tick driver stopped");
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.halt();
        }
    }
}
