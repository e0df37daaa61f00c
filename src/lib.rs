//! satos: a host-simulated real-time kernel
//!
//! A cooperative-plus-preemptive multitasking core reproducing the
//! behavioral contracts of an embedded RTOS on a host machine:
//! - Priority-based scheduling with round-robin, EDF, and RMS policies
//! - Tick-driven time with delays, timeouts, and periodic task release
//! - Synchronization primitives: counting semaphores, mutexes with
//!   priority inheritance, bounded message queues, event flag groups
//! - Per-task and scheduler statistics with deadline-miss accounting
//!
//! Execution contexts are simulated with parked OS threads handed a
//! resume baton one at a time; there are no hardware interrupts and no
//! asynchronous preemption of arbitrary instructions. An external driver
//! (for instance [`drivers::TickDriver`]) delivers the system tick.
//!
//! ```no_run
//! use satos::{Kernel, Policy, MAX_TIMEOUT};
//!
//! let kernel = Kernel::new(Policy::Priority).unwrap();
//! let sem = kernel.create_semaphore("ready", 0, 1).unwrap();
//!
//! let k = kernel.clone();
//! let s = sem.clone();
//! kernel.task_create("worker", 3, 2048, move || {
//!     s.take(MAX_TIMEOUT).unwrap();
//!     k.stop().unwrap();
//! }).unwrap();
//!
//! kernel.task_create("signaller", 4, 2048, move || {
//!     sem.give().unwrap();
//! }).unwrap();
//!
//! kernel.start().unwrap();
//! kernel.shutdown();
//! ```

// ============ Modules ============

pub mod core;
pub mod drivers;
pub mod sync;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::cs_cell;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::kernel;
pub use crate::core::kernel::Kernel;
pub use crate::core::prio;
pub use crate::core::sched;
pub use crate::core::sched::SchedulerStats;
pub use crate::core::task;
pub use crate::core::task::TaskStats;
pub use crate::core::time;
pub use crate::core::types;
pub use crate::core::types::*;

pub(crate) use crate::core::context;

pub use crate::sync::{EventGroup, Mutex, Queue, Semaphore};
