//! Compile-time configuration for the kernel
//!
//! These constants control the resource limits and timing defaults of the
//! simulated kernel.

use crate::types::{Policy, Tick};

/// Maximum number of tasks in the registry (idle task included)
pub const MAX_TASKS: usize = 32;

/// Number of priority levels; 0 is the highest priority
pub const MAX_PRIORITY_LEVELS: usize = 16;

/// Maximum number of semaphores (also caps mutexes and event groups)
pub const MAX_SEMAPHORES: usize = 16;

/// Maximum number of message queues
pub const MAX_QUEUES: usize = 16;

/// Maximum stored length of a task or IPC object name
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Default system tick period in milliseconds
pub const SYSTEM_TICK_MS: u32 = 10;

/// Default task stack size in bytes
pub const DEFAULT_STACK_SIZE: usize = 2048;

/// Default round-robin time slice in ticks
pub const DEFAULT_TIME_SLICE: Tick = 10;

/// Infinite-timeout sentinel for blocking calls
pub const MAX_TIMEOUT: Tick = u32::MAX;

/// Idle task priority (lowest)
pub const IDLE_PRIORITY: u8 = (MAX_PRIORITY_LEVELS - 1) as u8;

/// Default scheduling policy
pub const DEFAULT_POLICY: Policy = Policy::Priority;

/// Host floor for context thread stacks; requested task stacks smaller
/// than this remain spawnable on the simulation host
pub(crate) const HOST_STACK_FLOOR: usize = 64 * 1024;
