//! Core type definitions for the kernel
//!
//! These types provide strong typing for the kernel primitives.

/// Tick counter type
pub type Tick = u32;

/// Task priority (0 = highest priority)
pub type Prio = u8;

/// Semaphore counter type
pub type SemCount = u32;

/// Event flags type
pub type EventFlags = u32;

/// Task scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Task is ready to run
    Ready = 0,
    /// Task is currently running
    Running = 1,
    /// Task is blocked on a delay or kernel object
    Blocked = 2,
    /// Task is suspended
    Suspended = 3,
    /// Task entry function returned
    Terminated = 4,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Blocked => "BLOCKED",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Terminated => "TERMINATED",
        }
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a blocked task is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockReason {
    /// Not blocked
    None = 0,
    /// Blocked for a time delay
    Delay = 1,
    /// Blocked on a semaphore
    Semaphore = 2,
    /// Blocked on a full message queue
    QueueFull = 3,
    /// Blocked on an empty message queue
    QueueEmpty = 4,
    /// Blocked waiting for event flags
    Event = 5,
    /// Blocked on a mutex
    Mutex = 6,
}

/// Outcome of a blocking wait, written by whoever wakes the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WakeStatus {
    /// Still waiting (or never blocked)
    Pending = 0,
    /// The resource arrived; `block_reason` was cleared by the waker
    Success = 1,
    /// The armed timeout expired before the resource arrived
    Timeout = 2,
    /// The object was deleted while the task was waiting
    Deleted = 3,
}

/// Scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Policy {
    /// Strict priority, FIFO within a class
    Priority = 0,
    /// Priority with tick-driven time slicing within a class
    RoundRobin = 1,
    /// Earliest deadline first among periodic tasks
    Edf = 2,
    /// Rate monotonic (priorities assigned by the caller from periods)
    Rms = 3,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Priority => "Priority",
            Policy::RoundRobin => "Round Robin",
            Policy::Edf => "Earliest Deadline First",
            Policy::Rms => "Rate Monotonic",
        }
    }
}

impl core::fmt::Display for Policy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Running = 1,
}

// ============ Handles ============

/// Opaque task handle, stable for the task's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) index: u16,
    pub(crate) gen: u16,
}

/// Slot-pool handle for a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId {
    pub(crate) index: u16,
    pub(crate) gen: u16,
}

/// Slot-pool handle for a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId {
    pub(crate) index: u16,
    pub(crate) gen: u16,
}

/// Slot-pool handle for a message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId {
    pub(crate) index: u16,
    pub(crate) gen: u16,
}

/// Slot-pool handle for an event flag group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventGroupId {
    pub(crate) index: u16,
    pub(crate) gen: u16,
}

// ============ Event wait options ============

/// Option bits for [`EventGroup::wait`](crate::sync::event::EventGroup::wait)
pub mod evt {
    /// Wait until all requested flags are set
    pub const WAIT_ALL: u8 = 0x01;
    /// Wait until any requested flag is set
    pub const WAIT_ANY: u8 = 0x02;
    /// Clear the requested flags once the wait is satisfied
    pub const CLEAR: u8 = 0x04;
}
