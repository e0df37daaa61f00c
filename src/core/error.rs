//! Error types for the kernel
//!
//! Uses Rust's Result pattern instead of C-style negative return codes.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OsError {
    // ============ Argument errors ============
    /// Invalid argument (null-ish handle, zero size, unknown option)
    InvalidArg = 1001,
    /// Priority outside [0, MAX_PRIORITY_LEVELS)
    PrioInvalid = 1002,
    /// Message length does not match the queue's record size
    MsgSizeInvalid = 1004,

    // ============ Capacity errors ============
    /// No free task slot in the registry
    TaskLimit = 2001,
    /// No free slot in the IPC pool
    ObjLimit = 2002,
    /// Execution context could not be created
    ContextAlloc = 2003,

    // ============ Protocol errors ============
    /// Caller does not own the mutex
    MutexNotOwner = 3001,
    /// Caller already owns the mutex (non-recursive)
    MutexOwner = 3002,
    /// Semaphore already at maximum count
    SemOverflow = 3003,
    /// Cannot delete the running task
    TaskIsCurrent = 3005,
    /// Operation not permitted on the idle task
    TaskIsIdle = 3006,
    /// Handle refers to a deleted or never-created object
    ObjInvalid = 3007,
    /// Queue is empty
    QueueEmpty = 3008,

    // ============ Wait outcomes ============
    /// Bounded wait expired before the resource arrived
    Timeout = 4001,
    /// Object was deleted while the caller was waiting
    ObjDeleted = 4002,

    // ============ Kernel state errors ============
    /// Kernel is not running
    NotRunning = 5001,
    /// Kernel is already running
    AlreadyRunning = 5002,
    /// Scheduler is locked; blocking is not permitted
    SchedLocked = 5003,
    /// Scheduler is not locked
    SchedNotLocked = 5004,
    /// Caller is not a kernel task (no current task on this thread)
    NoCurrentTask = 5005,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    pub fn as_str(self) -> &'static str {
        match self {
            OsError::InvalidArg => "invalid argument",
            OsError::PrioInvalid => "invalid priority",
            OsError::MsgSizeInvalid => "message size mismatch",
            OsError::TaskLimit => "task registry full",
            OsError::ObjLimit => "IPC pool full",
            OsError::ContextAlloc => "context allocation failed",
            OsError::MutexNotOwner => "mutex not owned by caller",
            OsError::MutexOwner => "mutex already owned by caller",
            OsError::SemOverflow => "semaphore at maximum count",
            OsError::TaskIsCurrent => "task is currently running",
            OsError::TaskIsIdle => "operation not permitted on idle task",
            OsError::ObjInvalid => "invalid object handle",
            OsError::QueueEmpty => "queue empty",
            OsError::Timeout => "timed out",
            OsError::ObjDeleted => "object deleted while waiting",
            OsError::NotRunning => "kernel not running",
            OsError::AlreadyRunning => "kernel already running",
            OsError::SchedLocked => "scheduler locked",
            OsError::SchedNotLocked => "scheduler not locked",
            OsError::NoCurrentTask => "no current task on this thread",
        }
    }
}

impl core::fmt::Display for OsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for OsError {}
