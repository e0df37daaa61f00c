//! Task Control Block (TCB) definition
//!
//! The TCB carries everything the kernel needs to manage one task:
//! identity, scheduling state, priorities, the execution context, the wait
//! protocol fields, periodic timing, and statistics.

use crate::context::TaskContext;
use crate::types::{
    BlockReason, EventFlags, EventGroupId, MutexId, Prio, QueueId, SemId, TaskState, Tick,
    WakeStatus,
};

/// Which object a blocked task is waiting on, interpreted per
/// `block_reason`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    None,
    Sem(SemId),
    Mutex(MutexId),
    Queue(QueueId),
    Event(EventGroupId),
}

/// Per-task statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Total time the task has been running, in ticks
    pub total_runtime: Tick,
    /// Tick at which the task last started running
    pub last_start_time: Tick,
    /// Number of times the task has been dispatched
    pub activations: u32,
    /// Number of deadline misses
    pub deadline_misses: u32,
    /// Longest observed execution burst, in ticks
    pub max_execution_time: Tick,
}

/// Task Control Block
pub(crate) struct Tcb {
    // ============ Identity ============
    pub(crate) name: String,
    pub(crate) gen: u16,

    // ============ Scheduling ============
    pub(crate) state: TaskState,
    /// Current (possibly inherited) priority
    pub(crate) prio: Prio,
    /// Priority the caller asked for; inheritance boosts restore to this
    pub(crate) base_prio: Prio,

    // ============ Time slicing ============
    pub(crate) time_slice: Tick,
    pub(crate) slice_remain: Tick,

    // ============ Execution context ============
    pub(crate) ctx: TaskContext,

    // ============ Wait protocol ============
    pub(crate) block_reason: BlockReason,
    pub(crate) wait_obj: WaitObject,
    pub(crate) wake_status: WakeStatus,
    /// Absolute wake tick; meaningful only while `timeout_armed`
    pub(crate) delay_until: Tick,
    pub(crate) timeout_armed: bool,

    // ============ Event wait predicate ============
    pub(crate) flags_wait: EventFlags,
    pub(crate) flags_opt: u8,
    /// Bits that satisfied the wait, recorded by the setter at wake time
    pub(crate) flags_rdy: EventFlags,

    // ============ Queue hand-off ============
    /// Message a blocked sender is carrying
    pub(crate) msg_out: Option<Box<[u8]>>,
    /// Direct-delivery slot for a blocked receiver
    pub(crate) msg_in: Option<Box<[u8]>>,

    // ============ Periodic timing ============
    pub(crate) period: Tick,
    pub(crate) deadline: Tick,
    pub(crate) next_release: Tick,
    /// Absolute deadline of the current job
    pub(crate) abs_deadline: Tick,
    /// Latch: the current job's miss has been counted
    pub(crate) miss_counted: bool,

    // ============ Statistics ============
    pub(crate) stats: TaskStats,
}

impl Tcb {
    pub(crate) fn new(name: String, prio: Prio, time_slice: Tick, ctx: TaskContext) -> Self {
        Tcb {
            name,
            gen: 0,
            state: TaskState::Ready,
            prio,
            base_prio: prio,
            time_slice,
            slice_remain: time_slice,
            ctx,
            block_reason: BlockReason::None,
            wait_obj: WaitObject::None,
            wake_status: WakeStatus::Pending,
            delay_until: 0,
            timeout_armed: false,
            flags_wait: 0,
            flags_opt: 0,
            flags_rdy: 0,
            msg_out: None,
            msg_in: None,
            period: 0,
            deadline: 0,
            next_release: 0,
            abs_deadline: 0,
            miss_counted: false,
            stats: TaskStats::default(),
        }
    }
}
