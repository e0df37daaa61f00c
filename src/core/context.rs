//! Execution contexts
//!
//! Host simulation of context switching. Each task's saved state is a
//! dedicated OS thread created parked, plus a resume baton (a one-shot
//! command slot guarded by a mutex/condvar pair). Exactly one context is
//! handed the baton at a time, so task code never makes progress on two
//! threads at once and the kernel never relies on preemptive host
//! scheduling.
//!
//! `switch_context` hands the incoming context its baton and parks the
//! outgoing one; the parked side resumes exactly where it left off. A new
//! task's first resume lands in a trampoline that invokes the entry
//! closure and, when it returns, marks the task terminated and dispatches
//! the next one without re-parking, letting the thread exit. Teardown
//! resumes a parked context with an Exit command, which unwinds the task
//! stack via a dedicated panic payload caught at the trampoline.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::config::HOST_STACK_FLOOR;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::types::TaskId;

/// Command delivered to a parked context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Continue execution
    Run,
    /// Unwind and exit the context thread
    Exit,
}

struct Baton {
    slot: Mutex<Option<Resume>>,
    cond: Condvar,
}

/// Shared handle to one context's resume baton
#[derive(Clone)]
pub(crate) struct ContextHandle(Arc<Baton>);

impl ContextHandle {
    pub(crate) fn new() -> Self {
        ContextHandle(Arc::new(Baton {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }))
    }

    /// Hand the context a resume command.
    ///
    /// Safe to call before the target parks; the command is consumed by
    /// the next (or in-progress) park.
    pub(crate) fn resume(&self, cmd: Resume) {
        let mut slot = self.0.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(cmd);
        self.0.cond.notify_one();
    }

    /// Park the calling thread until a resume command arrives.
    pub(crate) fn park(&self) -> Resume {
        let mut slot = self.0.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(cmd) = slot.take() {
                return cmd;
            }
            slot = self
                .0
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Unwind payload used to tear a context's stack down
pub(crate) struct ContextExit;

/// Unwind the current context thread out of task code.
///
/// Must only be called on a task thread; the unwind is caught at that
/// thread's trampoline.
pub(crate) fn exit_current_context() -> ! {
    resume_unwind(Box::new(ContextExit))
}

/// Suspend `from` and resume `to`.
///
/// Must be called on the thread owning `from`, with no critical section
/// held. Returns once `from` is handed the baton again.
pub(crate) fn switch_context(from: &ContextHandle, to: &ContextHandle) {
    to.resume(Resume::Run);
    if from.park() == Resume::Exit {
        exit_current_context();
    }
}

/// Per-task execution context: the parked thread and its baton
pub(crate) struct TaskContext {
    baton: ContextHandle,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    stack_size: usize,
}

impl TaskContext {
    /// Build the initial context for a task: spawn its thread parked at the
    /// trampoline.
    ///
    /// The task id is not known until the registry slot is allocated, so it
    /// is delivered through `id_cell`; the trampoline reads it after its
    /// first resume. Resuming with `Exit` before the id is published aborts
    /// the thread without running the entry closure.
    pub(crate) fn spawn(
        kernel: Kernel,
        name: &str,
        stack_size: usize,
        entry: Box<dyn FnOnce() + Send + 'static>,
        id_cell: Arc<OnceLock<TaskId>>,
    ) -> OsResult<TaskContext> {
        let baton = ContextHandle::new();
        let thread_baton = baton.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size.max(HOST_STACK_FLOOR))
            .spawn(move || trampoline(kernel, thread_baton, entry, id_cell))
            .map_err(|_| OsError::ContextAlloc)?;

        let thread_id = handle.thread().id();
        Ok(TaskContext {
            baton,
            thread: Some(handle),
            thread_id,
            stack_size,
        })
    }

    #[inline]
    pub(crate) fn baton(&self) -> ContextHandle {
        self.baton.clone()
    }

    #[inline]
    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    #[inline]
    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Take the join handle for teardown
    pub(crate) fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}

/// Entry point of every context thread.
///
/// Parks until first dispatched, runs the task closure, then reports
/// termination so the scheduler can select the next task. A panic in task
/// code terminates the task rather than the simulation.
fn trampoline(
    kernel: Kernel,
    baton: ContextHandle,
    entry: Box<dyn FnOnce() + Send + 'static>,
    id_cell: Arc<OnceLock<TaskId>>,
) {
    if baton.park() == Resume::Exit {
        return;
    }

    let id = match id_cell.get() {
        Some(id) => *id,
        None => return,
    };

    match catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => kernel.finish_task(id, None),
        Err(payload) => {
            if payload.downcast_ref::<ContextExit>().is_some() {
                // Torn down by delete/shutdown; registry already cleaned up.
                return;
            }
            kernel.finish_task(id, Some("task panicked"));
        }
    }
}
