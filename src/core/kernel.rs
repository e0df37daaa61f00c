//! Kernel state and lifecycle
//!
//! A single [`Kernel`] value owns every kernel table: the task registry,
//! the scheduler lists, the IPC pools, and the time base. Handles are
//! cheap clones sharing the same state, so task closures carry the kernel
//! with them. There are no file-scope statics; all entry points operate
//! through the kernel value, and all tables are touched only inside the
//! critical section.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{DEFAULT_STACK_SIZE, IDLE_PRIORITY};
use crate::context::{ContextHandle, Resume};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::sched::{self, SchedState};
use crate::sync::IpcPools;
use crate::task::TaskTable;
use crate::time::TimeBase;
use crate::types::{Policy, SchedulerState};

/// Everything the kernel owns, guarded by the critical section
pub(crate) struct KernelState {
    pub(crate) tasks: TaskTable,
    pub(crate) sched: SchedState,
    pub(crate) ipc: IpcPools,
}

impl KernelState {
    fn new(policy: Policy) -> Self {
        KernelState {
            tasks: TaskTable::new(),
            sched: SchedState::new(policy),
            ipc: IpcPools::new(),
        }
    }
}

pub(crate) struct KernelShared {
    running: AtomicBool,
    pub(crate) time: TimeBase,
    pub(crate) state: CsCell<KernelState>,
    /// Parking spot for the thread that called `start`
    boot: ContextHandle,
}

/// Handle to a simulated kernel instance.
///
/// Clones share the same kernel; task entry closures typically capture a
/// clone to reach the kernel API.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelShared>,
}

fn idle_task(kernel: Kernel) {
    while kernel.is_running() {
        kernel.task_yield();
        std::thread::yield_now();
    }
}

impl Kernel {
    /// Initialize a kernel with the given scheduling policy.
    ///
    /// Creates the idle task at the lowest priority; it exists until
    /// [`shutdown`](Kernel::shutdown).
    pub fn new(policy: Policy) -> OsResult<Kernel> {
        log::info!("initializing kernel with policy {}", policy);
        let kernel = Kernel {
            inner: Arc::new(KernelShared {
                running: AtomicBool::new(false),
                time: TimeBase::new(),
                state: CsCell::new(KernelState::new(policy)),
                boot: ContextHandle::new(),
            }),
        };

        let idle_kernel = kernel.clone();
        let idle = kernel.task_create("idle", IDLE_PRIORITY, DEFAULT_STACK_SIZE / 2, move || {
            idle_task(idle_kernel)
        })?;
        critical_section(|cs| {
            kernel.shared().state.get(cs).tasks.idle = Some(idle);
        });

        log::info!("kernel initialized with idle task");
        Ok(kernel)
    }

    #[inline]
    pub(crate) fn shared(&self) -> &KernelShared {
        &self.inner
    }

    /// Whether the scheduler is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start multitasking: dispatch the highest-priority ready task and
    /// park the calling thread. Returns once [`stop`](Kernel::stop) is
    /// called.
    pub fn start(&self) -> OsResult<()> {
        let now = self.shared().time.now();
        let first = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.state == SchedulerState::Running {
                log::warn!("scheduler already running");
                return Err(OsError::AlreadyRunning);
            }
            st.sched.state = SchedulerState::Running;
            match sched::dispatch_next(st, now, false) {
                Some(baton) => Ok(baton),
                None => {
                    st.sched.state = SchedulerState::Stopped;
                    log::error!("no tasks ready to run");
                    Err(OsError::NotRunning)
                }
            }
        })?;

        self.inner.running.store(true, Ordering::Release);
        log::info!("starting scheduler");
        first.resume(Resume::Run);

        self.inner.boot.park();
        log::info!("scheduler stopped");
        Ok(())
    }

    /// Stop the scheduler. The thread parked in [`start`](Kernel::start)
    /// returns; running tasks wind down at their next kernel call.
    pub fn stop(&self) -> OsResult<()> {
        let was_running = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.state == SchedulerState::Stopped {
                false
            } else {
                st.sched.state = SchedulerState::Stopped;
                true
            }
        });
        if !was_running {
            log::warn!("scheduler already stopped");
            return Ok(());
        }
        self.inner.running.store(false, Ordering::Release);
        log::info!("stopping scheduler");
        self.inner.boot.resume(Resume::Run);
        Ok(())
    }

    /// Tear the kernel down: stop the scheduler, unwind every task
    /// context, and join their threads. Call after `start` has returned.
    pub fn shutdown(&self) {
        let _ = self.stop();
        let contexts = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.sched.ready.clear();
            st.sched.blocked.clear();
            st.sched.suspended.clear();
            crate::sync::clear_waiters(st);
            st.tasks.drain()
        });

        let me = std::thread::current().id();
        for mut ctx in contexts {
            ctx.baton().resume(Resume::Exit);
            if ctx.thread_id() != me {
                if let Some(handle) = ctx.take_thread() {
                    let _ = handle.join();
                }
            }
        }
        log::info!("kernel shut down");
    }
}
