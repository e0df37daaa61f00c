//! Task management
//!
//! The registry table of task control blocks and the task-facing kernel
//! operations: create, delete, suspend, resume, priority, delays, periodic
//! configuration, statistics, and lookup by name.

mod tcb;

pub use tcb::TaskStats;
pub(crate) use tcb::{Tcb, WaitObject};

use std::sync::{Arc, OnceLock};

use crate::config::{DEFAULT_TIME_SLICE, MAX_PRIORITY_LEVELS, MAX_TASKS};
use crate::context::{Resume, TaskContext};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, KernelState};
use crate::sched;
use crate::time::tick_reached;
use crate::types::{BlockReason, Prio, TaskId, TaskState, Tick, WakeStatus};

/// Registry of all tasks in the system
pub(crate) struct TaskTable {
    slots: Vec<Option<Tcb>>,
    gens: Vec<u16>,
    count: usize,
    /// Currently running task
    pub(crate) current: Option<TaskId>,
    /// The idle task, alive from kernel init to teardown
    pub(crate) idle: Option<TaskId>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        TaskTable {
            slots: (0..MAX_TASKS).map(|_| None).collect(),
            gens: vec![0; MAX_TASKS],
            count: 0,
            current: None,
            idle: None,
        }
    }

    pub(crate) fn alloc(&mut self, mut tcb: Tcb) -> Option<TaskId> {
        let index = self.slots.iter().position(|s| s.is_none())?;
        let gen = self.gens[index];
        tcb.gen = gen;
        self.slots[index] = Some(tcb);
        self.count += 1;
        Some(TaskId {
            index: index as u16,
            gen,
        })
    }

    pub(crate) fn free(&mut self, id: TaskId) -> Option<Tcb> {
        self.get(id)?;
        let index = id.index as usize;
        let tcb = self.slots[index].take();
        self.gens[index] = self.gens[index].wrapping_add(1);
        self.count -= 1;
        tcb
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&Tcb> {
        let slot = self.slots.get(id.index as usize)?.as_ref()?;
        (slot.gen == id.gen).then_some(slot)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Tcb> {
        let slot = self.slots.get_mut(id.index as usize)?.as_mut()?;
        (slot.gen == id.gen).then_some(slot)
    }

    /// Snapshot of all live task ids
    pub(crate) fn ids(&self) -> Vec<TaskId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref().map(|tcb| TaskId {
                    index: i as u16,
                    gen: tcb.gen,
                })
            })
            .collect()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<TaskId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref().and_then(|tcb| {
                (tcb.name == name).then_some(TaskId {
                    index: i as u16,
                    gen: tcb.gen,
                })
            })
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Tear every task out of the table, yielding the contexts for reaping
    pub(crate) fn drain(&mut self) -> Vec<TaskContext> {
        self.current = None;
        self.idle = None;
        self.count = 0;
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.take().map(|tcb| tcb.ctx))
            .collect()
    }
}

/// The task registered as current, provided the caller is on its thread
pub(crate) fn current_on_this_thread(st: &KernelState) -> Option<TaskId> {
    let id = st.tasks.current?;
    let tcb = st.tasks.get(id)?;
    (tcb.ctx.thread_id() == std::thread::current().id()).then_some(id)
}

fn truncate_name(name: &str) -> String {
    let max = crate::config::MAX_TASK_NAME_LEN - 1;
    if name.len() <= max {
        name.to_string()
    } else {
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }
}

impl Kernel {
    /// Create a new task.
    ///
    /// The task enters READY state immediately; if the scheduler is running
    /// and the new task outranks the caller, it is dispatched at this call.
    /// The name is truncated to the configured maximum.
    pub fn task_create<F>(
        &self,
        name: &str,
        prio: Prio,
        stack_size: usize,
        entry: F,
    ) -> OsResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        if name.is_empty() || stack_size == 0 {
            log::error!("invalid task parameters");
            return Err(OsError::InvalidArg);
        }
        if (prio as usize) >= MAX_PRIORITY_LEVELS {
            log::error!("invalid task priority {}", prio);
            return Err(OsError::PrioInvalid);
        }

        let name = truncate_name(name);
        let id_cell = Arc::new(OnceLock::new());
        let ctx = TaskContext::spawn(
            self.clone(),
            &name,
            stack_size,
            Box::new(entry),
            id_cell.clone(),
        )?;
        let abort_baton = ctx.baton();

        let tcb = Tcb::new(name.clone(), prio, DEFAULT_TIME_SLICE, ctx);
        let allocated = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let id = st.tasks.alloc(tcb)?;
            sched::ready_insert(st, id);
            st.sched.stats.tasks_created += 1;
            Some(id)
        });

        let id = match allocated {
            Some(id) => id,
            None => {
                abort_baton.resume(Resume::Exit);
                log::error!("task registry full, cannot create '{}'", name);
                return Err(OsError::TaskLimit);
            }
        };
        let _ = id_cell.set(id);

        log::info!(
            "created task '{}', priority={}, stack={} bytes",
            name,
            prio,
            stack_size
        );

        if self.is_running() {
            self.context_switch();
        }
        Ok(id)
    }

    /// Delete a task and reclaim its storage.
    ///
    /// The running task and the idle task cannot be deleted.
    pub fn task_delete(&self, id: TaskId) -> OsResult<()> {
        let mut ctx = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let state = st.tasks.get(id).ok_or(OsError::ObjInvalid)?.state;
            if st.tasks.current == Some(id) {
                log::error!("cannot delete current task");
                return Err(OsError::TaskIsCurrent);
            }
            if st.tasks.idle == Some(id) {
                log::error!("cannot delete idle task");
                return Err(OsError::TaskIsIdle);
            }

            match state {
                TaskState::Ready => {
                    sched::ready_remove(st, id);
                }
                TaskState::Blocked => {
                    sched::remove_id(&mut st.sched.blocked, id);
                    crate::sync::detach_waiter(st, id);
                }
                TaskState::Suspended => {
                    sched::remove_id(&mut st.sched.suspended, id);
                }
                TaskState::Running | TaskState::Terminated => {}
            }

            let tcb = st.tasks.free(id).ok_or(OsError::ObjInvalid)?;
            st.sched.stats.tasks_deleted += 1;
            log::info!("deleted task '{}'", tcb.name);
            Ok(tcb.ctx)
        })?;

        ctx.baton().resume(Resume::Exit);
        if let Some(handle) = ctx.take_thread() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Set a task's priority.
    ///
    /// Expresses caller intent: both the current and the original priority
    /// change, and a READY task is re-queued into its new class.
    pub fn task_set_priority(&self, id: TaskId, prio: Prio) -> OsResult<()> {
        if (prio as usize) >= MAX_PRIORITY_LEVELS {
            return Err(OsError::PrioInvalid);
        }
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks.get(id).ok_or(OsError::ObjInvalid)?;
            sched::set_effective_priority(st, id, prio);
            if let Some(tcb) = st.tasks.get_mut(id) {
                tcb.base_prio = prio;
                log::info!("set task '{}' priority to {}", tcb.name, prio);
            }
            Ok(())
        })?;
        if self.is_running() {
            self.context_switch();
        }
        Ok(())
    }

    /// Get a task's current (possibly inherited) priority.
    pub fn task_priority(&self, id: TaskId) -> OsResult<Prio> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks.get(id).map(|t| t.prio).ok_or(OsError::ObjInvalid)
        })
    }

    /// Suspend a task. Suspending the running task yields at this call.
    pub fn task_suspend(&self, id: TaskId) -> OsResult<()> {
        let was_current = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let state = st.tasks.get(id).ok_or(OsError::ObjInvalid)?.state;
            if st.tasks.idle == Some(id) {
                log::error!("cannot suspend idle task");
                return Err(OsError::TaskIsIdle);
            }
            match state {
                TaskState::Suspended => {
                    log::warn!("task already suspended");
                    return Ok(false);
                }
                TaskState::Terminated => return Err(OsError::ObjInvalid),
                TaskState::Running => {
                    if let Some(tcb) = st.tasks.get_mut(id) {
                        tcb.state = TaskState::Suspended;
                    }
                    st.sched.suspended.push_back(id);
                }
                TaskState::Ready | TaskState::Blocked => {
                    sched::update_task_state(st, id, TaskState::Suspended)?;
                }
            }
            if let Some(tcb) = st.tasks.get(id) {
                log::info!("suspended task '{}'", tcb.name);
            }
            Ok(st.tasks.current == Some(id))
        })?;

        if was_current {
            self.context_switch();
        }
        Ok(())
    }

    /// Resume a suspended task. Resuming a non-suspended task is a no-op
    /// with a warning.
    pub fn task_resume(&self, id: TaskId) -> OsResult<()> {
        let resumed = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let tcb = st.tasks.get(id).ok_or(OsError::ObjInvalid)?;
            if tcb.state != TaskState::Suspended {
                log::warn!("task '{}' is not suspended", tcb.name);
                return Ok(false);
            }
            sched::update_task_state(st, id, TaskState::Ready)?;
            if let Some(tcb) = st.tasks.get(id) {
                log::info!("resumed task '{}'", tcb.name);
            }
            Ok(true)
        })?;

        if resumed && self.is_running() {
            self.context_switch();
        }
        Ok(())
    }

    /// Handle of the currently running task.
    pub fn current_task(&self) -> Option<TaskId> {
        critical_section(|cs| self.shared().state.get(cs).tasks.current)
    }

    /// Yield execution to the next ready task.
    pub fn task_yield(&self) {
        self.context_switch();
    }

    /// Delay the calling task for `ticks` system ticks.
    ///
    /// `task_delay(0)` is equivalent to [`task_yield`](Kernel::task_yield).
    pub fn task_delay(&self, ticks: Tick) -> OsResult<()> {
        let now = self.now();
        self.delay_until_tick(now.wrapping_add(ticks), ticks == 0)
    }

    /// Delay the calling task until the absolute tick `wake_at`.
    ///
    /// A target at or before the current tick is equivalent to a yield.
    pub fn task_delay_until(&self, wake_at: Tick) -> OsResult<()> {
        let now = self.now();
        self.delay_until_tick(wake_at, tick_reached(now, wake_at))
    }

    /// Delay the calling task for approximately `ms` milliseconds.
    pub fn task_delay_ms(&self, ms: u32) -> OsResult<()> {
        self.task_delay(self.ms_to_ticks(ms))
    }

    fn delay_until_tick(&self, wake_at: Tick, yield_only: bool) -> OsResult<()> {
        if !self.is_running() {
            return Err(OsError::NotRunning);
        }
        if yield_only {
            self.task_yield();
            return Ok(());
        }
        let id = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let id = current_on_this_thread(st).ok_or(OsError::NoCurrentTask)?;
            if st.tasks.idle == Some(id) {
                log::error!("cannot delay idle task");
                return Err(OsError::TaskIsIdle);
            }
            if st.sched.lock_nesting > 0 {
                return Err(OsError::SchedLocked);
            }
            sched::block_task(st, id, BlockReason::Delay, WaitObject::None, Some(wake_at))?;
            Ok(id)
        })?;
        self.context_switch();
        self.finish_wait(id);
        Ok(())
    }

    /// Configure a task as periodic with the given period and relative
    /// deadline (both in ticks). A zero deadline means the deadline equals
    /// the period. The first release is one period from now.
    pub fn task_set_periodic(&self, id: TaskId, period: Tick, deadline: Tick) -> OsResult<()> {
        if period == 0 {
            log::error!("invalid period");
            return Err(OsError::InvalidArg);
        }
        let now = self.now();
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let tcb = st.tasks.get_mut(id).ok_or(OsError::ObjInvalid)?;
            tcb.period = period;
            tcb.deadline = if deadline > 0 { deadline } else { period };
            tcb.next_release = now.wrapping_add(period);
            tcb.abs_deadline = tcb.next_release.wrapping_add(tcb.deadline);
            tcb.miss_counted = false;
            log::info!(
                "set task '{}' as periodic (period={}, deadline={})",
                tcb.name,
                tcb.period,
                tcb.deadline
            );
            Ok(())
        })
    }

    /// Snapshot of a task's statistics.
    pub fn task_stats(&self, id: TaskId) -> OsResult<TaskStats> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks.get(id).map(|t| t.stats).ok_or(OsError::ObjInvalid)
        })
    }

    /// Reset a task's statistics.
    pub fn task_reset_stats(&self, id: TaskId) -> OsResult<()> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let tcb = st.tasks.get_mut(id).ok_or(OsError::ObjInvalid)?;
            tcb.stats = TaskStats::default();
            Ok(())
        })
    }

    /// Look a task up by name.
    pub fn task_by_name(&self, name: &str) -> Option<TaskId> {
        critical_section(|cs| self.shared().state.get(cs).tasks.by_name(name))
    }

    /// A task's scheduling state.
    pub fn task_state(&self, id: TaskId) -> OsResult<TaskState> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks.get(id).map(|t| t.state).ok_or(OsError::ObjInvalid)
        })
    }

    /// A task's name.
    pub fn task_name(&self, id: TaskId) -> OsResult<String> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks
                .get(id)
                .map(|t| t.name.clone())
                .ok_or(OsError::ObjInvalid)
        })
    }

    /// The stack size a task's context was created with, in bytes.
    pub fn task_stack_size(&self, id: TaskId) -> OsResult<usize> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.tasks
                .get(id)
                .map(|t| t.ctx.stack_size())
                .ok_or(OsError::ObjInvalid)
        })
    }

    /// Number of live tasks, idle task included.
    pub fn task_count(&self) -> usize {
        critical_section(|cs| self.shared().state.get(cs).tasks.len())
    }

    /// Read the wake outcome after a blocking wait and clear the wait
    /// fields. Returns what the waker recorded.
    pub(crate) fn finish_wait(&self, id: TaskId) -> WaitOutcome {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let Some(tcb) = st.tasks.get_mut(id) else {
                return WaitOutcome {
                    status: WakeStatus::Deleted,
                    msg: None,
                    flags: 0,
                };
            };
            let outcome = WaitOutcome {
                status: tcb.wake_status,
                msg: tcb.msg_in.take(),
                flags: tcb.flags_rdy,
            };
            tcb.wake_status = WakeStatus::Pending;
            tcb.block_reason = BlockReason::None;
            tcb.wait_obj = WaitObject::None;
            tcb.timeout_armed = false;
            tcb.msg_out = None;
            tcb.flags_wait = 0;
            tcb.flags_opt = 0;
            tcb.flags_rdy = 0;
            outcome
        })
    }
}

/// What a blocking wait ended with
pub(crate) struct WaitOutcome {
    pub(crate) status: WakeStatus,
    pub(crate) msg: Option<Box<[u8]>>,
    pub(crate) flags: u32,
}

impl WaitOutcome {
    /// Map the wake status onto the standard result convention.
    pub(crate) fn result(&self) -> OsResult<()> {
        match self.status {
            WakeStatus::Success => Ok(()),
            WakeStatus::Deleted => Err(OsError::ObjDeleted),
            WakeStatus::Timeout | WakeStatus::Pending => Err(OsError::Timeout),
        }
    }
}
