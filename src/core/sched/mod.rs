//! Scheduler
//!
//! Ready-queue-per-priority scheduling with four selection policies, the
//! block/unblock protocol, the tick handler (delay and timeout expiry,
//! periodic release, round-robin time slicing), deadline accounting, and
//! context-switch orchestration.
//!
//! A context switch can only be performed on the thread of the running
//! task; tick work arriving on any other thread latches a pending switch
//! that the running task consumes at its next suspension point. At each
//! switch point the still-running task is re-appended to the tail of its
//! class and competes for reselection, so only a strictly better
//! candidate (higher class, or earlier deadline under EDF) takes the CPU,
//! equals rotate FIFO, and dispatch removes the winner from its queue.

mod queues;

pub(crate) use queues::{remove_id, ReadyQueues};

use std::collections::VecDeque;

use crate::config::MAX_PRIORITY_LEVELS;
use crate::context::{self, ContextHandle, Resume};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, KernelState};
use crate::task::WaitObject;
use crate::time::{tick_after, tick_reached};
use crate::types::{BlockReason, Policy, SchedulerState, TaskId, TaskState, Tick, WakeStatus};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    /// Number of context switches
    pub context_switches: u32,
    /// Number of tasks created
    pub tasks_created: u32,
    /// Number of tasks deleted
    pub tasks_deleted: u32,
    /// Number of scheduling decisions
    pub scheduler_invocations: u32,
    /// Ticks spent in the idle task
    pub idle_time: u32,
    /// Total system uptime in ticks
    pub system_time: u32,
    /// CPU load in [0.0, 1.0], derived from idle time
    pub cpu_load: f32,
    /// Total deadline misses across all tasks
    pub deadline_misses: u32,
}

/// Scheduler state: lists, policy, lock nesting, statistics
pub(crate) struct SchedState {
    pub(crate) state: SchedulerState,
    pub(crate) policy: Policy,
    pub(crate) ready: ReadyQueues,
    pub(crate) blocked: VecDeque<TaskId>,
    pub(crate) suspended: VecDeque<TaskId>,
    pub(crate) lock_nesting: u32,
    pub(crate) switch_pending: bool,
    pub(crate) stats: SchedulerStats,
}

impl SchedState {
    pub(crate) fn new(policy: Policy) -> Self {
        SchedState {
            state: SchedulerState::Stopped,
            policy,
            ready: ReadyQueues::new(),
            blocked: VecDeque::new(),
            suspended: VecDeque::new(),
            lock_nesting: 0,
            switch_pending: false,
            stats: SchedulerStats::default(),
        }
    }
}

// ============ List routing ============

/// Append a task to the ready queue of its current priority
pub(crate) fn ready_insert(st: &mut KernelState, id: TaskId) {
    if let Some(prio) = st.tasks.get(id).map(|t| t.prio) {
        st.sched.ready.push_back(prio, id);
    }
}

/// Remove a task from the ready queue of its current priority
pub(crate) fn ready_remove(st: &mut KernelState, id: TaskId) -> bool {
    match st.tasks.get(id).map(|t| t.prio) {
        Some(prio) => st.sched.ready.remove(prio, id),
        None => false,
    }
}

/// Block a task: record the wait, transition READY (or RUNNING) to
/// BLOCKED, and move it onto the blocked list. `wake_at` arms the bounded
/// timeout; `None` waits forever.
pub(crate) fn block_task(
    st: &mut KernelState,
    id: TaskId,
    reason: BlockReason,
    obj: WaitObject,
    wake_at: Option<Tick>,
) -> OsResult<()> {
    if st.tasks.idle == Some(id) {
        log::error!("cannot block idle task");
        return Err(OsError::TaskIsIdle);
    }
    let state = st.tasks.get(id).ok_or(OsError::ObjInvalid)?.state;
    if state == TaskState::Ready {
        ready_remove(st, id);
    }
    let tcb = st.tasks.get_mut(id).ok_or(OsError::ObjInvalid)?;
    tcb.block_reason = reason;
    tcb.wait_obj = obj;
    tcb.wake_status = WakeStatus::Pending;
    match wake_at {
        Some(tick) => {
            tcb.delay_until = tick;
            tcb.timeout_armed = true;
        }
        None => tcb.timeout_armed = false,
    }
    tcb.state = TaskState::Blocked;
    st.sched.blocked.push_back(id);
    Ok(())
}

/// Success wake: clear the wait, transition BLOCKED to READY, move the
/// task back to its ready queue. Not-blocked targets are a warned no-op.
pub(crate) fn unblock_task(st: &mut KernelState, id: TaskId) {
    let Some(tcb) = st.tasks.get_mut(id) else {
        return;
    };
    if tcb.state != TaskState::Blocked {
        log::warn!("task '{}' is not blocked", tcb.name);
        return;
    }
    tcb.block_reason = BlockReason::None;
    tcb.wait_obj = WaitObject::None;
    tcb.wake_status = WakeStatus::Success;
    tcb.timeout_armed = false;
    tcb.state = TaskState::Ready;
    let prio = tcb.prio;
    remove_id(&mut st.sched.blocked, id);
    st.sched.ready.push_back(prio, id);
}

/// Timeout/deletion wake: make the task READY but leave `block_reason`
/// set, so its pending operation reports failure. The caller is
/// responsible for detaching the task from any waiter list first.
pub(crate) fn expire_wait(st: &mut KernelState, id: TaskId, status: WakeStatus) {
    let Some(tcb) = st.tasks.get_mut(id) else {
        return;
    };
    if tcb.state != TaskState::Blocked {
        return;
    }
    tcb.wake_status = status;
    tcb.timeout_armed = false;
    tcb.state = TaskState::Ready;
    let prio = tcb.prio;
    remove_id(&mut st.sched.blocked, id);
    st.sched.ready.push_back(prio, id);
}

/// Re-route a task's list membership for a programmatic state change.
/// RUNNING and TERMINATED are not valid on either side of the change.
pub(crate) fn update_task_state(
    st: &mut KernelState,
    id: TaskId,
    new_state: TaskState,
) -> OsResult<()> {
    if new_state == TaskState::Running {
        log::error!("cannot set task state to running directly");
        return Err(OsError::InvalidArg);
    }
    let state = st.tasks.get(id).ok_or(OsError::ObjInvalid)?.state;
    if state == new_state {
        return Ok(());
    }
    match state {
        TaskState::Running => {
            log::error!("cannot change running task state directly");
            return Err(OsError::TaskIsCurrent);
        }
        TaskState::Terminated => {
            log::error!("cannot change terminated task state");
            return Err(OsError::ObjInvalid);
        }
        TaskState::Ready => {
            ready_remove(st, id);
        }
        TaskState::Blocked => {
            remove_id(&mut st.sched.blocked, id);
            crate::sync::detach_waiter(st, id);
            if let Some(tcb) = st.tasks.get_mut(id) {
                // The interrupted wait reports a timeout when the task
                // next runs.
                tcb.wake_status = WakeStatus::Timeout;
                tcb.timeout_armed = false;
            }
        }
        TaskState::Suspended => {
            remove_id(&mut st.sched.suspended, id);
        }
    }
    let tcb = st.tasks.get_mut(id).ok_or(OsError::ObjInvalid)?;
    tcb.state = new_state;
    match new_state {
        TaskState::Ready => {
            let prio = tcb.prio;
            st.sched.ready.push_back(prio, id);
        }
        TaskState::Blocked => st.sched.blocked.push_back(id),
        TaskState::Suspended => st.sched.suspended.push_back(id),
        TaskState::Running | TaskState::Terminated => {}
    }
    Ok(())
}

/// Change a task's effective priority, re-queueing it when READY.
/// `base_prio` is untouched; priority inheritance uses this path.
pub(crate) fn set_effective_priority(st: &mut KernelState, id: TaskId, new_prio: crate::types::Prio) {
    let Some((old_prio, state)) = st.tasks.get(id).map(|t| (t.prio, t.state)) else {
        return;
    };
    if old_prio == new_prio {
        return;
    }
    if state == TaskState::Ready {
        st.sched.ready.remove(old_prio, id);
    }
    if let Some(tcb) = st.tasks.get_mut(id) {
        tcb.prio = new_prio;
    }
    if state == TaskState::Ready {
        st.sched.ready.push_back(new_prio, id);
    }
}

// ============ Selection ============

/// Pick the next task to run under the configured policy. Falls back to
/// the idle task via the lowest priority class; `None` only when every
/// class is empty.
pub(crate) fn select_next(st: &KernelState) -> Option<TaskId> {
    if st.sched.policy == Policy::Edf {
        // Earliest absolute deadline among ready periodic tasks.
        let mut best: Option<(TaskId, Tick)> = None;
        for prio in 0..MAX_PRIORITY_LEVELS as u8 {
            for id in st.sched.ready.iter_level(prio) {
                let Some(tcb) = st.tasks.get(id) else { continue };
                if tcb.period == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, deadline)) => tick_after(deadline, tcb.abs_deadline),
                };
                if better {
                    best = Some((id, tcb.abs_deadline));
                }
            }
        }
        if let Some((id, _)) = best {
            return Some(id);
        }
    }
    // PRIORITY, RMS, RR, and the EDF fallback: head of the first
    // non-empty class.
    st.sched.ready.peek_highest()
}

/// Dispatch the next ready task: mark it RUNNING, pull it off its ready
/// queue, and return its context for resumption.
pub(crate) fn dispatch_next(
    st: &mut KernelState,
    now: Tick,
    count_switch: bool,
) -> Option<ContextHandle> {
    let next = select_next(st)?;
    ready_remove(st, next);
    let tcb = st.tasks.get_mut(next)?;
    tcb.state = TaskState::Running;
    tcb.stats.last_start_time = now;
    tcb.stats.activations += 1;
    let baton = tcb.ctx.baton();
    st.tasks.current = Some(next);
    if count_switch {
        st.sched.stats.context_switches += 1;
    }
    Some(baton)
}

// ============ Kernel entry points ============

impl Kernel {
    /// Select the next task and hand control over.
    ///
    /// Skipped while the scheduler is locked (the switch stays pending) or
    /// when invoked off the running task's thread. A same-task selection
    /// returns without switching. The outgoing task, if still RUNNING, is
    /// marked READY and re-appended to its priority class.
    pub(crate) fn context_switch(&self) {
        let now = self.shared().time.now();
        let handoff = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.state != SchedulerState::Running {
                return None;
            }
            if st.sched.lock_nesting > 0 {
                st.sched.switch_pending = true;
                return None;
            }
            let cur_id = st.tasks.current?;
            let on_cur_thread = st
                .tasks
                .get(cur_id)
                .map(|t| t.ctx.thread_id() == std::thread::current().id())
                .unwrap_or(false);
            if !on_cur_thread {
                st.sched.switch_pending = true;
                return None;
            }
            st.sched.stats.scheduler_invocations += 1;

            // A still-running current task competes for reselection from
            // the tail of its class; a task of strictly higher priority
            // (or, under EDF, earlier deadline) wins, a yield among equals
            // rotates, and a stray wakeup of a lower-priority task does
            // not evict the running one.
            let cur_was_running = st.tasks.get(cur_id).map(|t| t.state) == Some(TaskState::Running);
            if cur_was_running {
                if let Some(tcb) = st.tasks.get_mut(cur_id) {
                    tcb.state = TaskState::Ready;
                }
                ready_insert(st, cur_id);
            }

            let next = match select_next(st) {
                Some(next) => next,
                None => return None,
            };
            if next == cur_id {
                ready_remove(st, cur_id);
                if let Some(tcb) = st.tasks.get_mut(cur_id) {
                    tcb.state = TaskState::Running;
                }
                st.sched.switch_pending = false;
                return None;
            }

            let from = {
                let tcb = st.tasks.get_mut(cur_id)?;
                let baton = tcb.ctx.baton();
                if cur_was_running {
                    let runtime = now.wrapping_sub(tcb.stats.last_start_time);
                    tcb.stats.total_runtime = tcb.stats.total_runtime.wrapping_add(runtime);
                    if runtime > tcb.stats.max_execution_time {
                        tcb.stats.max_execution_time = runtime;
                    }
                }
                baton
            };

            ready_remove(st, next);
            let to = {
                let tcb = st.tasks.get_mut(next)?;
                tcb.state = TaskState::Running;
                tcb.stats.last_start_time = now;
                tcb.stats.activations += 1;
                tcb.ctx.baton()
            };
            st.tasks.current = Some(next);
            st.sched.stats.context_switches += 1;
            st.sched.switch_pending = false;
            Some((from, to))
        });

        if let Some((from, to)) = handoff {
            context::switch_context(&from, &to);
        }
    }

    /// Consume a pending switch latched by tick work that arrived on a
    /// foreign thread. Called at suspension points that would otherwise
    /// return without a scheduling decision.
    pub(crate) fn preempt_if_pending(&self) {
        let pending = critical_section(|cs| self.shared().state.get(cs).sched.switch_pending);
        if pending {
            self.context_switch();
        }
    }

    /// Scheduler tick work: expire delays and armed timeouts, release
    /// periodic jobs (with deadline-miss accounting), run the round-robin
    /// slice countdown, and trigger a context switch if anything woke.
    pub(crate) fn sched_tick(&self, now: Tick) {
        let need_switch = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.state != SchedulerState::Running {
                return false;
            }
            st.sched.stats.system_time = st.sched.stats.system_time.wrapping_add(1);
            if st.tasks.current.is_some() && st.tasks.current == st.tasks.idle {
                st.sched.stats.idle_time = st.sched.stats.idle_time.wrapping_add(1);
            }

            let mut wakes = 0u32;

            // Delay expiry and bounded-timeout expiry. A timed-out IPC
            // waiter is detached from its waiter list here, for every
            // primitive alike.
            let blocked: Vec<TaskId> = st.sched.blocked.iter().copied().collect();
            for id in blocked {
                let Some((reason, armed, until)) = st
                    .tasks
                    .get(id)
                    .map(|t| (t.block_reason, t.timeout_armed, t.delay_until))
                else {
                    continue;
                };
                if !armed || !tick_reached(now, until) {
                    continue;
                }
                if reason == BlockReason::Delay {
                    unblock_task(st, id);
                } else {
                    crate::sync::detach_waiter(st, id);
                    expire_wait(st, id, WakeStatus::Timeout);
                }
                wakes += 1;
            }

            // Periodic tasks: miss observation first, then release. A job
            // that never completed (its task still READY or RUNNING past
            // the absolute deadline) is counted exactly once.
            for id in st.tasks.ids() {
                let Some((period, state, abs_deadline, miss_counted)) = st
                    .tasks
                    .get(id)
                    .map(|t| (t.period, t.state, t.abs_deadline, t.miss_counted))
                else {
                    continue;
                };
                if period == 0 {
                    continue;
                }
                if !miss_counted
                    && (state == TaskState::Ready || state == TaskState::Running)
                    && tick_after(now, abs_deadline)
                {
                    if let Some(tcb) = st.tasks.get_mut(id) {
                        tcb.stats.deadline_misses += 1;
                        tcb.miss_counted = true;
                        log::warn!(
                            "task '{}' missed deadline (abs={}, now={})",
                            tcb.name,
                            abs_deadline,
                            now
                        );
                    }
                    st.sched.stats.deadline_misses += 1;
                }

                let Some((next_release, reason)) = st
                    .tasks
                    .get(id)
                    .map(|t| (t.next_release, t.block_reason))
                else {
                    continue;
                };
                if !tick_reached(now, next_release) {
                    continue;
                }
                if let Some(tcb) = st.tasks.get_mut(id) {
                    // The job releasing now owns the deadline derived from
                    // this release point.
                    tcb.abs_deadline = tcb.next_release.wrapping_add(tcb.deadline);
                    tcb.next_release = tcb.next_release.wrapping_add(tcb.period);
                    tcb.miss_counted = false;
                    log::debug!(
                        "released periodic task '{}' (next={}, deadline={})",
                        tcb.name,
                        tcb.next_release,
                        tcb.abs_deadline
                    );
                }
                match (state, reason) {
                    (TaskState::Blocked, BlockReason::Delay) => {
                        unblock_task(st, id);
                        wakes += 1;
                    }
                    (TaskState::Suspended, _) => {
                        let _ = update_task_state(st, id, TaskState::Ready);
                        wakes += 1;
                    }
                    _ => {}
                }
            }

            // Round-robin slice countdown for the running task.
            let mut slice_elapsed = false;
            if st.sched.policy == Policy::RoundRobin {
                if let Some(cur) = st.tasks.current {
                    if st.tasks.idle != Some(cur) {
                        if let Some(tcb) = st.tasks.get_mut(cur) {
                            if tcb.slice_remain > 0 {
                                tcb.slice_remain -= 1;
                            }
                            if tcb.slice_remain == 0 {
                                tcb.slice_remain = tcb.time_slice;
                                slice_elapsed = true;
                            }
                        }
                    }
                }
            }

            if (wakes > 0 || slice_elapsed) && st.sched.lock_nesting == 0 {
                st.sched.switch_pending = true;
                true
            } else {
                false
            }
        });

        if need_switch {
            self.context_switch();
        }
    }

    /// Count periodic tasks currently past their absolute deadline,
    /// updating per-task and system miss counters.
    pub fn check_deadlines(&self) -> u32 {
        let now = self.shared().time.now();
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let mut missed = 0u32;
            for id in st.tasks.ids() {
                let hit = {
                    let Some(tcb) = st.tasks.get_mut(id) else {
                        continue;
                    };
                    if tcb.period > 0
                        && tcb.abs_deadline > 0
                        && tcb.state != TaskState::Terminated
                        && tick_after(now, tcb.abs_deadline)
                    {
                        tcb.stats.deadline_misses += 1;
                        log::warn!(
                            "task '{}' missed deadline (abs={}, now={})",
                            tcb.name,
                            tcb.abs_deadline,
                            now
                        );
                        true
                    } else {
                        false
                    }
                };
                if hit {
                    st.sched.stats.deadline_misses += 1;
                    missed += 1;
                }
            }
            missed
        })
    }

    /// Termination path: the trampoline reports that a task's entry
    /// returned (or panicked). The task leaves contention permanently and
    /// the next ready task is dispatched without parking the caller.
    pub(crate) fn finish_task(&self, id: TaskId, error: Option<&str>) {
        let now = self.shared().time.now();
        let next = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            {
                let Some(tcb) = st.tasks.get(id) else {
                    return None;
                };
                match error {
                    Some(msg) => log::error!("task '{}' terminated: {}", tcb.name, msg),
                    None => log::info!("task '{}' returned from entry, terminating", tcb.name),
                }
            }
            if st.tasks.get(id).map(|t| t.state) == Some(TaskState::Ready) {
                ready_remove(st, id);
            }
            if let Some(tcb) = st.tasks.get_mut(id) {
                tcb.state = TaskState::Terminated;
            }
            if st.tasks.current == Some(id) {
                st.tasks.current = None;
            }
            if st.sched.state != SchedulerState::Running {
                return None;
            }
            dispatch_next(st, now, true)
        });
        if let Some(baton) = next {
            baton.resume(Resume::Run);
        }
    }

    /// Prevent context switches until the matching unlock. Nest-counted.
    pub fn sched_lock(&self) -> OsResult<()> {
        if !self.is_running() {
            return Err(OsError::NotRunning);
        }
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.sched.lock_nesting += 1;
            Ok(())
        })
    }

    /// Undo one level of scheduler lock; the final unlock performs any
    /// pending context switch.
    pub fn sched_unlock(&self) -> OsResult<()> {
        if !self.is_running() {
            return Err(OsError::NotRunning);
        }
        let unlocked = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.lock_nesting == 0 {
                return Err(OsError::SchedNotLocked);
            }
            st.sched.lock_nesting -= 1;
            Ok(st.sched.lock_nesting == 0)
        })?;
        if unlocked {
            self.context_switch();
        }
        Ok(())
    }

    /// Snapshot of scheduler statistics with the CPU load derived from
    /// idle time.
    pub fn stats(&self) -> SchedulerStats {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let mut stats = st.sched.stats;
            stats.cpu_load = if stats.system_time > 0 {
                (1.0 - stats.idle_time as f32 / stats.system_time as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            stats
        })
    }

    /// Reset scheduler statistics, preserving system time and the task
    /// creation/deletion counters.
    pub fn reset_stats(&self) {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let system_time = st.sched.stats.system_time;
            let tasks_created = st.sched.stats.tasks_created;
            let tasks_deleted = st.sched.stats.tasks_deleted;
            st.sched.stats = SchedulerStats {
                system_time,
                tasks_created,
                tasks_deleted,
                ..SchedulerStats::default()
            };
        })
    }

    /// Change the scheduling policy.
    pub fn set_policy(&self, policy: Policy) {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            if st.sched.policy != policy {
                log::info!(
                    "changing scheduling policy from {} to {}",
                    st.sched.policy,
                    policy
                );
                st.sched.policy = policy;
            }
        })
    }

    /// Current scheduling policy.
    pub fn policy(&self) -> Policy {
        critical_section(|cs| self.shared().state.get(cs).sched.policy)
    }

    /// Current scheduler run state.
    pub fn state(&self) -> SchedulerState {
        critical_section(|cs| self.shared().state.get(cs).sched.state)
    }
}
