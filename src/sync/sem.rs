//! Counting semaphore
//!
//! Waiters queue FIFO. A give with waiters present hands the count
//! directly to the head waiter: the increment and its decrement cancel,
//! so the count is untouched.

use std::collections::VecDeque;

use crate::config::MAX_TIMEOUT;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sched::{block_task, expire_wait, unblock_task};
use crate::task::{current_on_this_thread, WaitObject};
use crate::types::{BlockReason, SemCount, SemId, TaskId, Tick, WakeStatus};

pub(crate) struct SemState {
    pub(crate) name: String,
    pub(crate) count: SemCount,
    pub(crate) max_count: SemCount,
    pub(crate) waiters: VecDeque<TaskId>,
}

enum TakeOutcome {
    Acquired,
    Blocked(TaskId),
}

impl Kernel {
    /// Create a counting semaphore.
    pub fn create_semaphore(
        &self,
        name: &str,
        initial_count: SemCount,
        max_count: SemCount,
    ) -> OsResult<Semaphore> {
        if name.is_empty() || max_count == 0 || initial_count > max_count {
            log::error!("invalid semaphore parameters");
            return Err(OsError::InvalidArg);
        }
        let state = SemState {
            name: name.to_string(),
            count: initial_count,
            max_count,
            waiters: VecDeque::new(),
        };
        let id = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .sems
                .alloc(state)
                .map(|(index, gen)| SemId { index, gen })
                .ok_or(OsError::ObjLimit)
        })?;
        log::info!(
            "created semaphore '{}' (count={}, max={})",
            name,
            initial_count,
            max_count
        );
        Ok(Semaphore {
            kernel: self.clone(),
            id,
        })
    }

    fn sem_take(&self, id: SemId, timeout: Tick) -> OsResult<()> {
        let now = self.now();
        let outcome = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            {
                let sem = st
                    .ipc
                    .sems
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                if sem.count > 0 {
                    sem.count -= 1;
                    return Ok(TakeOutcome::Acquired);
                }
                if timeout == 0 {
                    return Err(OsError::Timeout);
                }
            }
            let cur = current_on_this_thread(st).ok_or(OsError::NoCurrentTask)?;
            if st.tasks.idle == Some(cur) {
                return Err(OsError::TaskIsIdle);
            }
            if st.sched.lock_nesting > 0 {
                return Err(OsError::SchedLocked);
            }
            let wake_at = (timeout != MAX_TIMEOUT).then(|| now.wrapping_add(timeout));
            if let Some(sem) = st.ipc.sems.get_mut(id.index, id.gen) {
                sem.waiters.push_back(cur);
            }
            block_task(st, cur, BlockReason::Semaphore, WaitObject::Sem(id), wake_at)?;
            Ok(TakeOutcome::Blocked(cur))
        })?;

        match outcome {
            TakeOutcome::Acquired => {
                self.preempt_if_pending();
                Ok(())
            }
            TakeOutcome::Blocked(cur) => {
                self.context_switch();
                self.finish_wait(cur).result()
            }
        }
    }

    fn sem_give(&self, id: SemId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let waiter = {
                let sem = st
                    .ipc
                    .sems
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                match sem.waiters.pop_front() {
                    Some(waiter) => Some(waiter),
                    None => {
                        if sem.count >= sem.max_count {
                            log::warn!("semaphore '{}' already at maximum count", sem.name);
                            return Err(OsError::SemOverflow);
                        }
                        sem.count += 1;
                        None
                    }
                }
            };
            if let Some(waiter) = waiter {
                unblock_task(st, waiter);
                Ok(true)
            } else {
                Ok(false)
            }
        })?;

        if woke {
            self.context_switch();
        } else {
            self.preempt_if_pending();
        }
        Ok(())
    }

    fn sem_count(&self, id: SemId) -> OsResult<SemCount> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .sems
                .get(id.index, id.gen)
                .map(|sem| sem.count)
                .ok_or(OsError::ObjInvalid)
        })
    }

    fn sem_delete(&self, id: SemId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let sem = st
                .ipc
                .sems
                .free(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            if !sem.waiters.is_empty() {
                log::warn!("deleting semaphore '{}' with waiting tasks", sem.name);
            }
            for waiter in sem.waiters.iter().copied() {
                expire_wait(st, waiter, WakeStatus::Deleted);
            }
            log::info!("deleted semaphore '{}'", sem.name);
            Ok(!sem.waiters.is_empty())
        })?;

        if woke {
            self.context_switch();
        }
        Ok(())
    }
}

/// Counting semaphore handle
#[derive(Clone)]
pub struct Semaphore {
    kernel: Kernel,
    id: SemId,
}

impl Semaphore {
    /// Take (acquire) the semaphore, waiting up to `timeout` ticks.
    ///
    /// A zero timeout never blocks; [`MAX_TIMEOUT`] waits forever.
    pub fn take(&self, timeout: Tick) -> OsResult<()> {
        self.kernel.sem_take(self.id, timeout)
    }

    /// Give (release) the semaphore, waking the longest-waiting taker if
    /// any. Fails when already at the maximum count.
    pub fn give(&self) -> OsResult<()> {
        self.kernel.sem_give(self.id)
    }

    /// Snapshot of the current count.
    pub fn count(&self) -> OsResult<SemCount> {
        self.kernel.sem_count(self.id)
    }

    /// Delete the semaphore; waiters wake with an error.
    pub fn delete(&self) -> OsResult<()> {
        self.kernel.sem_delete(self.id)
    }
}
