//! Mutex with priority inheritance
//!
//! Non-recursive binary lock. A contended lock from a higher-priority
//! task raises the owner's effective priority to the caller's, bounding
//! priority inversion; unlock restores the owner's base priority and
//! hands the lock directly to the highest-priority waiter, so the lock
//! never passes through an unlocked window while tasks wait.

use std::collections::VecDeque;

use crate::config::MAX_TIMEOUT;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sched::{block_task, expire_wait, remove_id, set_effective_priority, unblock_task};
use crate::task::{current_on_this_thread, WaitObject};
use crate::types::{BlockReason, MutexId, TaskId, Tick, WakeStatus};

pub(crate) struct MutexState {
    pub(crate) name: String,
    pub(crate) owner: Option<TaskId>,
    pub(crate) waiters: VecDeque<TaskId>,
}

enum LockOutcome {
    Acquired,
    Blocked(TaskId),
}

impl Kernel {
    /// Create a mutex.
    pub fn create_mutex(&self, name: &str) -> OsResult<Mutex> {
        if name.is_empty() {
            log::error!("invalid mutex name");
            return Err(OsError::InvalidArg);
        }
        let state = MutexState {
            name: name.to_string(),
            owner: None,
            waiters: VecDeque::new(),
        };
        let id = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .mutexes
                .alloc(state)
                .map(|(index, gen)| MutexId { index, gen })
                .ok_or(OsError::ObjLimit)
        })?;
        log::info!("created mutex '{}'", name);
        Ok(Mutex {
            kernel: self.clone(),
            id,
        })
    }

    fn mutex_lock(&self, id: MutexId, timeout: Tick) -> OsResult<()> {
        let now = self.now();
        let outcome = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let cur = current_on_this_thread(st).ok_or(OsError::NoCurrentTask)?;
            let owner = {
                let mutex = st
                    .ipc
                    .mutexes
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                match mutex.owner {
                    None => {
                        mutex.owner = Some(cur);
                        return Ok(LockOutcome::Acquired);
                    }
                    Some(owner) if owner == cur => {
                        log::warn!("task attempting to lock mutex '{}' it already owns", mutex.name);
                        return Err(OsError::MutexOwner);
                    }
                    Some(owner) => owner,
                }
            };
            if timeout == 0 {
                return Err(OsError::Timeout);
            }
            if st.tasks.idle == Some(cur) {
                return Err(OsError::TaskIsIdle);
            }
            if st.sched.lock_nesting > 0 {
                return Err(OsError::SchedLocked);
            }

            // Priority inheritance: only ever raises, never lowers.
            let cur_prio = st.tasks.get(cur).ok_or(OsError::ObjInvalid)?.prio;
            let owner_prio = st.tasks.get(owner).ok_or(OsError::ObjInvalid)?.prio;
            if cur_prio < owner_prio {
                set_effective_priority(st, owner, cur_prio);
                log::debug!(
                    "boosted mutex owner priority {} -> {}",
                    owner_prio,
                    cur_prio
                );
            }

            let wake_at = (timeout != MAX_TIMEOUT).then(|| now.wrapping_add(timeout));
            if let Some(mutex) = st.ipc.mutexes.get_mut(id.index, id.gen) {
                mutex.waiters.push_back(cur);
            }
            block_task(st, cur, BlockReason::Mutex, WaitObject::Mutex(id), wake_at)?;
            Ok(LockOutcome::Blocked(cur))
        })?;

        match outcome {
            LockOutcome::Acquired => {
                self.preempt_if_pending();
                Ok(())
            }
            LockOutcome::Blocked(cur) => {
                self.context_switch();
                self.finish_wait(cur).result()
            }
        }
    }

    fn mutex_unlock(&self, id: MutexId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let cur = current_on_this_thread(st).ok_or(OsError::NoCurrentTask)?;
            {
                let mutex = st
                    .ipc
                    .mutexes
                    .get(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                match mutex.owner {
                    None => {
                        log::warn!("attempting to unlock mutex '{}' that is not locked", mutex.name);
                        return Err(OsError::MutexNotOwner);
                    }
                    Some(owner) if owner != cur => {
                        log::warn!("task attempting to unlock mutex '{}' it doesn't own", mutex.name);
                        return Err(OsError::MutexNotOwner);
                    }
                    Some(_) => {}
                }
            }

            // Undo any inheritance boost.
            let (prio, base_prio) = {
                let tcb = st.tasks.get(cur).ok_or(OsError::ObjInvalid)?;
                (tcb.prio, tcb.base_prio)
            };
            if prio != base_prio {
                set_effective_priority(st, cur, base_prio);
            }

            // Direct hand-off to the highest-priority waiter.
            let next_owner = {
                let mutex = st
                    .ipc
                    .mutexes
                    .get(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                let mut best: Option<(TaskId, crate::types::Prio)> = None;
                for &waiter in mutex.waiters.iter() {
                    let Some(wprio) = st.tasks.get(waiter).map(|t| t.prio) else {
                        continue;
                    };
                    let better = match best {
                        None => true,
                        Some((_, bprio)) => wprio < bprio,
                    };
                    if better {
                        best = Some((waiter, wprio));
                    }
                }
                best.map(|(waiter, _)| waiter)
            };

            if let Some(mutex) = st.ipc.mutexes.get_mut(id.index, id.gen) {
                match next_owner {
                    Some(waiter) => {
                        remove_id(&mut mutex.waiters, waiter);
                        mutex.owner = Some(waiter);
                    }
                    None => mutex.owner = None,
                }
            }
            if let Some(waiter) = next_owner {
                unblock_task(st, waiter);
                Ok(true)
            } else {
                Ok(false)
            }
        })?;

        if woke {
            self.context_switch();
        }
        Ok(())
    }

    fn mutex_is_locked(&self, id: MutexId) -> OsResult<bool> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .mutexes
                .get(id.index, id.gen)
                .map(|mutex| mutex.owner.is_some())
                .ok_or(OsError::ObjInvalid)
        })
    }

    fn mutex_delete(&self, id: MutexId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let mutex = st
                .ipc
                .mutexes
                .free(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            if let Some(owner) = mutex.owner {
                log::warn!("deleting locked mutex '{}'", mutex.name);
                let boosted = st
                    .tasks
                    .get(owner)
                    .map(|t| (t.prio, t.base_prio))
                    .filter(|(prio, base)| prio != base);
                if let Some((_, base)) = boosted {
                    set_effective_priority(st, owner, base);
                }
            }
            if !mutex.waiters.is_empty() {
                log::warn!("deleting mutex '{}' with waiting tasks", mutex.name);
            }
            for waiter in mutex.waiters.iter().copied() {
                expire_wait(st, waiter, WakeStatus::Deleted);
            }
            log::info!("deleted mutex '{}'", mutex.name);
            Ok(!mutex.waiters.is_empty())
        })?;

        if woke {
            self.context_switch();
        }
        Ok(())
    }
}

/// Priority-inheritance mutex handle
#[derive(Clone)]
pub struct Mutex {
    kernel: Kernel,
    id: MutexId,
}

impl Mutex {
    /// Lock the mutex, waiting up to `timeout` ticks.
    ///
    /// Locking a mutex the caller already owns fails: the lock is not
    /// recursive.
    pub fn lock(&self, timeout: Tick) -> OsResult<()> {
        self.kernel.mutex_lock(self.id, timeout)
    }

    /// Unlock the mutex. Fails unless the caller is the owner.
    pub fn unlock(&self) -> OsResult<()> {
        self.kernel.mutex_unlock(self.id)
    }

    /// Snapshot of the locked state.
    pub fn is_locked(&self) -> OsResult<bool> {
        self.kernel.mutex_is_locked(self.id)
    }

    /// Delete the mutex; the owner's boosted priority is restored and
    /// waiters wake with an error.
    pub fn delete(&self) -> OsResult<()> {
        self.kernel.mutex_delete(self.id)
    }
}
