//! Event flag group
//!
//! A 32-bit flag word with ALL/ANY wait predicates and optional
//! clear-on-wake. Setting flags walks the waiter list and wakes every
//! task whose predicate became true, recording the satisfying bits in the
//! waiter's TCB at that moment; clearing flags never wakes anyone.

use std::collections::VecDeque;

use crate::config::MAX_TIMEOUT;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sched::{block_task, expire_wait, remove_id, unblock_task};
use crate::task::{current_on_this_thread, WaitObject};
use crate::types::{evt, BlockReason, EventFlags, EventGroupId, TaskId, Tick, WakeStatus};

pub(crate) struct EventState {
    pub(crate) name: String,
    pub(crate) flags: EventFlags,
    pub(crate) waiters: VecDeque<TaskId>,
}

fn predicate_met(flags: EventFlags, mask: EventFlags, options: u8) -> bool {
    if options & evt::WAIT_ALL != 0 {
        flags & mask == mask
    } else {
        flags & mask != 0
    }
}

enum WaitDecision {
    Immediate(EventFlags),
    Blocked(TaskId),
}

impl Kernel {
    /// Create an event flag group with all flags clear.
    pub fn create_event_group(&self, name: &str) -> OsResult<EventGroup> {
        if name.is_empty() {
            log::error!("invalid event group name");
            return Err(OsError::InvalidArg);
        }
        let state = EventState {
            name: name.to_string(),
            flags: 0,
            waiters: VecDeque::new(),
        };
        let id = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .events
                .alloc(state)
                .map(|(index, gen)| EventGroupId { index, gen })
                .ok_or(OsError::ObjLimit)
        })?;
        log::info!("created event group '{}'", name);
        Ok(EventGroup {
            kernel: self.clone(),
            id,
        })
    }

    fn event_set_flags(&self, id: EventGroupId, mask: EventFlags) -> OsResult<EventFlags> {
        let (previous, woke) = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let (previous, waiters) = {
                let group = st
                    .ipc
                    .events
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                let previous = group.flags;
                group.flags |= mask;
                (previous, group.waiters.iter().copied().collect::<Vec<_>>())
            };

            let mut woke = false;
            for waiter in waiters {
                let Some((wmask, wopts)) = st
                    .tasks
                    .get(waiter)
                    .map(|t| (t.flags_wait, t.flags_opt))
                else {
                    continue;
                };
                let flags = st
                    .ipc
                    .events
                    .get(id.index, id.gen)
                    .map(|g| g.flags)
                    .unwrap_or(0);
                if !predicate_met(flags, wmask, wopts) {
                    continue;
                }
                let matched = flags & wmask;
                if let Some(group) = st.ipc.events.get_mut(id.index, id.gen) {
                    if wopts & evt::CLEAR != 0 {
                        group.flags &= !wmask;
                    }
                    remove_id(&mut group.waiters, waiter);
                }
                if let Some(tcb) = st.tasks.get_mut(waiter) {
                    tcb.flags_rdy = matched;
                }
                unblock_task(st, waiter);
                woke = true;
            }
            Ok((previous, woke))
        })?;

        if woke {
            self.context_switch();
        }
        Ok(previous)
    }

    fn event_clear_flags(&self, id: EventGroupId, mask: EventFlags) -> OsResult<EventFlags> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let group = st
                .ipc
                .events
                .get_mut(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            let previous = group.flags;
            group.flags &= !mask;
            Ok(previous)
        })
    }

    fn event_wait(
        &self,
        id: EventGroupId,
        mask: EventFlags,
        options: u8,
        timeout: Tick,
    ) -> OsResult<EventFlags> {
        if mask == 0 {
            log::error!("invalid event wait mask");
            return Err(OsError::InvalidArg);
        }
        let now = self.now();
        let decision = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            {
                let group = st
                    .ipc
                    .events
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                if predicate_met(group.flags, mask, options) {
                    let matched = group.flags & mask;
                    if options & evt::CLEAR != 0 {
                        group.flags &= !mask;
                    }
                    return Ok(WaitDecision::Immediate(matched));
                }
            }
            if timeout == 0 {
                return Err(OsError::Timeout);
            }
            let cur = current_on_this_thread(st).ok_or(OsError::NoCurrentTask)?;
            if st.tasks.idle == Some(cur) {
                return Err(OsError::TaskIsIdle);
            }
            if st.sched.lock_nesting > 0 {
                return Err(OsError::SchedLocked);
            }
            if let Some(tcb) = st.tasks.get_mut(cur) {
                tcb.flags_wait = mask;
                tcb.flags_opt = options;
                tcb.flags_rdy = 0;
            }
            let wake_at = (timeout != MAX_TIMEOUT).then(|| now.wrapping_add(timeout));
            if let Some(group) = st.ipc.events.get_mut(id.index, id.gen) {
                group.waiters.push_back(cur);
            }
            block_task(st, cur, BlockReason::Event, WaitObject::Event(id), wake_at)?;
            Ok(WaitDecision::Blocked(cur))
        })?;

        match decision {
            WaitDecision::Immediate(matched) => {
                self.preempt_if_pending();
                Ok(matched)
            }
            WaitDecision::Blocked(cur) => {
                self.context_switch();
                let outcome = self.finish_wait(cur);
                outcome.result()?;
                Ok(outcome.flags)
            }
        }
    }

    fn event_get_flags(&self, id: EventGroupId) -> OsResult<EventFlags> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .events
                .get(id.index, id.gen)
                .map(|group| group.flags)
                .ok_or(OsError::ObjInvalid)
        })
    }

    fn event_delete(&self, id: EventGroupId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let group = st
                .ipc
                .events
                .free(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            if !group.waiters.is_empty() {
                log::warn!("deleting event group '{}' with waiting tasks", group.name);
            }
            for waiter in group.waiters.iter().copied() {
                expire_wait(st, waiter, WakeStatus::Deleted);
            }
            log::info!("deleted event group '{}'", group.name);
            Ok(!group.waiters.is_empty())
        })?;

        if woke {
            self.context_switch();
        }
        Ok(())
    }
}

/// Event flag group handle
#[derive(Clone)]
pub struct EventGroup {
    kernel: Kernel,
    id: EventGroupId,
}

impl EventGroup {
    /// OR `mask` into the flags, waking satisfied waiters. Returns the
    /// pre-modification flag value.
    pub fn set_flags(&self, mask: EventFlags) -> OsResult<EventFlags> {
        self.kernel.event_set_flags(self.id, mask)
    }

    /// AND-NOT `mask` out of the flags. Never wakes a waiter. Returns the
    /// pre-modification flag value.
    pub fn clear_flags(&self, mask: EventFlags) -> OsResult<EventFlags> {
        self.kernel.event_clear_flags(self.id, mask)
    }

    /// Wait until the flags satisfy `mask` under `options`
    /// ([`evt::WAIT_ALL`]/[`evt::WAIT_ANY`], optionally [`evt::CLEAR`]).
    /// Returns the bits that satisfied the wait.
    pub fn wait(&self, mask: EventFlags, options: u8, timeout: Tick) -> OsResult<EventFlags> {
        self.kernel.event_wait(self.id, mask, options, timeout)
    }

    /// Snapshot of the current flags.
    pub fn get_flags(&self) -> OsResult<EventFlags> {
        self.kernel.event_get_flags(self.id)
    }

    /// Delete the group; waiters wake with an error.
    pub fn delete(&self) -> OsResult<()> {
        self.kernel.event_delete(self.id)
    }
}
