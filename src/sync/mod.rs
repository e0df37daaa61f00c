//! Synchronization primitives
//!
//! Semaphores, mutexes, message queues, and event flag groups. Each
//! primitive lives in a fixed-capacity slot pool and owns its waiter
//! list(s); handles are slot indices qualified by a generation so stale
//! handles are rejected after deletion.

pub mod event;
pub mod mutex;
pub mod queue;
pub mod sem;

pub use event::EventGroup;
pub use mutex::Mutex;
pub use queue::Queue;
pub use sem::Semaphore;

use crate::config::{MAX_QUEUES, MAX_SEMAPHORES};
use crate::kernel::KernelState;
use crate::sched::remove_id;
use crate::task::WaitObject;
use crate::types::{BlockReason, TaskId};

use event::EventState;
use mutex::MutexState;
use queue::QueueState;
use sem::SemState;

/// Fixed-capacity slot pool with generation-checked handles
pub(crate) struct Pool<T> {
    slots: Vec<Option<T>>,
    gens: Vec<u16>,
}

impl<T> Pool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Pool {
            slots: (0..capacity).map(|_| None).collect(),
            gens: vec![0; capacity],
        }
    }

    pub(crate) fn alloc(&mut self, item: T) -> Option<(u16, u16)> {
        let index = self.slots.iter().position(|s| s.is_none())?;
        self.slots[index] = Some(item);
        Some((index as u16, self.gens[index]))
    }

    pub(crate) fn free(&mut self, index: u16, gen: u16) -> Option<T> {
        self.get(index, gen)?;
        let item = self.slots[index as usize].take();
        self.gens[index as usize] = self.gens[index as usize].wrapping_add(1);
        item
    }

    pub(crate) fn get(&self, index: u16, gen: u16) -> Option<&T> {
        if *self.gens.get(index as usize)? != gen {
            return None;
        }
        self.slots.get(index as usize)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, index: u16, gen: u16) -> Option<&mut T> {
        if *self.gens.get(index as usize)? != gen {
            return None;
        }
        self.slots.get_mut(index as usize)?.as_mut()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}

/// The IPC slot pools
pub(crate) struct IpcPools {
    pub(crate) sems: Pool<SemState>,
    pub(crate) mutexes: Pool<MutexState>,
    pub(crate) queues: Pool<QueueState>,
    pub(crate) events: Pool<EventState>,
}

impl IpcPools {
    pub(crate) fn new() -> Self {
        IpcPools {
            sems: Pool::new(MAX_SEMAPHORES),
            mutexes: Pool::new(MAX_SEMAPHORES),
            queues: Pool::new(MAX_QUEUES),
            events: Pool::new(MAX_SEMAPHORES),
        }
    }
}

/// Remove a task from whichever waiter list its recorded wait object
/// names. Used by timeout expiry, suspension of a blocked task, and task
/// deletion; waiter lists never hold tasks that stopped waiting.
pub(crate) fn detach_waiter(st: &mut KernelState, id: TaskId) {
    let Some((obj, reason)) = st.tasks.get(id).map(|t| (t.wait_obj, t.block_reason)) else {
        return;
    };
    match obj {
        WaitObject::None => {}
        WaitObject::Sem(sid) => {
            if let Some(sem) = st.ipc.sems.get_mut(sid.index, sid.gen) {
                remove_id(&mut sem.waiters, id);
            }
        }
        WaitObject::Mutex(mid) => {
            if let Some(mutex) = st.ipc.mutexes.get_mut(mid.index, mid.gen) {
                remove_id(&mut mutex.waiters, id);
            }
        }
        WaitObject::Queue(qid) => {
            if let Some(queue) = st.ipc.queues.get_mut(qid.index, qid.gen) {
                match reason {
                    BlockReason::QueueFull => {
                        remove_id(&mut queue.waiting_send, id);
                    }
                    BlockReason::QueueEmpty => {
                        remove_id(&mut queue.waiting_recv, id);
                    }
                    _ => {
                        remove_id(&mut queue.waiting_send, id);
                        remove_id(&mut queue.waiting_recv, id);
                    }
                }
            }
        }
        WaitObject::Event(eid) => {
            if let Some(group) = st.ipc.events.get_mut(eid.index, eid.gen) {
                remove_id(&mut group.waiters, id);
            }
        }
    }
}

/// Drop every waiter reference held by the IPC pools (kernel teardown).
pub(crate) fn clear_waiters(st: &mut KernelState) {
    for sem in st.ipc.sems.iter_mut() {
        sem.waiters.clear();
    }
    for mutex in st.ipc.mutexes.iter_mut() {
        mutex.waiters.clear();
    }
    for queue in st.ipc.queues.iter_mut() {
        queue.waiting_send.clear();
        queue.waiting_recv.clear();
    }
    for group in st.ipc.events.iter_mut() {
        group.waiters.clear();
    }
}
