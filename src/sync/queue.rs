//! Bounded message queue
//!
//! FIFO ring of fixed-size records with waiter lists in both directions.
//! When one side is saturated and the other side has a blocked peer, the
//! transfer bypasses the ring: a send to an empty queue with a blocked
//! receiver copies straight into the receiver's delivery slot, and a
//! receive that vacates a slot adopts a blocked sender's pending message
//! into the ring.

use std::collections::VecDeque;

use crate::config::MAX_TIMEOUT;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sched::{block_task, expire_wait, unblock_task};
use crate::task::{current_on_this_thread, WaitObject};
use crate::types::{BlockReason, QueueId, TaskId, Tick, WakeStatus};

pub(crate) struct QueueState {
    pub(crate) name: String,
    buffer: Box<[u8]>,
    msg_size: usize,
    capacity: usize,
    count: usize,
    head: usize,
    tail: usize,
    pub(crate) waiting_send: VecDeque<TaskId>,
    pub(crate) waiting_recv: VecDeque<TaskId>,
}

impl QueueState {
    fn put(&mut self, msg: &[u8]) {
        let offset = self.tail * self.msg_size;
        self.buffer[offset..offset + self.msg_size].copy_from_slice(msg);
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
    }

    fn take(&mut self, out: &mut [u8]) {
        let offset = self.head * self.msg_size;
        out.copy_from_slice(&self.buffer[offset..offset + self.msg_size]);
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
    }
}

enum SendOutcome {
    Done,
    DoneWoke,
    Blocked(TaskId),
}

enum RecvOutcome {
    Done,
    DoneWoke,
    Blocked(TaskId),
}

impl Kernel {
    /// Create a bounded queue of `capacity` records of `msg_size` bytes.
    pub fn create_queue(&self, name: &str, msg_size: usize, capacity: usize) -> OsResult<Queue> {
        if name.is_empty() || msg_size == 0 || capacity == 0 {
            log::error!("invalid queue parameters");
            return Err(OsError::InvalidArg);
        }
        let state = QueueState {
            name: name.to_string(),
            buffer: vec![0u8; msg_size * capacity].into_boxed_slice(),
            msg_size,
            capacity,
            count: 0,
            head: 0,
            tail: 0,
            waiting_send: VecDeque::new(),
            waiting_recv: VecDeque::new(),
        };
        let id = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .queues
                .alloc(state)
                .map(|(index, gen)| QueueId { index, gen })
                .ok_or(OsError::ObjLimit)
        })?;
        log::info!(
            "created queue '{}' (size={}, capacity={})",
            name,
            msg_size,
            capacity
        );
        Ok(Queue {
            kernel: self.clone(),
            id,
        })
    }

    fn queue_send(&self, id: QueueId, msg: &[u8], timeout: Tick) -> OsResult<()> {
        let now = self.now();
        let outcome = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let receiver = {
                let queue = st
                    .ipc
                    .queues
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                if msg.len() != queue.msg_size {
                    log::error!("message size {} != queue record size {}", msg.len(), queue.msg_size);
                    return Err(OsError::MsgSizeInvalid);
                }
                if queue.count == 0 {
                    queue.waiting_recv.pop_front()
                } else {
                    None
                }
            };

            // Rendezvous fast path: a receiver is parked on the empty
            // queue, so the message bypasses the ring.
            if let Some(receiver) = receiver {
                if let Some(tcb) = st.tasks.get_mut(receiver) {
                    tcb.msg_in = Some(msg.to_vec().into_boxed_slice());
                }
                unblock_task(st, receiver);
                return Ok(SendOutcome::DoneWoke);
            }

            {
                let queue = st
                    .ipc
                    .queues
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                if queue.count < queue.capacity {
                    queue.put(msg);
                    return Ok(SendOutcome::Done);
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
                tcb.msg_out = Some(msg.to_vec().into_boxed_slice());
            }
            let wake_at = (timeout != MAX_TIMEOUT).then(|| now.wrapping_add(timeout));
            if let Some(queue) = st.ipc.queues.get_mut(id.index, id.gen) {
                queue.waiting_send.push_back(cur);
            }
            block_task(st, cur, BlockReason::QueueFull, WaitObject::Queue(id), wake_at)?;
            Ok(SendOutcome::Blocked(cur))
        })?;

        match outcome {
            SendOutcome::Done => {
                self.preempt_if_pending();
                Ok(())
            }
            SendOutcome::DoneWoke => {
                self.context_switch();
                Ok(())
            }
            SendOutcome::Blocked(cur) => {
                self.context_switch();
                self.finish_wait(cur).result()
            }
        }
    }

    fn queue_receive(&self, id: QueueId, out: &mut [u8], timeout: Tick) -> OsResult<()> {
        let now = self.now();
        let outcome = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let empty = {
                let queue = st
                    .ipc
                    .queues
                    .get(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                if out.len() != queue.msg_size {
                    log::error!("buffer size {} != queue record size {}", out.len(), queue.msg_size);
                    return Err(OsError::MsgSizeInvalid);
                }
                queue.count == 0
            };

            if empty {
                // Rendezvous fast path: take a blocked sender's message
                // directly.
                let sender = {
                    let queue = st
                        .ipc
                        .queues
                        .get_mut(id.index, id.gen)
                        .ok_or(OsError::ObjInvalid)?;
                    queue.waiting_send.pop_front()
                };
                if let Some(sender) = sender {
                    let msg = st.tasks.get_mut(sender).and_then(|t| t.msg_out.take());
                    match msg {
                        Some(msg) => out.copy_from_slice(&msg),
                        None => log::error!("blocked sender carried no message"),
                    }
                    unblock_task(st, sender);
                    return Ok(RecvOutcome::DoneWoke);
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
                let wake_at = (timeout != MAX_TIMEOUT).then(|| now.wrapping_add(timeout));
                if let Some(queue) = st.ipc.queues.get_mut(id.index, id.gen) {
                    queue.waiting_recv.push_back(cur);
                }
                block_task(st, cur, BlockReason::QueueEmpty, WaitObject::Queue(id), wake_at)?;
                return Ok(RecvOutcome::Blocked(cur));
            }

            // Normal dequeue; a vacated slot adopts a blocked sender's
            // pending message.
            let sender = {
                let queue = st
                    .ipc
                    .queues
                    .get_mut(id.index, id.gen)
                    .ok_or(OsError::ObjInvalid)?;
                queue.take(out);
                queue.waiting_send.pop_front()
            };
            if let Some(sender) = sender {
                let msg = st.tasks.get_mut(sender).and_then(|t| t.msg_out.take());
                if let Some(msg) = msg {
                    if let Some(queue) = st.ipc.queues.get_mut(id.index, id.gen) {
                        queue.put(&msg);
                    }
                }
                unblock_task(st, sender);
                return Ok(RecvOutcome::DoneWoke);
            }
            Ok(RecvOutcome::Done)
        })?;

        match outcome {
            RecvOutcome::Done => {
                self.preempt_if_pending();
                Ok(())
            }
            RecvOutcome::DoneWoke => {
                self.context_switch();
                Ok(())
            }
            RecvOutcome::Blocked(cur) => {
                self.context_switch();
                let outcome = self.finish_wait(cur);
                outcome.result()?;
                match outcome.msg {
                    Some(msg) => {
                        out.copy_from_slice(&msg);
                        Ok(())
                    }
                    None => {
                        log::error!("woken receiver had no delivered message");
                        Err(OsError::Timeout)
                    }
                }
            }
        }
    }

    fn queue_peek(&self, id: QueueId, out: &mut [u8]) -> OsResult<()> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let queue = st
                .ipc
                .queues
                .get(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            if out.len() != queue.msg_size {
                return Err(OsError::MsgSizeInvalid);
            }
            if queue.count == 0 {
                return Err(OsError::QueueEmpty);
            }
            let offset = queue.head * queue.msg_size;
            out.copy_from_slice(&queue.buffer[offset..offset + queue.msg_size]);
            Ok(())
        })
    }

    fn queue_count(&self, id: QueueId) -> OsResult<usize> {
        critical_section(|cs| {
            let st = self.shared().state.get(cs);
            st.ipc
                .queues
                .get(id.index, id.gen)
                .map(|queue| queue.count)
                .ok_or(OsError::ObjInvalid)
        })
    }

    fn queue_delete(&self, id: QueueId) -> OsResult<()> {
        let woke = critical_section(|cs| {
            let st = self.shared().state.get(cs);
            let queue = st
                .ipc
                .queues
                .free(id.index, id.gen)
                .ok_or(OsError::ObjInvalid)?;
            if !queue.waiting_send.is_empty() || !queue.waiting_recv.is_empty() {
                log::warn!("deleting queue '{}' with waiting tasks", queue.name);
            }
            let mut woke = false;
            for waiter in queue
                .waiting_send
                .iter()
                .chain(queue.waiting_recv.iter())
                .copied()
            {
                expire_wait(st, waiter, WakeStatus::Deleted);
                woke = true;
            }
            log::info!("deleted queue '{}'", queue.name);
            Ok(woke)
        })?;

        if woke {
            self.context_switch();
        }
        Ok(())
    }
}

/// Bounded message queue handle
#[derive(Clone)]
pub struct Queue {
    kernel: Kernel,
    id: QueueId,
}

impl Queue {
    /// Send one record, waiting up to `timeout` ticks for space.
    ///
    /// `msg` must be exactly the queue's record size.
    pub fn send(&self, msg: &[u8], timeout: Tick) -> OsResult<()> {
        self.kernel.queue_send(self.id, msg, timeout)
    }

    /// Receive the oldest record into `out`, waiting up to `timeout`
    /// ticks for a message. `out` must be exactly the record size.
    pub fn receive(&self, out: &mut [u8], timeout: Tick) -> OsResult<()> {
        self.kernel.queue_receive(self.id, out, timeout)
    }

    /// Copy the oldest record without consuming it. Fails when empty.
    pub fn peek(&self, out: &mut [u8]) -> OsResult<()> {
        self.kernel.queue_peek(self.id, out)
    }

    /// Snapshot of the number of queued records.
    pub fn count(&self) -> OsResult<usize> {
        self.kernel.queue_count(self.id)
    }

    /// Delete the queue; waiters in both directions wake with an error.
    pub fn delete(&self) -> OsResult<()> {
        self.kernel.queue_delete(self.id)
    }
}
