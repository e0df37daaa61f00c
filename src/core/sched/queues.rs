//! Scheduler task lists
//!
//! One FIFO ready queue per priority level plus the blocked and suspended
//! lists. Tasks are enqueued at the tail and dispatched from the head; the
//! priority bitmap tracks which classes are non-empty so the highest ready
//! class is found in O(1).

use std::collections::VecDeque;

use crate::config::MAX_PRIORITY_LEVELS;
use crate::prio::PrioTable;
use crate::types::{Prio, TaskId};

/// Ready queues for every priority level
pub(crate) struct ReadyQueues {
    queues: [VecDeque<TaskId>; MAX_PRIORITY_LEVELS],
    prio_tbl: PrioTable,
}

impl ReadyQueues {
    pub(crate) fn new() -> Self {
        ReadyQueues {
            queues: std::array::from_fn(|_| VecDeque::new()),
            prio_tbl: PrioTable::new(),
        }
    }

    /// Append a task at the tail of its priority class
    pub(crate) fn push_back(&mut self, prio: Prio, id: TaskId) {
        self.queues[prio as usize].push_back(id);
        self.prio_tbl.insert(prio);
    }

    /// Remove a specific task from a priority class
    pub(crate) fn remove(&mut self, prio: Prio, id: TaskId) -> bool {
        let queue = &mut self.queues[prio as usize];
        let found = remove_id(queue, id);
        if queue.is_empty() {
            self.prio_tbl.remove(prio);
        }
        found
    }

    /// Head of a priority class
    pub(crate) fn front(&self, prio: Prio) -> Option<TaskId> {
        self.queues[prio as usize].front().copied()
    }

    /// Highest non-empty priority class
    pub(crate) fn highest(&self) -> Option<Prio> {
        self.prio_tbl.get_highest()
    }

    /// Head of the highest non-empty priority class
    pub(crate) fn peek_highest(&self) -> Option<TaskId> {
        self.front(self.highest()?)
    }

    /// Iterate one priority class in queue order
    pub(crate) fn iter_level(&self, prio: Prio) -> impl Iterator<Item = TaskId> + '_ {
        self.queues[prio as usize].iter().copied()
    }

    pub(crate) fn clear(&mut self) {
        for queue in self.queues.iter_mut() {
            queue.clear();
        }
        self.prio_tbl.init();
    }
}

/// Remove a task id from a plain list; `true` if it was present
pub(crate) fn remove_id(list: &mut VecDeque<TaskId>, id: TaskId) -> bool {
    if let Some(pos) = list.iter().position(|&t| t == id) {
        list.remove(pos);
        true
    } else {
        false
    }
}
