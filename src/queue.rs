//! The dual-purpose task queue.
//!
//! One container serves both roles the scheduler needs:
//!
//! - the **run queue**, ordered ascending by wraparound-safe wake key
//!   (`push_sorted`, ties stable by insertion order) with a front-insert
//!   for run-immediately wakeups (`push_head`);
//! - every primitive's **wait queue**, a plain FIFO (`push_back`).
//!
//! `remove` is an idempotent O(n) unlink; cancellation races with normal
//! wakeup, so unlinking a task that is no longer queued must be a no-op.
//! None of these operations fail.

use crate::task::TaskId;
use crate::time::Ticks;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    task: TaskId,
    key: Ticks,
}

/// Ordered/FIFO queue of task ids.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    entries: VecDeque<QueueEntry>,
}

impl TaskQueue {
    pub(crate) const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts ascending by wraparound-safe key, after existing entries
    /// with the same key.
    pub(crate) fn push_sorted(&mut self, task: TaskId, key: Ticks) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.key.diff(key) > 0)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, QueueEntry { task, key });
    }

    /// Makes `task` the very next to run.
    pub(crate) fn push_head(&mut self, task: TaskId, now: Ticks) {
        self.entries.push_front(QueueEntry { task, key: now });
    }

    /// Appends in FIFO order (wait-queue use; the key is unused).
    pub(crate) fn push_back(&mut self, task: TaskId) {
        self.entries.push_back(QueueEntry {
            task,
            key: Ticks::ZERO,
        });
    }

    pub(crate) fn pop_head(&mut self) -> Option<TaskId> {
        self.entries.pop_front().map(|e| e.task)
    }

    /// Reads the head's wake key without removing it.
    pub(crate) fn peek_key(&self) -> Option<Ticks> {
        self.entries.front().map(|e| e.key)
    }

    /// Unlinks `task` wherever it sits. No-op if absent.
    pub(crate) fn remove(&mut self, task: TaskId) {
        self.entries.retain(|e| e.task != task);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, task: TaskId) -> bool {
        self.entries.iter().any(|e| e.task == task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::arena::ArenaIndex;
    use crate::time::TICKS_PERIOD;

    fn task(n: u32) -> TaskId {
        TaskId::new_for_test(ArenaIndex::new(n, 0))
    }

    fn key(ms: u32) -> Ticks {
        Ticks::from_raw(ms)
    }

    #[test]
    fn sorted_pops_earliest_first() {
        let mut q = TaskQueue::new();
        q.push_sorted(task(1), key(100));
        q.push_sorted(task(2), key(50));
        q.push_sorted(task(3), key(150));

        assert_eq!(q.peek_key(), Some(key(50)));
        assert_eq!(q.pop_head(), Some(task(2)));
        assert_eq!(q.pop_head(), Some(task(1)));
        assert_eq!(q.pop_head(), Some(task(3)));
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut q = TaskQueue::new();
        q.push_sorted(task(1), key(10));
        q.push_sorted(task(2), key(10));
        q.push_sorted(task(3), key(10));

        assert_eq!(q.pop_head(), Some(task(1)));
        assert_eq!(q.pop_head(), Some(task(2)));
        assert_eq!(q.pop_head(), Some(task(3)));
    }

    #[test]
    fn sorted_insert_is_wraparound_aware() {
        // Keys straddling the wrap point still order by modular distance.
        let near_wrap = key(TICKS_PERIOD - 5);
        let wrapped = near_wrap.wrapping_add(20);

        let mut q = TaskQueue::new();
        q.push_sorted(task(1), wrapped);
        q.push_sorted(task(2), near_wrap);

        assert_eq!(q.pop_head(), Some(task(2)));
        assert_eq!(q.pop_head(), Some(task(1)));
    }

    #[test]
    fn push_head_preempts_sorted_entries() {
        let mut q = TaskQueue::new();
        q.push_sorted(task(1), key(5));
        q.push_head(task(2), key(1000));

        assert_eq!(q.pop_head(), Some(task(2)));
        assert_eq!(q.pop_head(), Some(task(1)));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut q = TaskQueue::new();
        q.push_back(task(1));
        q.push_back(task(2));

        q.remove(task(1));
        q.remove(task(1));

        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_head(), Some(task(2)));
    }

    #[test]
    fn fifo_use() {
        let mut q = TaskQueue::new();
        q.push_back(task(1));
        q.push_back(task(2));

        assert_eq!(q.pop_head(), Some(task(1)));
        assert_eq!(q.pop_head(), Some(task(2)));
        assert_eq!(q.pop_head(), None);
    }
}
