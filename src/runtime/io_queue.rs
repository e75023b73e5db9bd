//! The I/O queue: bridges OS readiness events to waiting tasks.
//!
//! Each registered stream (identified by its raw fd) has one reader slot
//! and one writer slot. The poller registration always matches the union
//! of the occupied slots: register on first waiter, modify on
//! upgrade/downgrade, delete once both slots are empty. The poller
//! delivers oneshot notifications, so downgrading after a wakeup also
//! re-arms the remaining direction.
//!
//! Registering a second waiter for an occupied direction is a
//! programming error.

use crate::queue::TaskQueue;
use crate::runtime::arena::Arena;
use crate::task::{TaskData, TaskId, TaskRecord, TaskState};
use crate::time::Ticks;
use polling::{Event, Poller};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Which direction a task waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoDirection {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct IoEntry {
    reader: Option<TaskId>,
    writer: Option<TaskId>,
}

impl IoEntry {
    fn interest(&self, fd: RawFd) -> Event {
        match (self.reader.is_some(), self.writer.is_some()) {
            (true, true) => Event::all(fd as usize),
            (true, false) => Event::readable(fd as usize),
            (false, true) => Event::writable(fd as usize),
            (false, false) => Event::none(fd as usize),
        }
    }

    fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

/// Map stream identity → (reader task, writer task), backed by the OS
/// poller.
pub(crate) struct IoQueue {
    poller: Poller,
    entries: HashMap<RawFd, IoEntry>,
    events: Vec<Event>,
    capacity: usize,
}

impl IoQueue {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            entries: HashMap::new(),
            events: Vec::new(),
            capacity,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `task` as the sole waiter for `dir` on `fd`.
    ///
    /// # Panics
    ///
    /// Panics if another task already waits on that direction.
    pub(crate) fn queue(&mut self, fd: RawFd, dir: IoDirection, task: TaskId) -> io::Result<()> {
        if let Some(entry) = self.entries.get_mut(&fd) {
            let slot = match dir {
                IoDirection::Read => &mut entry.reader,
                IoDirection::Write => &mut entry.writer,
            };
            assert!(
                slot.is_none(),
                "stream already has a task waiting on this direction"
            );
            *slot = Some(task);
            let interest = entry.interest(fd);
            self.poller.modify(fd, interest)?;
        } else {
            let mut entry = IoEntry::default();
            match dir {
                IoDirection::Read => entry.reader = Some(task),
                IoDirection::Write => entry.writer = Some(task),
            }
            self.poller.add(fd, entry.interest(fd))?;
            self.entries.insert(fd, entry);
        }
        Ok(())
    }

    /// Polls for at most `timeout`, waking matching reader/writer tasks
    /// via `push_head`, and deregisters or downgrades each stream whose
    /// slots empty out. Poller errors are reported as both readable and
    /// writable, waking both slots.
    ///
    /// Returns the number of readiness events delivered.
    pub(crate) fn wait_io_event(
        &mut self,
        timeout: Option<Duration>,
        tasks: &mut Arena<TaskRecord>,
        run_queue: &mut TaskQueue,
        now: Ticks,
    ) -> io::Result<usize> {
        self.events.clear();
        if self.events.capacity() < self.capacity {
            self.events.reserve(self.capacity - self.events.capacity());
        }
        let n = self.poller.wait(&mut self.events, timeout)?;

        for i in 0..self.events.len() {
            let event = self.events[i];
            let fd = event.key as RawFd;
            let Some(entry) = self.entries.get_mut(&fd) else {
                continue;
            };

            if event.readable {
                if let Some(task) = entry.reader.take() {
                    wake(task, tasks, run_queue, now);
                }
            }
            if event.writable {
                if let Some(task) = entry.writer.take() {
                    wake(task, tasks, run_queue, now);
                }
            }

            if entry.is_empty() {
                self.entries.remove(&fd);
                // The fd may already have been closed by the transport.
                let _ = self.poller.delete(fd);
            } else {
                let interest = entry.interest(fd);
                self.poller.modify(fd, interest)?;
            }
        }

        Ok(n)
    }

    /// Unlinks a cancelled task, scanning all entries for it.
    pub(crate) fn remove(&mut self, task: TaskId) {
        let mut found: Option<RawFd> = None;
        for (&fd, entry) in &mut self.entries {
            if entry.reader == Some(task) {
                entry.reader = None;
                found = Some(fd);
                break;
            }
            if entry.writer == Some(task) {
                entry.writer = None;
                found = Some(fd);
                break;
            }
        }

        if let Some(fd) = found {
            let entry = &self.entries[&fd];
            if entry.is_empty() {
                self.entries.remove(&fd);
                let _ = self.poller.delete(fd);
            } else {
                let interest = entry.interest(fd);
                let _ = self.poller.modify(fd, interest);
            }
        }
    }
}

impl std::fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoQueue")
            .field("entries", &self.entries)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

fn wake(task: TaskId, tasks: &mut Arena<TaskRecord>, run_queue: &mut TaskQueue, now: Ticks) {
    if let Some(record) = tasks.get_mut(task.arena_index()) {
        record.state = TaskState::Ready;
        record.data = TaskData::None;
        run_queue.push_head(task, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::arena::ArenaIndex;
    use crate::task::TaskValue;
    use std::net::UdpSocket;
    use std::os::unix::io::AsRawFd;

    fn task(n: u32) -> TaskId {
        TaskId::new_for_test(ArenaIndex::new(n, 0))
    }

    #[test]
    fn queue_and_remove_bookkeeping() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let fd = socket.as_raw_fd();
        let mut io = IoQueue::new(16).unwrap();

        assert!(io.is_empty());
        io.queue(fd, IoDirection::Read, task(1)).unwrap();
        io.queue(fd, IoDirection::Write, task(2)).unwrap();
        assert!(!io.is_empty());

        io.remove(task(1));
        assert!(!io.is_empty());
        io.remove(task(2));
        assert!(io.is_empty());

        // Removing an absent task is a no-op.
        io.remove(task(1));
    }

    #[test]
    #[should_panic(expected = "already has a task waiting")]
    fn double_waiter_on_one_direction_panics() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let fd = socket.as_raw_fd();
        let mut io = IoQueue::new(16).unwrap();

        io.queue(fd, IoDirection::Read, task(1)).unwrap();
        io.queue(fd, IoDirection::Read, task(2)).unwrap();
    }

    #[test]
    fn writable_socket_wakes_writer() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let fd = socket.as_raw_fd();
        let mut io = IoQueue::new(16).unwrap();
        let mut tasks = Arena::new();
        let mut run_queue = TaskQueue::new();

        let idx = tasks.insert(TaskRecord::new(Box::pin(async {
            Ok(Box::new(()) as TaskValue)
        })));
        let id = TaskId::from_arena(idx);
        tasks.get_mut(idx).unwrap().state = TaskState::WaitingIo;

        io.queue(fd, IoDirection::Write, id).unwrap();
        let n = io
            .wait_io_event(
                Some(Duration::from_millis(100)),
                &mut tasks,
                &mut run_queue,
                Ticks::ZERO,
            )
            .unwrap();

        assert!(n >= 1);
        assert_eq!(run_queue.pop_head(), Some(id));
        assert!(io.is_empty());
        assert_eq!(tasks.get(idx).unwrap().state, TaskState::Ready);
    }
}
