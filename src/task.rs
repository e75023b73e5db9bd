//! Tasks: the scheduling unit wrapping one suspendable computation.
//!
//! A task's record lives in the runtime arena; user code holds a typed
//! [`TaskHandle`]. The record's `data` payload changes meaning with the
//! lifecycle phase ([`TaskData`]): an exception to inject at the next
//! resume, a back-pointer to the queue the task is parked in (so
//! cancellation can unlink it), or the terminal outcome once done.
//!
//! Invariant: a task is a member of at most one queue at a time: the run
//! queue, or one wait queue, or none while running.

use crate::error::{Error, Result};
use crate::queue::TaskQueue;
use crate::runtime::arena::ArenaIndex;
use crate::runtime::{Runtime, RuntimeState};
use crate::time::Ticks;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A unique identifier for a task.
///
/// Wraps an arena index with a generation counter, so an id held after
/// the task is reaped never aliases a newer task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) ArenaIndex);

impl TaskId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a task id for tests.
    #[cfg(test)]
    pub(crate) const fn new_for_test(index: ArenaIndex) -> Self {
        Self(index)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// In the run queue, due now.
    Ready,
    /// In the run queue at a future wake key.
    Timed,
    /// Parked in the I/O queue.
    WaitingIo,
    /// Parked in a primitive's wait queue (or detached, for futures that
    /// wake through the waker).
    Waiting,
    /// Currently being polled.
    Running,
    /// Terminal.
    Done,
}

/// A wait queue shared between a primitive and the records parked in it.
pub(crate) type WaitQueueRef = Rc<RefCell<TaskQueue>>;

/// Where a suspended task is parked, kept as a back-pointer so
/// cancellation can unlink it from its actual suspension site.
#[derive(Clone)]
pub(crate) enum WaitSite {
    /// A primitive's wait queue (Lock, Event, …).
    Queue(WaitQueueRef),
    /// Linked into another task's completion FIFO.
    Joined(TaskId),
    /// Registered in the I/O queue.
    Io,
    /// Suspended in no queue; woken by a callback or an external waker.
    Detached,
}

impl fmt::Debug for WaitSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(_) => write!(f, "Queue"),
            Self::Joined(id) => write!(f, "Joined({id})"),
            Self::Io => write!(f, "Io"),
            Self::Detached => write!(f, "Detached"),
        }
    }
}

/// Type-erased task return value.
pub(crate) type TaskValue = Box<dyn Any>;

/// Terminal result of a task.
pub(crate) type TaskOutcome = std::result::Result<TaskValue, Error>;

/// The stored computation.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome>>>;

/// Completion callback, run by the scheduler when the task finishes.
/// Receives the failure (if any); the outcome itself stays in the record.
pub(crate) type CompleteFn = Box<dyn FnOnce(&mut RuntimeState, TaskId, Option<Error>)>;

/// Payload whose meaning depends on the task's lifecycle phase.
#[derive(Default)]
pub(crate) enum TaskData {
    /// Nothing attached (ready, timed, or running).
    #[default]
    None,
    /// Exception to inject at the next resume point.
    Resume(Error),
    /// Back-pointer to the suspension site.
    Waiting(WaitSite),
    /// Terminal outcome, waiting to be retrieved.
    Finished(TaskOutcome),
}

impl fmt::Debug for TaskData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Resume(e) => write!(f, "Resume({e})"),
            Self::Waiting(site) => write!(f, "Waiting({site:?})"),
            Self::Finished(Ok(_)) => write!(f, "Finished(Ok)"),
            Self::Finished(Err(e)) => write!(f, "Finished(Err({e}))"),
        }
    }
}

/// The runtime-side record of one task.
pub(crate) struct TaskRecord {
    pub(crate) state: TaskState,
    /// Wake tick; valid only while `state` is `Timed`.
    pub(crate) wake_key: Ticks,
    pub(crate) data: TaskData,
    /// Lazily created FIFO of tasks awaiting this one's completion.
    pub(crate) waiters: Option<TaskQueue>,
    /// Completion callback (gather). Mutually exclusive with waiters.
    pub(crate) on_complete: Option<CompleteFn>,
    /// Defers cancellation delivery while set.
    pub(crate) shielded: bool,
    /// Cancellation recorded while shielded, re-applied when the shield
    /// is lifted.
    pub(crate) deferred_cancel: Option<Error>,
    /// The owning handle has been dropped.
    pub(crate) detached: bool,
    pub(crate) future: Option<TaskFuture>,
}

impl TaskRecord {
    pub(crate) fn new(future: TaskFuture) -> Self {
        Self {
            state: TaskState::Ready,
            wake_key: Ticks::ZERO,
            data: TaskData::None,
            waiters: None,
            on_complete: None,
            shielded: false,
            deferred_cancel: None,
            detached: false,
            future: Some(future),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, TaskState::Done)
    }

    /// True once a cancellation has been delivered or recorded and not
    /// yet consumed; a second `cancel` is then a no-op.
    pub(crate) fn cancel_pending(&self) -> bool {
        matches!(self.data, TaskData::Resume(_)) || self.deferred_cancel.is_some()
    }

    pub(crate) fn has_consumer(&self) -> bool {
        self.on_complete.is_some() || self.waiters.as_ref().is_some_and(|q| !q.is_empty())
    }
}

/// Owned, typed surface of a spawned task: await it for the result,
/// cancel it, or shield it from cancellation.
///
/// Dropping the handle detaches the task: it keeps running, and an
/// unhandled failure is routed to the runtime's exception handler
/// instead of an awaiter.
pub struct TaskHandle<T> {
    rt: Runtime,
    id: TaskId,
    consumed: bool,
    _result: PhantomData<fn() -> T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rt: Runtime, id: TaskId) -> Self {
        Self {
            rt,
            id,
            consumed: false,
            _result: PhantomData,
        }
    }

    /// The task's identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns true once the task has reached its terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.rt.task_is_done(self.id)
    }

    /// Requests cancellation.
    ///
    /// Unlinks the task from whatever queue it is parked in, moves it to
    /// the front of the run queue, and injects a cancellation error at
    /// its next resume point. Returns false if the task is already done
    /// or a cancellation is already pending.
    ///
    /// # Panics
    ///
    /// Panics if called on the currently running task.
    pub fn cancel(&self) -> bool {
        self.rt.cancel_task(self.id)
    }

    /// Sets or clears the cancellation shield.
    ///
    /// While shielded, `cancel` records the request instead of delivering
    /// it; clearing the shield re-applies a recorded cancellation.
    pub fn set_shielded(&self, shielded: bool) {
        self.rt.set_shielded(self.id, shielded);
    }

    /// Takes the outcome if the task has finished, consuming the handle
    /// either way.
    pub(crate) fn try_take(mut self) -> Option<Result<T>>
    where
        T: 'static,
    {
        self.consumed = true;
        self.rt
            .take_outcome(self.id)
            .map(|outcome| outcome.map(downcast_value::<T>))
    }

    /// Takes the outcome of a task known to be done (gather's collect
    /// step).
    pub(crate) fn take_finished(self) -> Result<T>
    where
        T: 'static,
    {
        self.try_take()
            .expect("task outcome already taken or task not finished")
    }
}

fn downcast_value<T: 'static>(value: TaskValue) -> T {
    *value
        .downcast::<T>()
        .expect("task outcome downcast to the spawned type")
}

impl<T: 'static> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.consumed, "task handle polled after completion");

        if let Some(err) = self.rt.take_injected() {
            return Poll::Ready(Err(err));
        }

        let rt = self.rt.clone();
        match rt.take_outcome(self.id) {
            Some(outcome) => {
                self.consumed = true;
                Poll::Ready(outcome.map(downcast_value::<T>))
            }
            None => {
                rt.park_current_joined(self.id);
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        self.rt.release_handle(self.id);
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("consumed", &self.consumed)
            .finish()
    }
}
