//! Event: a level-triggered signal.
//!
//! Tasks wait until the event is set; `set` wakes every current waiter
//! and stays set so late waiters never block, until `clear` resets it.
//! Clearing does not disturb tasks already woken.

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::runtime::Runtime;
use crate::task::WaitQueueRef;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A one-to-many signalling primitive.
///
/// Clones share the same state.
///
/// # Example
///
/// ```ignore
/// let event = Event::new(&rt);
/// let waiter = {
///     let event = event.clone();
///     rt.create_task(async move { event.wait().await })
/// };
/// event.set(); // waiter resumes with Ok(true)
/// ```
#[derive(Clone)]
pub struct Event {
    rt: Runtime,
    set: Rc<Cell<bool>>,
    waiting: WaitQueueRef,
}

impl Event {
    /// Creates an unset event on the given runtime.
    #[must_use]
    pub fn new(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            set: Rc::new(Cell::new(false)),
            waiting: Rc::new(RefCell::new(TaskQueue::new())),
        }
    }

    /// Non-blocking read of the event state.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.get()
    }

    /// Sets the event: drains the waiting FIFO into the run queue, then
    /// marks the event set. No-op if already set.
    pub fn set(&self) {
        if self.set.get() {
            return;
        }
        loop {
            let next = self.waiting.borrow_mut().pop_head();
            match next {
                Some(task) => self.rt.wake_task(task),
                None => break,
            }
        }
        self.set.set(true);
    }

    /// Resets the event without disturbing already-woken tasks.
    pub fn clear(&self) {
        self.set.set(false);
    }

    /// Waits until the event is set. Returns `Ok(true)` immediately if
    /// it already is, with no suspension.
    #[must_use]
    pub fn wait(&self) -> EventWait {
        EventWait {
            event: self.clone(),
            queued: false,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("set", &self.set.get())
            .field("waiting", &self.waiting.borrow().len())
            .finish()
    }
}

/// Future returned by [`Event::wait`].
#[derive(Debug)]
pub struct EventWait {
    event: Event,
    queued: bool,
}

impl Future for EventWait {
    type Output = Result<bool>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.event.rt.take_injected() {
            return Poll::Ready(Err(error));
        }
        if self.queued || self.event.is_set() {
            return Poll::Ready(Ok(true));
        }
        self.event.rt.park_current_in(&self.event.waiting);
        self.queued = true;
        Poll::Pending
    }
}
