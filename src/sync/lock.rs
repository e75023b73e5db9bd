//! Lock: mutual exclusion with FIFO hand-off.
//!
//! Release with waiters does not unlock: ownership is reserved for the
//! next waiter and transferred directly, so `locked()` stays true across
//! the hand-off. If the reserved waiter is cancelled before it confirms,
//! its cancellation path re-enters `release` so the reservation is not
//! leaked. Forced early resumption only ever happens via cancellation
//! (timeouts are built on sleep + cancel), which is what makes this
//! hand-off protocol sound.

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::runtime::Runtime;
use crate::task::{TaskId, WaitQueueRef};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Unlocked,
    Locked,
    /// Hand-off in flight: released to this waiter, not yet confirmed.
    ReservedFor(TaskId),
}

/// A mutual-exclusion primitive for tasks.
///
/// Clones share the same state. `acquire` returns a [`LockGuard`] whose
/// drop releases the lock, so every exit path (normal, error,
/// cancellation) releases exactly once.
#[derive(Clone)]
pub struct Lock {
    rt: Runtime,
    owner: Rc<RefCell<Owner>>,
    waiting: WaitQueueRef,
}

impl Lock {
    /// Creates an unlocked lock on the given runtime.
    #[must_use]
    pub fn new(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            owner: Rc::new(RefCell::new(Owner::Unlocked)),
            waiting: Rc::new(RefCell::new(TaskQueue::new())),
        }
    }

    /// Returns true while the lock is held or a hand-off is in flight.
    #[must_use]
    pub fn locked(&self) -> bool {
        !matches!(*self.owner.borrow(), Owner::Unlocked)
    }

    /// Acquires the lock.
    ///
    /// The fast path (unlocked, no waiters) completes without
    /// suspension; otherwise the task joins the FIFO and suspends until
    /// a releaser hands the lock over.
    #[must_use]
    pub fn acquire(&self) -> LockAcquire {
        LockAcquire {
            lock: self.clone(),
            queued: false,
        }
    }

    /// Releases the lock, handing it to the next waiter if any.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not currently held ("lock not acquired").
    pub fn release(&self) {
        let mut owner = self.owner.borrow_mut();
        assert!(matches!(*owner, Owner::Locked), "lock not acquired");
        let next = self.waiting.borrow_mut().pop_head();
        match next {
            Some(task) => {
                *owner = Owner::ReservedFor(task);
                drop(owner);
                self.rt.wake_task(task);
            }
            None => *owner = Owner::Unlocked,
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("owner", &*self.owner.borrow())
            .field("waiting", &self.waiting.borrow().len())
            .finish()
    }
}

/// Future returned by [`Lock::acquire`].
#[derive(Debug)]
pub struct LockAcquire {
    lock: Lock,
    queued: bool,
}

impl Future for LockAcquire {
    type Output = Result<LockGuard>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.lock.rt.take_injected() {
            // Cancelled while pending. If the hand-off had already
            // reserved the lock for this task, pass it straight on so
            // the reservation is not leaked.
            let me = self.lock.rt.current_id();
            let reserved = {
                let mut owner = self.lock.owner.borrow_mut();
                if *owner == Owner::ReservedFor(me) {
                    *owner = Owner::Locked;
                    true
                } else {
                    false
                }
            };
            if reserved {
                self.lock.release();
            }
            return Poll::Ready(Err(error));
        }

        if !self.queued {
            {
                let mut owner = self.lock.owner.borrow_mut();
                if matches!(*owner, Owner::Unlocked) {
                    *owner = Owner::Locked;
                    return Poll::Ready(Ok(LockGuard {
                        lock: self.lock.clone(),
                    }));
                }
            }
            self.lock.rt.park_current_in(&self.lock.waiting);
            self.queued = true;
            return Poll::Pending;
        }

        // Resumed by a releaser: confirm the reservation.
        let me = self.lock.rt.current_id();
        let mut owner = self.lock.owner.borrow_mut();
        debug_assert!(
            *owner == Owner::ReservedFor(me),
            "lock waiter resumed without a reservation"
        );
        *owner = Owner::Locked;
        drop(owner);
        Poll::Ready(Ok(LockGuard {
            lock: self.lock.clone(),
        }))
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: Lock,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
