//! Synchronization primitives built on the task queues.
//!
//! [`Event`] signals one-to-many; [`Lock`] is a mutual-exclusion
//! primitive with FIFO hand-off. Both are built only from task parking
//! and waking; the absence of preemption means no internal locking is
//! needed.

mod event;
mod lock;

pub use event::{Event, EventWait};
pub use lock::{Lock, LockAcquire, LockGuard};
