//! Microloop: a single-threaded cooperative task scheduler for
//! constrained devices.
//!
//! # Overview
//!
//! Microloop multiplexes many logical tasks (timers, socket I/O,
//! synchronization) onto one execution thread with no OS threads and no
//! preemption. A task runs until it explicitly suspends or terminates;
//! that absence of preemption is the entire concurrency-safety argument,
//! so none of the scheduler's structures needs internal locking.
//!
//! # Core Guarantees
//!
//! - **Ordering**: ready tasks drain before any future-timed task is
//!   considered; timed tasks become eligible in ascending deadline
//!   order, ties stable by insertion order
//! - **Cancellation**: always delivered at the target's actual current
//!   suspension point, never while it is executing; a cancelled task is
//!   moved to the front of the run queue
//! - **Timeouts are not a primitive**: [`wait_for`] is built entirely on
//!   sleep + cancellation
//! - **Deterministic testing**: a virtual clock the loop advances itself
//!   instead of blocking
//!
//! # Module Structure
//!
//! - [`runtime`]: the [`Runtime`] handle and the scheduler loop
//! - [`time`]: wraparound-safe ticks, clock sources, [`Sleep`]
//! - [`sync`]: [`Lock`] and [`Event`]
//! - [`combinator`]: [`wait_for`], [`gather`], [`shield`]
//! - [`stream`]: the suspend/retry I/O discipline over a [`Transport`]
//! - [`net`]: reference TCP transports
//! - [`error`]: the crate-wide [`Error`] type
//!
//! # Example
//!
//! ```no_run
//! use microloop::{Result, Runtime};
//!
//! fn main() -> Result<()> {
//!     let rt = Runtime::new();
//!     let inner = rt.clone();
//!     let result = rt.run_until_complete(async move {
//!         let child = {
//!             let rt = inner.clone();
//!             inner.create_task(async move {
//!                 rt.sleep_ms(10).await?;
//!                 Ok(2)
//!             })
//!         };
//!         let x = child.await?;
//!         Ok(x + 1)
//!     })?;
//!     assert_eq!(result, 3);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod error;
pub mod net;
pub(crate) mod queue;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod task;
pub mod time;
pub(crate) mod tracing_compat;

pub use combinator::{gather, gather_results, shield, wait_for, wait_for_ms, BoxFuture};
pub use error::{Error, Result};
pub use runtime::{ExceptionContext, IoWait, Runtime, RuntimeConfig};
pub use stream::{ListenTransport, Listener, Stream, Transport};
pub use sync::{Event, Lock, LockGuard};
pub use task::{TaskHandle, TaskId};
pub use time::{ClockMode, Sleep, Ticks};
