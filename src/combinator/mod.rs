//! Combinators: timeout, fan-in and cancellation shielding.
//!
//! All of these are built from spawn, sleep and cancellation; the
//! scheduler has no special cases for them. `wait_for` races a task
//! against a deadline, `gather` fans in a set of tasks, `shield` defers
//! cancellation across an awaited sub-task.

mod gather;
mod shield;
mod wait_for;

pub use gather::{gather, gather_results};
pub use shield::shield;
pub use wait_for::{wait_for, wait_for_ms};

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

/// A boxed future, for handing [`gather`] branches with different
/// concrete types.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>>>>;
