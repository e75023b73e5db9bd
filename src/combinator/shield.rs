//! Cancellation shield.
//!
//! Shielding promotes the future to its own task and raises the shield
//! flag: cancelling that task records the request instead of delivering
//! it. Awaiting the returned handle from another task is not shielded:
//! cancelling the *awaiter* unwinds the await as usual while the
//! shielded task keeps running.

use crate::error::Result;
use crate::runtime::Runtime;
use crate::task::TaskHandle;
use std::future::Future;

/// Spawns `future` as a task protected from cancellation.
///
/// The handle can be awaited like any other. Lowering the shield with
/// [`TaskHandle::set_shielded`] re-applies a cancellation recorded while
/// it was up; a shielded task that completes first simply drops the
/// record.
pub fn shield<F, T>(rt: &Runtime, future: F) -> TaskHandle<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let handle = rt.create_task(future);
    handle.set_shielded(true);
    handle
}
