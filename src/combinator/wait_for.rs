//! Deadline combinator: await an operation for at most a given time.
//!
//! `wait_for` is built entirely on sleep + cancellation, not a separate
//! timer primitive. The target is promoted to a task; a runner task
//! awaits it and, when it finishes, settles a shared race cell and
//! cancels the caller, which is itself just sleeping out the timeout.
//! The settled cell is what distinguishes "the target finished first"
//! from a genuinely external cancellation of the `wait_for` call: a
//! cancellation that arrives with the cell unsettled is re-raised
//! unmodified.
//!
//! Race resolution:
//! 1. sleep elapses first: runner and target are cancelled, `Timeout`.
//! 2. target succeeds first: its value is unwrapped from the cell.
//! 3. target fails first: its error is re-raised from the cell.
//! 4. `wait_for` itself is cancelled: runner and target are cancelled,
//!    the cancellation is re-raised as-is.

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tracing_compat::debug;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

/// Awaits `future` for at most `timeout_ms` milliseconds.
///
/// On deadline elapse the target task is cancelled and
/// [`Error::Timeout`] is returned. Must be called from within a running
/// task.
pub async fn wait_for_ms<F, T>(rt: &Runtime, future: F, timeout_ms: i32) -> Result<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let caller = rt.current_id();
    let target = rt.create_task(future);
    let target_id = target.id();

    // Settled by the runner before it cancels the caller; single-threaded,
    // so settle-then-cancel is atomic with respect to the caller.
    let race: Rc<RefCell<Option<Result<T>>>> = Rc::new(RefCell::new(None));

    let runner = {
        let rt = rt.clone();
        let race = race.clone();
        rt.clone().create_task(async move {
            let outcome = match target.await {
                // The await itself was cancelled: wait_for is tearing
                // down (timeout or external), nothing left to report.
                Err(e) if e.is_cancelled() => return Err(e),
                other => other,
            };
            *race.borrow_mut() = Some(outcome);
            rt.cancel_task(caller);
            Ok(())
        })
    };

    match rt.sleep_ms(timeout_ms).await {
        Ok(()) => {
            // Deadline elapsed before the target finished.
            debug!(task = %target_id, "wait_for deadline elapsed");
            runner.cancel();
            drop(runner);
            rt.cancel_task(target_id);
            Err(Error::timeout())
        }
        Err(cancellation) => match race.borrow_mut().take() {
            // Tagged: the runner cancelled us because the target
            // finished. Unwrap its outcome.
            Some(outcome) => outcome,
            // Untagged: an external cancellation of the wait_for call.
            None => {
                runner.cancel();
                drop(runner);
                rt.cancel_task(target_id);
                Err(cancellation)
            }
        },
    }
}

/// Awaits `future` for at most `timeout`.
///
/// See [`wait_for_ms`].
pub async fn wait_for<F, T>(rt: &Runtime, future: F, timeout: Duration) -> Result<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    wait_for_ms(rt, future, ms).await
}
