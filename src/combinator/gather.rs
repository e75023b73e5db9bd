//! Fan-in combinator: await a set of tasks and collect their results.
//!
//! Every future is promoted to a task carrying a completion callback
//! that decrements a shared pending count. The caller suspends with no
//! queue membership; the callback that settles the race (first
//! disqualifying failure, or the count reaching zero) wakes it. Results
//! are collected in argument order regardless of completion order.
//!
//! On a first failure, [`gather`] re-raises it; the remaining sub-tasks
//! are left running and their outcomes are discarded. An external
//! cancellation of the gather itself does cancel every sub-task still
//! running.

use crate::error::{Error, Result};
use crate::runtime::{Runtime, RuntimeState};
use crate::task::{TaskHandle, TaskId, TaskState};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

struct GatherState {
    caller: TaskId,
    pending: usize,
    failure: Option<Error>,
    settled: bool,
}

/// Awaits every future, failing fast on the first failure.
///
/// Returns the results in argument order. With no futures, returns an
/// empty vector without suspending. On the first sub-task failure the
/// error is re-raised immediately; later outcomes are discarded and the
/// remaining sub-tasks are not cancelled by this path.
pub async fn gather<F, T>(rt: &Runtime, futures: Vec<F>) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let handles = gather_inner(rt, futures, false).await?;
    let mut values = Vec::with_capacity(handles.len());
    for handle in handles {
        values.push(handle.take_finished()?);
    }
    Ok(values)
}

/// Awaits every future, collecting each outcome instead of failing fast.
///
/// The per-task `Result`s come back in argument order; the call itself
/// only fails if the gather is cancelled externally.
pub async fn gather_results<F, T>(rt: &Runtime, futures: Vec<F>) -> Result<Vec<Result<T>>>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    let handles = gather_inner(rt, futures, true).await?;
    Ok(handles.into_iter().map(TaskHandle::take_finished).collect())
}

/// Spawns the futures, wires up the completion callbacks and waits for
/// the race to settle. Returns the handles once every outcome the caller
/// will read is stored.
async fn gather_inner<F, T>(
    rt: &Runtime,
    futures: Vec<F>,
    return_exceptions: bool,
) -> Result<Vec<TaskHandle<T>>>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    if futures.is_empty() {
        return Ok(Vec::new());
    }

    let caller = rt.current_id();
    let state = Rc::new(RefCell::new(GatherState {
        caller,
        pending: futures.len(),
        failure: None,
        settled: false,
    }));

    let handles: Vec<TaskHandle<T>> = futures.into_iter().map(|f| rt.create_task(f)).collect();
    for handle in &handles {
        let shared = state.clone();
        let immediate = rt.attach_on_complete(
            handle.id(),
            Box::new(move |rt_state, _id, failure| {
                on_child_complete(rt_state, &shared, failure, return_exceptions);
            }),
        );
        // A freshly spawned sub-task has not run yet, so the
        // already-done branch cannot normally trigger; handled anyway.
        if let Some(failure) = immediate {
            let mut s = state.borrow_mut();
            s.pending -= 1;
            if let Some(err) = failure {
                if !return_exceptions && s.failure.is_none() {
                    s.failure = Some(err);
                    s.settled = true;
                }
            }
        }
    }

    let wait_result = {
        let already_settled = {
            let s = state.borrow();
            s.settled || s.pending == 0
        };
        if already_settled {
            Ok(())
        } else {
            GatherWait {
                rt: rt.clone(),
                queued: false,
            }
            .await
        }
    };

    match wait_result {
        Ok(()) => {
            let failure = state.borrow_mut().failure.take();
            match failure {
                // First disqualifying failure wins; siblings keep
                // running detached and their outcomes are discarded.
                Some(err) => {
                    discard_outcomes(rt, &handles);
                    Err(err)
                }
                None => Ok(handles),
            }
        }
        Err(cancellation) => {
            // The gather itself was cancelled: take the still-running
            // sub-tasks down with it.
            state.borrow_mut().settled = true;
            for handle in &handles {
                handle.cancel();
            }
            discard_outcomes(rt, &handles);
            Err(cancellation)
        }
    }
}

/// Consumes the stored outcome of every already-finished sub-task so
/// dropping the handles does not re-report an error the gather is about
/// to raise (or supersede) itself.
fn discard_outcomes<T>(rt: &Runtime, handles: &[TaskHandle<T>]) {
    for handle in handles {
        let _ = rt.take_outcome(handle.id());
    }
}

fn on_child_complete(
    rt_state: &mut RuntimeState,
    shared: &Rc<RefCell<GatherState>>,
    failure: Option<Error>,
    return_exceptions: bool,
) {
    let caller = {
        let mut s = shared.borrow_mut();
        if s.settled {
            return;
        }
        s.pending -= 1;
        let fire = match failure {
            Some(err) if !return_exceptions => {
                s.failure = Some(err);
                true
            }
            _ => s.pending == 0,
        };
        if !fire {
            return;
        }
        s.settled = true;
        s.caller
    };
    // The caller may have left the wait already (external cancellation
    // delivered between this child finishing and the caller resuming).
    let still_parked = rt_state
        .tasks
        .get(caller.arena_index())
        .is_some_and(|record| matches!(record.state, TaskState::Waiting));
    if still_parked {
        rt_state.wake(caller);
    }
}

/// Suspends the gathering task until a completion callback wakes it.
struct GatherWait {
    rt: Runtime,
    queued: bool,
}

impl Future for GatherWait {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.rt.take_injected() {
            return Poll::Ready(Err(error));
        }
        if self.queued {
            return Poll::Ready(Ok(()));
        }
        self.rt.park_current_detached();
        self.queued = true;
        Poll::Pending
    }
}
