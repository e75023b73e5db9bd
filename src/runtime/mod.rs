//! The runtime: scheduler state and the `run_until_complete` driver.
//!
//! One [`Runtime`] multiplexes every task onto the calling thread. Each
//! turn of the loop: compute how long the poller may block from the run
//! queue head, deliver I/O readiness, pop the next due task, poll it
//! (injecting a pending cancellation first), and route its completion:
//! to the outer caller for the main task, to waiting tasks or a
//! completion callback otherwise, or to the exception handler for a
//! detached failure.
//!
//! Strictly single-threaded and cooperative: a task runs until it
//! suspends or terminates, which is the entire concurrency-safety
//! argument: no structure here needs a mutex except the waker injector,
//! the one place a `std::task::Waker` (which must be `Send`) re-enters
//! the scheduler.

pub(crate) mod arena;
pub(crate) mod io_queue;

use crate::error::{Error, Result};
use crate::queue::TaskQueue;
use crate::task::{
    CompleteFn, TaskData, TaskHandle, TaskId, TaskOutcome, TaskRecord, TaskState, TaskValue,
    WaitQueueRef, WaitSite,
};
use crate::time::{Clock, ClockMode, Sleep, Ticks};
use crate::tracing_compat::{debug, trace, warn};
use arena::Arena;
use io_queue::{IoDirection, IoQueue};
use std::cell::RefCell;
use std::future::Future;
use std::mem;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

/// Configuration for a [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    clock: ClockMode,
    event_capacity: usize,
}

impl RuntimeConfig {
    /// Creates the default configuration: monotonic clock, 1024-event
    /// poll buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clock: ClockMode::Monotonic,
            event_capacity: 1024,
        }
    }

    /// Selects the tick source.
    #[must_use]
    pub const fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the poll event buffer capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Context passed to the global exception handler.
#[derive(Debug)]
pub struct ExceptionContext<'a> {
    /// What happened.
    pub message: &'a str,
    /// The unretrieved failure.
    pub error: &'a Error,
    /// The task it originated from.
    pub task: TaskId,
}

type HandlerFn = dyn Fn(&Runtime, &ExceptionContext<'_>);

/// Cross-context wakeup mailbox, drained at the top of every turn. This
/// is the only structure a `Waker` (which must be `Send`) touches.
#[derive(Default)]
struct Injector {
    woken: Mutex<Vec<TaskId>>,
}

impl Injector {
    fn push(&self, id: TaskId) {
        let mut woken = match self.woken.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        woken.push(id);
    }

    fn take(&self) -> Vec<TaskId> {
        let mut woken = match self.woken.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mem::take(&mut woken)
    }
}

struct TaskWaker {
    id: TaskId,
    injector: Arc<Injector>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.injector.push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.injector.push(self.id);
    }
}

/// Mutable scheduler state: the task arena and the two process-wide
/// queues, created once at runtime init and alive for its lifetime.
pub(crate) struct RuntimeState {
    pub(crate) tasks: Arena<TaskRecord>,
    pub(crate) run_queue: TaskQueue,
    pub(crate) io: IoQueue,
    pub(crate) clock: Clock,
    pub(crate) current: Option<TaskId>,
    /// Error being injected into the task currently polled; consumed by
    /// the suspension-point future at the top of its poll.
    pub(crate) injection: Option<Error>,
    pub(crate) steps: u64,
}

impl RuntimeState {
    /// Moves a parked task to the front of the run queue.
    pub(crate) fn wake(&mut self, id: TaskId) {
        let now = self.clock.ticks();
        if let Some(record) = self.tasks.get_mut(id.arena_index()) {
            debug_assert!(
                matches!(record.state, TaskState::Waiting | TaskState::WaitingIo),
                "woke a task that was not parked"
            );
            record.state = TaskState::Ready;
            record.data = TaskData::None;
            self.run_queue.push_head(id, now);
        }
    }
}

struct Shared {
    state: RefCell<RuntimeState>,
    handler: RefCell<Rc<HandlerFn>>,
    injector: Arc<Injector>,
}

/// Handle to a single-threaded cooperative scheduler.
///
/// Cheap to clone; every clone refers to the same loop. Constructed once
/// at startup and passed to every primitive's constructor.
#[derive(Clone)]
pub struct Runtime {
    shared: Rc<Shared>,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the OS poller cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::new())
    }

    /// Creates a runtime with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the OS poller cannot be created.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let io = IoQueue::new(config.event_capacity).expect("failed to create I/O poller");
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(RuntimeState {
                    tasks: Arena::new(),
                    run_queue: TaskQueue::new(),
                    io,
                    clock: Clock::new(config.clock),
                    current: None,
                    injection: None,
                    steps: 0,
                }),
                handler: RefCell::new(Rc::new(default_exception_handler)),
                injector: Arc::new(Injector::default()),
            }),
        }
    }

    /// Runs `main` on a fresh runtime to completion.
    pub fn run<F, T>(main: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        Self::new().run_until_complete(main)
    }

    /// Spawns a task. It is enqueued to run immediately and starts at
    /// the caller's next suspension point.
    pub fn create_task<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let wrapped: crate::task::TaskFuture =
            Box::pin(async move { future.await.map(|value| Box::new(value) as TaskValue) });
        let id = {
            let mut state = self.shared.state.borrow_mut();
            let now = state.clock.ticks();
            let index = state.tasks.insert(TaskRecord::new(wrapped));
            let id = TaskId::from_arena(index);
            state.run_queue.push_head(id, now);
            id
        };
        debug!(task = %id, "task spawned");
        TaskHandle::new(self.clone(), id)
    }

    /// Drives the loop until `main` completes, returning its outcome.
    ///
    /// Returns [`Error::Stalled`] if every queue drains while the main
    /// task is still suspended (a deadlock in the task graph).
    pub fn run_until_complete<F, T>(&self, main: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let handle = self.create_task(main);
        let main_id = handle.id();
        let result = self.run_loop(Some(main_id));
        drop(handle);
        match result? {
            Some(outcome) => outcome.map(|value| {
                *value
                    .downcast::<T>()
                    .expect("main task outcome downcast to the spawned type")
            }),
            None => {
                warn!("event loop drained with the main task still suspended");
                Err(Error::Stalled)
            }
        }
    }

    /// Drives already-spawned tasks until both queues drain.
    pub fn run_forever(&self) -> Result<()> {
        self.run_loop(None).map(|_| ())
    }

    /// Sleeps for `delay` milliseconds; negative delays are clamped to
    /// zero (a zero sleep still suspends exactly once).
    #[must_use]
    pub fn sleep_ms(&self, delay: i32) -> Sleep {
        Sleep::new(self.clone(), delay.max(0))
    }

    /// Sleeps for the given duration.
    #[must_use]
    pub fn sleep(&self, delay: Duration) -> Sleep {
        let ms = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        self.sleep_ms(ms)
    }

    /// Suspends the current task until `fd` is readable.
    #[must_use]
    pub fn wait_readable(&self, fd: RawFd) -> IoWait {
        IoWait {
            rt: self.clone(),
            fd,
            dir: IoDirection::Read,
            queued: false,
        }
    }

    /// Suspends the current task until `fd` is writable.
    #[must_use]
    pub fn wait_writable(&self, fd: RawFd) -> IoWait {
        IoWait {
            rt: self.clone(),
            fd,
            dir: IoDirection::Write,
            queued: false,
        }
    }

    /// Current tick reading.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.shared.state.borrow().clock.ticks()
    }

    /// Number of task polls executed so far. Useful for asserting that a
    /// fast path did not suspend.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.shared.state.borrow().steps
    }

    /// The identifier of the task currently being polled, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.shared.state.borrow().current
    }

    /// Returns true when neither the run queue nor the I/O queue holds
    /// any task.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.borrow();
        state.run_queue.is_empty() && state.io.is_empty()
    }

    /// Replaces the global handler for failures of detached tasks.
    ///
    /// The default prints the failure to stderr. The handler must not
    /// raise.
    pub fn set_exception_handler<H>(&self, handler: H)
    where
        H: Fn(&Runtime, &ExceptionContext<'_>) + 'static,
    {
        *self.shared.handler.borrow_mut() = Rc::new(handler);
    }

    // --- crate-internal surface used by primitives -----------------------

    /// Takes the error injected into the currently polled task, if any.
    /// Every suspension-point future calls this first.
    pub(crate) fn take_injected(&self) -> Option<Error> {
        self.shared.state.borrow_mut().injection.take()
    }

    pub(crate) fn current_id(&self) -> TaskId {
        self.shared
            .state
            .borrow()
            .current
            .expect("runtime primitive used outside a running task")
    }

    /// Parks the current task in the run queue at `key`.
    pub(crate) fn park_current_at(&self, key: Ticks) {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let id = state.current.expect("no running task to park");
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("running task record missing");
        record.state = TaskState::Timed;
        record.wake_key = key;
        record.data = TaskData::None;
        state.run_queue.push_sorted(id, key);
    }

    /// Parks the current task in a primitive's wait queue.
    pub(crate) fn park_current_in(&self, queue: &WaitQueueRef) {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let id = state.current.expect("no running task to park");
        queue.borrow_mut().push_back(id);
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("running task record missing");
        record.state = TaskState::Waiting;
        record.data = TaskData::Waiting(WaitSite::Queue(queue.clone()));
    }

    /// Parks the current task in `target`'s completion FIFO.
    pub(crate) fn park_current_joined(&self, target: TaskId) {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let id = state.current.expect("no running task to park");
        let target_record = state
            .tasks
            .get_mut(target.arena_index())
            .expect("awaited task record missing");
        target_record
            .waiters
            .get_or_insert_with(TaskQueue::new)
            .push_back(id);
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("running task record missing");
        record.state = TaskState::Waiting;
        record.data = TaskData::Waiting(WaitSite::Joined(target));
    }

    /// Parks the current task with no queue membership; it is woken by a
    /// completion callback.
    pub(crate) fn park_current_detached(&self) {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let id = state.current.expect("no running task to park");
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("running task record missing");
        record.state = TaskState::Waiting;
        record.data = TaskData::Waiting(WaitSite::Detached);
    }

    /// Registers the current task as reader/writer of `fd` and parks it.
    pub(crate) fn park_current_io(&self, fd: RawFd, dir: IoDirection) -> std::io::Result<()> {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let id = state.current.expect("no running task to park");
        state.io.queue(fd, dir, id)?;
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("running task record missing");
        record.state = TaskState::WaitingIo;
        record.data = TaskData::Waiting(WaitSite::Io);
        Ok(())
    }

    /// Moves a parked task to the front of the run queue (a primitive's
    /// wakeup path; the caller has already unlinked it from the wait
    /// queue).
    pub(crate) fn wake_task(&self, id: TaskId) {
        self.shared.state.borrow_mut().wake(id);
    }

    /// Cancels a task: unlink from wherever it is parked, move it to the
    /// front of the run queue, and inject a cancellation error at its
    /// next resume. See [`TaskHandle::cancel`].
    pub(crate) fn cancel_task(&self, id: TaskId) -> bool {
        let cancelled = {
            let mut guard = self.shared.state.borrow_mut();
            let state = &mut *guard;
            let Some(record) = state.tasks.get_mut(id.arena_index()) else {
                return false;
            };
            if record.is_done() || record.cancel_pending() {
                return false;
            }
            assert!(
                state.current != Some(id),
                "cannot cancel the currently running task"
            );
            if record.shielded {
                record.deferred_cancel = Some(Error::cancelled());
                return true;
            }

            let task_state = record.state;
            let site = match &record.data {
                TaskData::Waiting(site) => Some(site.clone()),
                _ => None,
            };

            match task_state {
                TaskState::Ready => {
                    // Already at or near the front of the run queue;
                    // keep its position.
                }
                TaskState::Timed => {
                    let now = state.clock.ticks();
                    state.run_queue.remove(id);
                    state.run_queue.push_head(id, now);
                }
                TaskState::WaitingIo => {
                    let now = state.clock.ticks();
                    state.io.remove(id);
                    state.run_queue.push_head(id, now);
                }
                TaskState::Waiting => {
                    match site {
                        Some(WaitSite::Queue(queue)) => queue.borrow_mut().remove(id),
                        Some(WaitSite::Joined(target)) => {
                            if let Some(target_record) = state.tasks.get_mut(target.arena_index())
                            {
                                if let Some(waiters) = target_record.waiters.as_mut() {
                                    waiters.remove(id);
                                }
                            }
                        }
                        Some(WaitSite::Io) | Some(WaitSite::Detached) | None => {}
                    }
                    let now = state.clock.ticks();
                    state.run_queue.push_head(id, now);
                }
                TaskState::Running | TaskState::Done => unreachable!(),
            }

            let record = state
                .tasks
                .get_mut(id.arena_index())
                .expect("cancelled task record missing");
            record.state = TaskState::Ready;
            record.data = TaskData::Resume(Error::cancelled());
            true
        };
        if cancelled {
            debug!(task = %id, "task cancelled");
        }
        cancelled
    }

    pub(crate) fn set_shielded(&self, id: TaskId, shielded: bool) {
        let deferred = {
            let mut state = self.shared.state.borrow_mut();
            let Some(record) = state.tasks.get_mut(id.arena_index()) else {
                return;
            };
            record.shielded = shielded;
            if shielded {
                None
            } else {
                record.deferred_cancel.take()
            }
        };
        if deferred.is_some() {
            self.cancel_task(id);
        }
    }

    /// Takes the stored outcome of a finished task.
    pub(crate) fn take_outcome(&self, id: TaskId) -> Option<TaskOutcome> {
        let mut state = self.shared.state.borrow_mut();
        let record = state.tasks.get_mut(id.arena_index())?;
        if !record.is_done() {
            return None;
        }
        match mem::take(&mut record.data) {
            TaskData::Finished(outcome) => Some(outcome),
            other => {
                record.data = other;
                None
            }
        }
    }

    pub(crate) fn task_is_done(&self, id: TaskId) -> bool {
        self.shared
            .state
            .borrow()
            .tasks
            .get(id.arena_index())
            .map_or(true, |record| record.is_done())
    }

    /// Attaches a completion callback. Returns `Some(failure)` if the
    /// task is already done (the callback is not stored).
    ///
    /// # Panics
    ///
    /// Panics if the task already has a waiter or callback attached.
    pub(crate) fn attach_on_complete(
        &self,
        id: TaskId,
        callback: CompleteFn,
    ) -> Option<Option<Error>> {
        let mut state = self.shared.state.borrow_mut();
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("gathered task record missing");
        if record.is_done() {
            let failure = match &record.data {
                TaskData::Finished(Err(e)) => Some(e.clone()),
                _ => None,
            };
            return Some(failure);
        }
        assert!(
            !record.has_consumer(),
            "can't gather a task that already has a waiter"
        );
        record.on_complete = Some(callback);
        None
    }

    /// Called when a [`TaskHandle`] is dropped: detach the task, and if
    /// it already finished, reap the record (reporting an unretrieved
    /// failure to the exception handler).
    pub(crate) fn release_handle(&self, id: TaskId) {
        let Ok(mut guard) = self.shared.state.try_borrow_mut() else {
            return;
        };
        let sink = {
            let state = &mut *guard;
            let Some(record) = state.tasks.get_mut(id.arena_index()) else {
                return;
            };
            record.detached = true;
            if !record.is_done() {
                return;
            }
            let sink = match &record.data {
                TaskData::Finished(Err(e)) if !e.is_cancelled() => Some(e.clone()),
                _ => None,
            };
            state.tasks.remove(id.arena_index());
            sink
        };
        drop(guard);
        if let Some(error) = sink {
            self.report_exception(id, &error);
        }
    }

    fn report_exception(&self, task: TaskId, error: &Error) {
        let handler = self.shared.handler.borrow().clone();
        handler(
            self,
            &ExceptionContext {
                message: "task exception was not retrieved",
                error,
                task,
            },
        );
    }

    fn drain_injector(&self) {
        let woken = self.shared.injector.take();
        if woken.is_empty() {
            return;
        }
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let now = state.clock.ticks();
        for id in woken {
            let Some(record) = state.tasks.get_mut(id.arena_index()) else {
                continue;
            };
            let detached_wait = matches!(record.state, TaskState::Waiting)
                && matches!(record.data, TaskData::Waiting(WaitSite::Detached));
            let pending_resume = matches!(record.state, TaskState::Waiting)
                && matches!(record.data, TaskData::Resume(_));
            if !(detached_wait || pending_resume) {
                continue;
            }
            if detached_wait {
                record.data = TaskData::None;
            }
            record.state = TaskState::Ready;
            state.run_queue.push_head(id, now);
        }
    }

    /// One full scheduler run. `main` stops the loop on completion and
    /// its outcome is returned; with no main task the loop ends once
    /// both queues are empty.
    fn run_loop(&self, main: Option<TaskId>) -> Result<Option<TaskOutcome>> {
        loop {
            self.drain_injector();

            // (a) Maximum block time for the poller.
            let wait = {
                let state = self.shared.state.borrow();
                match state.run_queue.peek_key() {
                    Some(key) => {
                        let due_in = key.diff(state.clock.ticks()).max(0);
                        Some(Some(Duration::from_millis(due_in as u64)))
                    }
                    None if state.io.is_empty() => None,
                    None => Some(None),
                }
            };
            let Some(timeout) = wait else {
                // Both queues empty: nothing will ever become runnable.
                break;
            };

            // (b) Deliver I/O readiness, or advance a virtual clock
            // instead of blocking.
            {
                let mut guard = self.shared.state.borrow_mut();
                let state = &mut *guard;
                let now = state.clock.ticks();
                if state.clock.is_virtual() {
                    if state.io.is_empty() {
                        if let Some(d) = timeout {
                            state.clock.advance(d.as_millis() as u32);
                        }
                    } else {
                        match timeout {
                            Some(d) => {
                                let events = state.io.wait_io_event(
                                    Some(Duration::ZERO),
                                    &mut state.tasks,
                                    &mut state.run_queue,
                                    now,
                                )?;
                                if events == 0 {
                                    state.clock.advance(d.as_millis() as u32);
                                }
                            }
                            None => {
                                state.io.wait_io_event(
                                    None,
                                    &mut state.tasks,
                                    &mut state.run_queue,
                                    now,
                                )?;
                            }
                        }
                    }
                } else {
                    state
                        .io
                        .wait_io_event(timeout, &mut state.tasks, &mut state.run_queue, now)?;
                }
            }

            // (c) Pop the head if it is due.
            let popped = {
                let mut state = self.shared.state.borrow_mut();
                let now = state.clock.ticks();
                if state.run_queue.peek_key().is_some_and(|k| k.is_due(now)) {
                    state.run_queue.pop_head()
                } else {
                    None
                }
            };
            let Some(id) = popped else {
                continue;
            };

            // (d) Resume it, injecting a pending error.
            let mut future = {
                let mut guard = self.shared.state.borrow_mut();
                let state = &mut *guard;
                let record = state
                    .tasks
                    .get_mut(id.arena_index())
                    .expect("queued task record missing");
                record.state = TaskState::Running;
                if let TaskData::Resume(error) = mem::take(&mut record.data) {
                    state.injection = Some(error);
                }
                state.current = Some(id);
                state.steps += 1;
                record.future.take().expect("queued task without a future")
            };

            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                injector: self.shared.injector.clone(),
            }));
            let mut cx = Context::from_waker(&waker);

            match future.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    // (e) The task parked itself before returning.
                    let mut guard = self.shared.state.borrow_mut();
                    let state = &mut *guard;
                    state.current = None;
                    let leftover = state.injection.take();
                    let record = state
                        .tasks
                        .get_mut(id.arena_index())
                        .expect("suspended task record missing");
                    record.future = Some(future);
                    if matches!(record.state, TaskState::Running) {
                        // Suspended through a foreign future; wake comes
                        // through the waker injector.
                        record.state = TaskState::Waiting;
                        record.data = match leftover {
                            Some(error) => TaskData::Resume(error),
                            None => TaskData::Waiting(WaitSite::Detached),
                        };
                    } else if let Some(error) = leftover {
                        trace!(task = %id, "injected error not consumed at suspension point");
                        if matches!(record.data, TaskData::None) {
                            record.data = TaskData::Resume(error);
                        }
                    }
                }
                Poll::Ready(outcome) => {
                    // Dropping the future may release child task handles;
                    // do it before re-borrowing the state.
                    drop(future);
                    let (main_done, sink) = {
                        let mut guard = self.shared.state.borrow_mut();
                        let state = &mut *guard;
                        state.current = None;
                        state.injection = None;
                        if main == Some(id) {
                            state.tasks.remove(id.arena_index());
                            (Some(outcome), None)
                        } else {
                            (None, finalize_task(state, id, outcome))
                        }
                    };
                    if let Some(error) = sink {
                        self.report_exception(id, &error);
                    }
                    if let Some(outcome) = main_done {
                        debug!(task = %id, "main task finished");
                        return Ok(Some(outcome));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Runtime")
            .field("tasks", &state.tasks.len())
            .field("run_queue", &state.run_queue.len())
            .field("steps", &state.steps)
            .finish_non_exhaustive()
    }
}

/// Routes a finished task's outcome: wake waiters, run the completion
/// callback, or flag a detached failure for the exception handler.
fn finalize_task(state: &mut RuntimeState, id: TaskId, outcome: TaskOutcome) -> Option<Error> {
    let failure = outcome.as_ref().err().cloned();
    let (callback, waiters, detached) = {
        let record = state
            .tasks
            .get_mut(id.arena_index())
            .expect("finished task record missing");
        record.state = TaskState::Done;
        record.data = TaskData::Finished(outcome);
        (record.on_complete.take(), record.waiters.take(), record.detached)
    };

    let mut had_consumer = callback.is_some();
    if let Some(mut queue) = waiters {
        while let Some(waiter) = queue.pop_head() {
            had_consumer = true;
            state.wake(waiter);
        }
    }
    if let Some(callback) = callback {
        callback(state, id, failure.clone());
    }

    if detached {
        // Nobody holds a handle; reap now and report an unretrieved
        // failure (cancellation is an expected completion, not reported).
        let sink = match (&failure, had_consumer) {
            (Some(error), false) if !error.is_cancelled() => Some(error.clone()),
            _ => None,
        };
        state.tasks.remove(id.arena_index());
        return sink;
    }
    None
}

fn default_exception_handler(_rt: &Runtime, ctx: &ExceptionContext<'_>) {
    crate::tracing_compat::error!(task = %ctx.task, error = %ctx.error, "{}", ctx.message);
    eprintln!("{}: {} ({})", ctx.message, ctx.error, ctx.task);
}

/// Future that suspends the current task until an fd direction is ready.
///
/// Created by [`Runtime::wait_readable`] / [`Runtime::wait_writable`];
/// this is the suspension primitive every stream operation retries
/// around.
#[derive(Debug)]
pub struct IoWait {
    rt: Runtime,
    fd: RawFd,
    dir: IoDirection,
    queued: bool,
}

impl Future for IoWait {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.rt.take_injected() {
            return Poll::Ready(Err(error));
        }
        if self.queued {
            return Poll::Ready(Ok(()));
        }
        let rt = self.rt.clone();
        if let Err(error) = rt.park_current_io(self.fd, self.dir) {
            return Poll::Ready(Err(error.into()));
        }
        self.queued = true;
        Poll::Pending
    }
}
