//! Sleep future.
//!
//! On first poll the current task parks itself in the run queue at
//! `now + delay` and suspends; the scheduler resumes it once the wake
//! key is due. A pending cancellation surfaces here, as at every
//! suspension point. A zero delay still suspends exactly once, which is
//! what makes `sleep_ms(0)` a fair yield point.

use crate::error::Result;
use crate::runtime::Runtime;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`Runtime::sleep`] and [`Runtime::sleep_ms`].
#[derive(Debug)]
pub struct Sleep {
    rt: Runtime,
    delay_ms: i32,
    queued: bool,
}

impl Sleep {
    pub(crate) fn new(rt: Runtime, delay_ms: i32) -> Self {
        Self {
            rt,
            delay_ms,
            queued: false,
        }
    }

    /// The configured delay in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> i32 {
        self.delay_ms
    }
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.rt.take_injected() {
            return Poll::Ready(Err(error));
        }
        if self.queued {
            return Poll::Ready(Ok(()));
        }
        let rt = self.rt.clone();
        let key = rt.now().wrapping_add(self.delay_ms.max(0));
        rt.park_current_at(key);
        self.queued = true;
        Poll::Pending
    }
}
