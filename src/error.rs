//! Error types for the scheduler.
//!
//! One crate-wide [`Error`] enum covers every failure a task body or a
//! runtime primitive can surface:
//!
//! - **Cancellation**: injected to unwind a task from its current
//!   suspension point. Catchable; convention is to re-raise unless the
//!   task deliberately absorbs it.
//! - **Timeout**: raised by `wait_for` when the deadline elapses first.
//!   Distinct from an externally delivered cancellation.
//! - **UnexpectedEof**: raised by `read_exactly` and friends when the
//!   transport closes early.
//! - **Stalled**: the loop drained both queues while the main task was
//!   still suspended.
//!
//! Usage errors (releasing an unheld lock, gathering a task that already
//! has a waiter, a second waiter on one I/O direction, cancelling the
//! running task) are contract violations and panic instead.
//!
//! `Error` is `Clone` so the same failure can be stored as a task outcome
//! and re-raised to an awaiter; I/O errors are kept behind an `Arc` for
//! that reason.

use std::io;
use std::sync::Arc;

/// The error type produced by tasks and runtime primitives.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The task was cancelled at a suspension point.
    #[error("task cancelled")]
    Cancelled,

    /// A `wait_for` deadline elapsed before the awaited task finished.
    #[error("operation timed out")]
    Timeout,

    /// The transport reached end-of-stream before the requested data.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The scheduler ran out of runnable tasks while the main task was
    /// still suspended.
    #[error("event loop stalled: no runnable tasks")]
    Stalled,

    /// An I/O error from the poller or a transport.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// An application-level failure carried through a task outcome.
    #[error("{0}")]
    Msg(Arc<str>),
}

impl Error {
    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates an application-level error from a message.
    #[must_use]
    pub fn msg(message: impl Into<Arc<str>>) -> Self {
        Self::Msg(message.into())
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns true if this error is an unexpected end of stream.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::cancelled().is_cancelled());
        assert!(!Error::timeout().is_cancelled());
        assert!(Error::timeout().is_timeout());
        assert!(Error::UnexpectedEof.is_eof());
    }

    #[test]
    fn io_errors_are_clonable() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "boom"));
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }

    #[test]
    fn message_errors_display_verbatim() {
        assert_eq!(Error::msg("flash worn out").to_string(), "flash worn out");
    }
}
