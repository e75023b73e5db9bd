#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use microloop::{ClockMode, Runtime, RuntimeConfig};
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initializes the test tracing subscriber once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A runtime on the virtual clock: timer-driven tests run instantly and
/// deterministically.
pub fn virtual_rt() -> Runtime {
    init_test_logging();
    Runtime::with_config(RuntimeConfig::new().with_clock(ClockMode::Virtual))
}

/// A runtime on the monotonic clock, for tests with real sockets.
pub fn real_rt() -> Runtime {
    init_test_logging();
    Runtime::new()
}
