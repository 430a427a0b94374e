//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
///
/// More reliable than fixed sleeps since thread start-up time varies.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}
