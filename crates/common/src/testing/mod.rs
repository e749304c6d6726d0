//! Testing utilities shared by Vecta crates
//!
//! Enabled with the `test-utils` feature. Downstream crates pull this in as
//! a dev-dependency feature so production builds never link it.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use vecta_common::testing::{init_test_tracing, poll_until};
//!
//! #[tokio::test]
//! async fn waits_for_flag() {
//!     init_test_tracing();
//!     let ready = poll_until(Duration::from_secs(1), Duration::from_millis(10), || async {
//!         true
//!     })
//!     .await;
//!     assert!(ready);
//! }
//! ```

// Test helpers are self-explanatory; panics and errors are the point.
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::time::Duration;

pub use crate::time::{Clock, MockClock, SystemClock};

/// Install a `tracing` subscriber that writes through the test harness
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll an async condition until it returns true or `timeout` elapses
///
/// Uses tokio time, so it cooperates with paused clocks in
/// `start_paused` tests.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }

    condition().await
}
