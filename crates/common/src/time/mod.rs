//! Time abstractions
//!
//! Expiry windows and deadlines are computed against a [`Clock`] rather than
//! `Instant::now()` directly so tests can move time forward without sleeping.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use vecta_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
