//! Resilience patterns for transient failures
//!
//! Currently this is the retry executor: configurable backoff, bounded
//! jitter, pluggable retry policies and cooperative cancellation through
//! [`tokio_util::sync::CancellationToken`].
//!
//! The executor is generic over the operation's error type. Domain crates
//! decide what is retryable by implementing [`RetryPolicy`] and keep their
//! own error enums untouched.

pub mod retry;

pub use retry::{
    policies, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, RetryResult,
};
