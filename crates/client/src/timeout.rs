//! Per-call timeout contexts
//!
//! A [`TimeoutContext`] turns an optional timeout plus the caller's
//! cancellation token into the single signal the transport stack watches.
//! It also remembers whether that signal fired because the timeout elapsed,
//! so a cancelled call can be reported as [`ClientError::Timeout`] or
//! [`ClientError::Cancelled`] correctly.
//!
//! Contexts are created per call and passed down explicitly.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ClientError;

pub struct TimeoutContext {
    timeout: Option<Duration>,
    operation: String,
    signal: CancellationToken,
    timed_out: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl TimeoutContext {
    /// Derive the call's signal from `caller`
    ///
    /// Without a timeout the caller's token is used unchanged. With one, the
    /// signal is a child of `caller` that a timer task cancels once
    /// `timeout` elapses. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        timeout: Option<Duration>,
        caller: &CancellationToken,
        operation: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let timed_out = Arc::new(AtomicBool::new(false));

        let Some(duration) = timeout else {
            return Self { timeout, operation, signal: caller.clone(), timed_out, timer: None };
        };

        let signal = caller.child_token();
        let timer = tokio::spawn({
            let signal = signal.clone();
            let timed_out = timed_out.clone();
            let operation = operation.clone();
            async move {
                tokio::select! {
                    biased;
                    () = signal.cancelled() => {}
                    () = tokio::time::sleep(duration) => {
                        // A caller cancellation that raced the timer wins
                        if !signal.is_cancelled() {
                            debug!(%operation, timeout = ?duration, "Operation timed out");
                            timed_out.store(true, Ordering::SeqCst);
                            signal.cancel();
                        }
                    }
                }
            }
        });

        Self { timeout, operation, signal, timed_out, timer: Some(timer) }
    }

    /// The signal transports must observe
    #[must_use]
    pub const fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Whether the signal fired because the timeout elapsed
    #[must_use]
    pub fn was_timeout(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Error describing why the signal fired
    #[must_use]
    pub fn cancellation_error(&self) -> ClientError {
        match self.timeout {
            Some(duration) if self.was_timeout() => {
                ClientError::Timeout { duration, operation: self.operation.clone() }
            }
            _ => ClientError::Cancelled,
        }
    }

    /// Run `operation` until it completes or the signal fires
    ///
    /// # Errors
    /// Returns the operation's error, or [`cancellation_error`](Self::cancellation_error)
    /// when the signal fires first.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::select! {
            biased;
            () = self.signal.cancelled() => Err(self.cancellation_error()),
            result = operation => result,
        }
    }
}

impl std::fmt::Debug for TimeoutContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutContext")
            .field("timeout", &self.timeout)
            .field("operation", &self.operation)
            .field("cancelled", &self.is_cancelled())
            .field("timed_out", &self.was_timeout())
            .finish()
    }
}

impl Drop for TimeoutContext {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn slow_operation() -> Result<&'static str, ClientError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok("done")
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified_as_timeout() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(Some(Duration::from_millis(100)), &caller, "query");

        let result = context.run(slow_operation()).await;

        match result {
            Err(ClientError::Timeout { duration, operation }) => {
                assert_eq!(duration, Duration::from_millis(100));
                assert_eq!(operation, "query");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(context.was_timeout());
        assert!(!caller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_without_timeout_is_cancelled() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(None, &caller, "query");

        let trigger = caller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = context.run(slow_operation()).await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(!context.was_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_before_timeout_is_not_timeout() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(Some(Duration::from_secs(5)), &caller, "insert");

        caller.cancel();
        let result = context.run(slow_operation()).await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(!context.was_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_completes() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(Some(Duration::from_secs(1)), &caller, "query");

        let result = context.run(slow_operation()).await;

        assert_eq!(result.unwrap(), "done");
        assert!(!context.is_cancelled());
    }

    #[tokio::test]
    async fn test_without_timeout_passes_caller_signal_through() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(None, &caller, "meta");

        caller.cancel();
        assert!(context.signal().is_cancelled());
        assert!(context.timeout().is_none());
    }

    #[tokio::test]
    async fn test_timeout_signal_does_not_cancel_caller() {
        let caller = CancellationToken::new();
        let context = TimeoutContext::new(Some(Duration::from_millis(10)), &caller, "meta");

        context.signal().cancelled().await;

        assert!(context.was_timeout());
        assert!(!caller.is_cancelled());
    }
}
