//! Bounded retries for transient transport failures
//!
//! Each attempt is classified before the executor sees it: a success ends
//! the loop, any other response or transport error becomes an
//! [`AttemptFailure`] for the [`TransientFailurePolicy`] to judge. Once the
//! loop ends the last attempt's outcome is handed back as it was, so a
//! final 503 is still a 503 response and a final connection failure is
//! still that connection failure.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use vecta_common::{RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryPolicy};

use super::Transport;
use crate::errors::{ConfigError, TransportError};
use crate::wire::{RpcCode, WireRequest, WireResponse, WireStatus};

/// HTTP statuses retried unless configured otherwise
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

const RETRY_AFTER_HEADER: &str = "retry-after";

/// One failed attempt as seen by the retry policy
#[derive(Debug)]
pub enum AttemptFailure {
    /// A response came back with a non-success status
    Status(WireResponse),
    /// No response came back
    Transport(TransportError),
}

impl AttemptFailure {
    fn into_outcome(self) -> Result<WireResponse, TransportError> {
        match self {
            Self::Status(response) => Ok(response),
            Self::Transport(error) => Err(error),
        }
    }
}

type ErrorPredicate = Arc<dyn Fn(&TransportError) -> bool + Send + Sync>;

/// Decides which failed attempts are transient
#[derive(Clone)]
pub struct TransientFailurePolicy {
    status_codes: BTreeSet<u16>,
    rpc_codes: Vec<RpcCode>,
    is_retryable_error: ErrorPredicate,
    retry_after_cap: Option<Duration>,
}

impl Default for TransientFailurePolicy {
    fn default() -> Self {
        Self {
            status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            rpc_codes: vec![RpcCode::Unavailable, RpcCode::ResourceExhausted],
            is_retryable_error: Arc::new(TransportError::is_retryable),
            retry_after_cap: None,
        }
    }
}

impl TransientFailurePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retryable HTTP status set
    #[must_use]
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_rpc_codes(mut self, codes: impl IntoIterator<Item = RpcCode>) -> Self {
        self.rpc_codes = codes.into_iter().collect();
        self
    }

    /// Replace the predicate for failures without a response
    #[must_use]
    pub fn with_error_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TransportError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable_error = Arc::new(predicate);
        self
    }

    /// Honor `Retry-After` (in seconds) on retryable responses, up to `cap`
    #[must_use]
    pub const fn with_retry_after(mut self, cap: Duration) -> Self {
        self.retry_after_cap = Some(cap);
        self
    }

    #[must_use]
    pub fn is_retryable_status(&self, status: WireStatus) -> bool {
        match status {
            WireStatus::Http(code) => self.status_codes.contains(&code),
            WireStatus::Rpc(code) => self.rpc_codes.contains(&code),
        }
    }

    fn retry_after(&self, response: &WireResponse) -> Option<Duration> {
        let cap = self.retry_after_cap?;
        let seconds = response.header(RETRY_AFTER_HEADER)?.trim().parse::<u64>().ok()?;
        Some(Duration::from_secs(seconds).min(cap))
    }
}

impl RetryPolicy<AttemptFailure> for TransientFailurePolicy {
    fn should_retry(&self, failure: &AttemptFailure, _attempt: u32) -> RetryDecision {
        match failure {
            AttemptFailure::Status(response) if self.is_retryable_status(response.status) => {
                self.retry_after(response).map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
            }
            AttemptFailure::Transport(error) if (self.is_retryable_error)(error) => {
                RetryDecision::Retry
            }
            _ => RetryDecision::Stop,
        }
    }
}

impl fmt::Debug for TransientFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientFailurePolicy")
            .field("status_codes", &self.status_codes)
            .field("rpc_codes", &self.rpc_codes)
            .field("retry_after_cap", &self.retry_after_cap)
            .finish_non_exhaustive()
    }
}

pub struct RetryingTransport<T> {
    inner: T,
    executor: RetryExecutor<TransientFailurePolicy>,
}

impl<T> RetryingTransport<T> {
    /// Wrap `inner` with the given retry configuration
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(
        inner: T,
        config: RetryConfig,
        policy: TransientFailurePolicy,
    ) -> Result<Self, ConfigError> {
        if let Err(RetryError::InvalidConfiguration { message }) = config.validate() {
            return Err(ConfigError::Invalid(message));
        }
        Ok(Self { inner, executor: RetryExecutor::new(config, policy) })
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        self.executor.config()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    #[instrument(skip(self, request, cancel), fields(operation = request.operation_label()))]
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<WireResponse, TransportError> {
        let inner = &self.inner;
        let request = &request;

        let outcome = self
            .executor
            .execute_cancellable(cancel, || async move {
                match inner.send(request.clone(), cancel).await {
                    Ok(response) if response.status.is_success() => Ok(response),
                    Ok(response) => Err(AttemptFailure::Status(response)),
                    Err(error) => Err(AttemptFailure::Transport(error)),
                }
            })
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(RetryError::Exhausted { attempts, source }) => {
                debug!(attempts, "Retry budget exhausted; returning last outcome");
                source.into_outcome()
            }
            Err(RetryError::NonRetryable { source, .. }) => source.into_outcome(),
            Err(RetryError::Cancelled { .. }) => Err(TransportError::Cancelled),
            Err(RetryError::InvalidConfiguration { message }) => {
                Err(TransportError::Protocol(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone)]
    enum Step {
        Reply(WireResponse),
        Refuse,
    }

    /// Replays a fixed script of outcomes, then repeats the last one
    struct Scripted {
        script: Mutex<Vec<Step>>,
        sends: AtomicUsize,
    }

    impl Scripted {
        fn new(mut script: Vec<Step>) -> Self {
            script.reverse();
            Self { script: Mutex::new(script), sends: AtomicUsize::new(0) }
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            _request: WireRequest,
            _cancel: &CancellationToken,
        ) -> Result<WireResponse, TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock();
                if script.len() > 1 { script.pop() } else { script.last().cloned() }
            };
            match step {
                Some(Step::Reply(response)) => Ok(response),
                Some(Step::Refuse) | None => Err(TransportError::Connect("refused".into())),
            }
        }
    }

    fn reply(status: u16) -> Step {
        Step::Reply(WireResponse::http(status, Vec::new()))
    }

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .exponential_backoff(Duration::from_millis(1), 2.0, Duration::from_millis(10))
            .no_jitter()
            .build()
            .unwrap()
    }

    fn retrying(script: Vec<Step>) -> RetryingTransport<Scripted> {
        RetryingTransport::new(Scripted::new(script), quick(3), TransientFailurePolicy::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_recovers_after_transient_statuses() {
        let transport = retrying(vec![
            reply(503),
            reply(503),
            Step::Reply(WireResponse::http(200, b"ok".to_vec())),
        ]);

        let response =
            transport.send(WireRequest::get("/v1/objects"), &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, WireStatus::Http(200));
        assert_eq!(transport.inner().sends(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_status_returned_immediately() {
        let transport = retrying(vec![Step::Reply(WireResponse::http(404, b"missing".to_vec()))]);

        let response =
            transport.send(WireRequest::get("/v1/schema/x"), &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, WireStatus::Http(404));
        assert_eq!(response.body, b"missing");
        assert_eq!(transport.inner().sends(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_response() {
        let transport = retrying(vec![reply(502)]);

        let response =
            transport.send(WireRequest::get("/v1/objects"), &CancellationToken::new()).await.unwrap();

        assert_eq!(response.status, WireStatus::Http(502));
        assert_eq!(transport.inner().sends(), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_transport_error() {
        let transport = retrying(vec![Step::Refuse]);

        let result = transport.send(WireRequest::get("/v1/objects"), &CancellationToken::new()).await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.inner().sends(), 4);
    }

    #[tokio::test]
    async fn test_unauthenticated_is_not_retried_here() {
        let transport = retrying(vec![Step::Reply(WireResponse::rpc(RpcCode::Unauthenticated, "expired"))]);

        let response =
            transport.send(WireRequest::get("/v1/search"), &CancellationToken::new()).await.unwrap();

        assert!(response.status.is_unauthenticated());
        assert_eq!(transport.inner().sends(), 1);
    }

    #[tokio::test]
    async fn test_rpc_unavailable_is_retried() {
        let transport = retrying(vec![
            Step::Reply(WireResponse::rpc(RpcCode::Unavailable, "draining")),
            Step::Reply(WireResponse::rpc(RpcCode::Ok, "")),
        ]);

        let response =
            transport.send(WireRequest::get("/v1/search"), &CancellationToken::new()).await.unwrap();

        assert!(response.status.is_success());
        assert_eq!(transport.inner().sends(), 2);
    }

    #[tokio::test]
    async fn test_custom_error_predicate() {
        let policy = TransientFailurePolicy::new().with_error_predicate(|_| false);
        let transport = RetryingTransport::new(
            Scripted::new(vec![Step::Refuse]),
            quick(3),
            policy,
        )
        .unwrap();

        let result = transport.send(WireRequest::get("/v1/meta"), &CancellationToken::new()).await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.inner().sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let config = RetryConfig::builder()
            .max_retries(3)
            .fixed_backoff(Duration::from_secs(60))
            .no_jitter()
            .build()
            .unwrap();
        let transport = RetryingTransport::new(
            Scripted::new(vec![reply(503)]),
            config,
            TransientFailurePolicy::new(),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = transport.send(WireRequest::get("/v1/objects"), &cancel).await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(transport.inner().sends(), 1);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = TransientFailurePolicy::new().with_retry_after(Duration::from_secs(5));
        let throttled = AttemptFailure::Status(
            WireResponse::http(429, Vec::new()).with_header("Retry-After", "120"),
        );
        let plain = AttemptFailure::Status(WireResponse::http(429, Vec::new()));

        assert_eq!(
            policy.should_retry(&throttled, 0),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(policy.should_retry(&plain, 0), RetryDecision::Retry);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RetryConfig { max_attempts: 0, ..RetryConfig::default() };
        let result =
            RetryingTransport::new(Scripted::new(Vec::new()), config, TransientFailurePolicy::new());

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_backoff_delays_are_monotonic() {
        let config = RetryConfig::builder()
            .max_retries(3)
            .exponential_backoff(Duration::from_millis(100), 2.0, Duration::from_secs(10))
            .proportional_jitter(0.5)
            .build()
            .unwrap();

        for _ in 0..100 {
            let delays: Vec<_> = (0..3).map(|attempt| config.delay_for(attempt)).collect();
            assert!(delays[0] <= delays[1] && delays[1] <= delays[2], "{delays:?}");
        }
    }
}
