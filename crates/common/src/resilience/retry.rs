//! Generic retry executor with backoff, jitter and cancellation
//!
//! The executor drives any fallible async operation. A [`RetryPolicy`]
//! decides per failure whether another attempt is worthwhile, the
//! [`RetryConfig`] decides how long to wait, and a caller-supplied
//! [`CancellationToken`] can abort the loop at any point, including in the
//! middle of a backoff wait.
//!
//! The terminal failure is always handed back unchanged inside
//! [`RetryError`], so callers never lose the identity of the last error.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed; `source` is the last failure
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The policy declined to retry `source`
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { attempts: u32, source: E },

    /// The cancellation token fired before the loop finished
    #[error("Retry loop cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },

    /// The retry strategy configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> RetryError<E> {
    /// Number of attempts that were actually made
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
            Self::InvalidConfiguration { .. } => 0,
        }
    }

    /// Take the last operation failure, if one was observed
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            Self::Cancelled { last, .. } => last,
            Self::InvalidConfiguration { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Determine if the error should be retried and optionally provide a custom
    /// delay
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Linear backoff: initial_delay + (attempt * increment)
    Linear { initial_delay: Duration, increment: Duration },
    /// Exponential backoff: initial_delay * base^attempt, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the un-jittered delay for the given 0-based attempt
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear { initial_delay, increment } => {
                *initial_delay + increment.saturating_mul(attempt)
            }
            Self::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_secs_f64() * base.powi(exponent);
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    *max_delay
                } else {
                    Duration::from_millis((delay * 1000.0).floor() as u64)
                }
            }
        }
    }

    /// Upper bound applied after jitter, if the strategy has one
    #[must_use]
    pub const fn max_delay(&self) -> Option<Duration> {
        match self {
            Self::Exponential { max_delay, .. } => Some(*max_delay),
            Self::Fixed(_) | Self::Linear { .. } => None,
        }
    }

    /// Largest jitter ratio that keeps successive delays non-decreasing
    ///
    /// With exponential growth by `base`, adding up to `base - 1` of the
    /// current delay can never overtake the next step. Fixed and linear
    /// strategies have no such headroom.
    #[must_use]
    pub fn jitter_headroom(&self) -> f64 {
        match self {
            Self::Exponential { base, .. } => (base - 1.0).max(0.0),
            Self::Fixed(_) | Self::Linear { .. } => 0.0,
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Adds a random amount in `[0, ratio)` of the computed delay
    Proportional { ratio: f64 },
}

impl Jitter {
    /// Apply jitter to the calculated delay
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Proportional { ratio } if *ratio <= 0.0 => delay,
            Self::Proportional { ratio } => {
                let extra_ms = delay.as_secs_f64() * 1000.0 * ratio * rand::random::<f64>();
                delay + Duration::from_millis(extra_ms.floor() as u64)
            }
        }
    }

    const fn ratio(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Proportional { ratio } => *ratio,
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(100),
                base: 2.0,
                max_delay: Duration::from_secs(10),
            },
            jitter: Jitter::Proportional { ratio: 0.5 },
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Delay to wait after the given 0-based failed attempt
    ///
    /// Jitter is applied on top of the backoff and the result is clamped to
    /// the strategy's maximum. Delays are non-decreasing in `attempt` for
    /// every configuration accepted by [`validate`](Self::validate).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jittered = self.jitter.apply(self.backoff.calculate_delay(attempt));
        match self.backoff.max_delay() {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns [`RetryError::InvalidConfiguration`] when `max_attempts` is
    /// zero, the exponential base is below 1, or the jitter ratio exceeds
    /// the strategy's monotonic headroom.
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        if let BackoffStrategy::Exponential { base, .. } = &self.backoff {
            if !base.is_finite() || *base < 1.0 {
                return Err(RetryError::InvalidConfiguration {
                    message: "exponential base must be at least 1".to_string(),
                });
            }
        }

        let ratio = self.jitter.ratio();
        if !ratio.is_finite() || ratio < 0.0 || ratio > self.backoff.jitter_headroom() {
            return Err(RetryError::InvalidConfiguration {
                message: format!(
                    "jitter ratio {ratio} must be within [0, {}]",
                    self.backoff.jitter_headroom()
                ),
            });
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set attempts as "retries after the first attempt"
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_attempts = retries.saturating_add(1);
        self
    }

    #[must_use]
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    #[must_use]
    pub fn linear_backoff(mut self, initial_delay: Duration, increment: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { initial_delay, increment };
        self
    }

    #[must_use]
    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    #[must_use]
    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    #[must_use]
    pub fn proportional_jitter(mut self, ratio: f64) -> Self {
        self.config.jitter = Jitter::Proportional { ratio };
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    /// See [`RetryConfig::validate`].
    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub const fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Create with default configuration
    pub fn with_policy(policy: P) -> Self {
        Self::new(RetryConfig::default(), policy)
    }

    /// Configuration in use
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_cancellable(&CancellationToken::new(), operation).await
    }

    /// Execute an operation with retry logic, aborting when `cancel` fires
    ///
    /// Cancellation is checked before every attempt and raced against every
    /// backoff wait. An attempt that is already running is not interrupted
    /// here; the operation itself should observe the same token.
    #[instrument(skip(self, cancel, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut last: Option<E> = None;

        loop {
            if cancel.is_cancelled() {
                debug!(attempts = attempt, "Retry loop cancelled before next attempt");
                return Err(RetryError::Cancelled { attempts: attempt, last });
            }

            let attempt_number = attempt + 1;
            debug!("Executing operation (attempt {}/{})", attempt_number, max_attempts);

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let decision = self.policy.should_retry(&error, attempt);
            if decision == RetryDecision::Stop {
                debug!("Retry policy determined not to retry: {:?}", error);
                return Err(RetryError::NonRetryable { attempts: attempt_number, source: error });
            }

            if attempt_number >= max_attempts {
                warn!(
                    "All retry attempts exhausted after {} tries, last error: {:?}",
                    attempt_number, error
                );
                return Err(RetryError::Exhausted { attempts: attempt_number, source: error });
            }

            let delay = match decision {
                RetryDecision::RetryAfter(custom) => custom,
                RetryDecision::Retry | RetryDecision::Stop => self.config.delay_for(attempt),
            };

            warn!("Operation failed (attempt {}), retrying after {:?}", attempt_number, delay);

            let cancelled = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                debug!(attempts = attempt_number, "Retry backoff interrupted by cancellation");
                return Err(RetryError::Cancelled { attempts: attempt_number, last: Some(error) });
            }

            last = Some(error);
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub const fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry strategies and policies
    //!
    //! Tests cover backoff strategies, jitter bounds, configuration
    //! validation, executor outcomes and cancellation of backoff waits.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::policies::*;
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Boom(u32);

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom #{}", self.0)
        }
    }

    impl std::error::Error for Boom {}

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .fixed_backoff(Duration::from_millis(1))
            .no_jitter()
            .build()
            .unwrap()
    }

    #[test]
    fn test_backoff_strategy_fixed() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(100));

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(5), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_strategy_linear() {
        let strategy = BackoffStrategy::Linear {
            initial_delay: Duration::from_millis(100),
            increment: Duration::from_millis(50),
        };

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(150));
        assert_eq!(strategy.calculate_delay(10), Duration::from_millis(600));
    }

    #[test]
    fn test_backoff_strategy_exponential() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(strategy.calculate_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_none() {
        let delay = Duration::from_millis(100);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn test_jitter_proportional_bounds() {
        let jitter = Jitter::Proportional { ratio: 0.5 };
        let delay = Duration::from_millis(100);

        for _ in 0..100 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= delay);
            assert!(jittered < Duration::from_millis(150));
        }
    }

    /// Jittered exponential delays never decrease from one attempt to the
    /// next, including once the cap is reached.
    #[test]
    fn test_delay_for_is_monotonic_with_jitter() {
        let config = RetryConfig::builder()
            .max_attempts(12)
            .exponential_backoff(Duration::from_millis(50), 2.0, Duration::from_secs(2))
            .proportional_jitter(1.0)
            .build()
            .unwrap();

        for _ in 0..50 {
            let delays: Vec<Duration> = (0..12).map(|attempt| config.delay_for(attempt)).collect();
            assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{delays:?}");
            assert!(delays.iter().all(|d| *d <= Duration::from_secs(2)));
        }
    }

    #[test]
    fn test_retry_config_validation() {
        let mut config = RetryConfig::default();
        assert!(config.validate().is_ok());

        config.max_attempts = 0;
        assert!(config.validate().is_err());

        let too_much_jitter = RetryConfig::builder()
            .exponential_backoff(Duration::from_millis(10), 1.5, Duration::from_secs(1))
            .proportional_jitter(0.75)
            .build();
        assert!(too_much_jitter.is_err());

        let jitter_on_fixed = RetryConfig::builder()
            .fixed_backoff(Duration::from_millis(10))
            .proportional_jitter(0.1)
            .build();
        assert!(jitter_on_fixed.is_err());

        let shrinking = RetryConfig::builder()
            .exponential_backoff(Duration::from_millis(10), 0.5, Duration::from_secs(1))
            .no_jitter()
            .build();
        assert!(shrinking.is_err());
    }

    #[test]
    fn test_max_retries_sets_attempts() {
        let config = RetryConfig::builder().max_retries(3).build().unwrap();
        assert_eq!(config.max_attempts, 4);
    }

    #[tokio::test]
    async fn test_executor_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_config(5), AlwaysRetry);

        let counter = calls.clone();
        let result: RetryResult<&str, Boom> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Boom(n))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// The last failure is returned verbatim once attempts run out.
    #[tokio::test]
    async fn test_executor_returns_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_config(3), AlwaysRetry);

        let counter = calls.clone();
        let result: RetryResult<(), Boom> = executor
            .execute(|| {
                let counter = counter.clone();
                async move { Err(Boom(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, RetryError::Exhausted { .. }));
        assert_eq!(err.into_last_error(), Some(Boom(2)));
    }

    #[tokio::test]
    async fn test_executor_stops_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_config(5), NeverRetry);

        let counter = calls.clone();
        let result: RetryResult<(), Boom> = executor
            .execute(|| {
                let counter = counter.clone();
                async move { Err(Boom(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// A refusal on the final attempt still reports the policy's verdict.
    #[tokio::test]
    async fn test_non_retryable_on_last_attempt_is_not_exhausted() {
        let executor = RetryExecutor::new(
            fast_config(2),
            PredicateRetry::new(|err: &Boom, _attempt| err.0 == 0),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: RetryResult<(), Boom> = executor
            .execute(|| {
                let counter = counter.clone();
                async move { Err(Boom(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { attempts: 2, source: Boom(1) })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_predicate_policy() {
        let executor = RetryExecutor::new(
            fast_config(5),
            PredicateRetry::new(|err: &Boom, _attempt| err.0 < 1),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: RetryResult<(), Boom> = executor
            .execute(|| {
                let counter = counter.clone();
                async move { Err(Boom(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        assert_eq!(result.unwrap_err().into_last_error(), Some(Boom(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Cancelling during a long backoff wait returns promptly.
    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let config = RetryConfig::builder()
            .max_attempts(5)
            .fixed_backoff(Duration::from_secs(60))
            .no_jitter()
            .build()
            .unwrap();
        let executor = RetryExecutor::new(config, AlwaysRetry);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: RetryResult<(), Boom> =
            executor.execute_cancellable(&cancel, || async { Err(Boom(7)) }).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(RetryError::Cancelled { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert_eq!(last, Some(Boom(7)));
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let executor = RetryExecutor::with_policy(AlwaysRetry);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: RetryResult<(), Boom> = executor
            .execute_cancellable(&cancel, || {
                let counter = counter.clone();
                async move { Err(Boom(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, last: None })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
