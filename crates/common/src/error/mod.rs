//! Error classification shared across Vecta crates
//!
//! Crates define their own `thiserror` enums and implement
//! [`ErrorClassification`] so that retry layers, logging, and callers can
//! reason about failures without matching on concrete variants.
//!
//! ## ErrorClassification Trait
//!
//! - **`is_retryable()`**: Can this operation be retried as-is?
//! - **`severity()`**: How serious is this error? (Info/Warning/Error/Critical)
//! - **`is_critical()`**: Does this require immediate attention?
//! - **`retry_after()`**: Suggested retry delay (if applicable)
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Resource not found, caller cancelled |
//! | **Warning** | Degraded but operational | Rate limiting, transient failures |
//! | **Error** | Failure requiring attention | Rejected requests, config errors |
//! | **Critical** | Integrity at risk | Credential cannot be obtained at all |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use vecta_common::error::{ErrorClassification, ErrorSeverity};
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Busy,
//!     Rejected,
//! }
//!
//! impl ErrorClassification for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         match self {
//!             Self::Busy => ErrorSeverity::Warning,
//!             Self::Rejected => ErrorSeverity::Error,
//!         }
//!     }
//!
//!     fn is_critical(&self) -> bool {
//!         false
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         None
//!     }
//! }
//!
//! assert!(FetchError::Busy.is_retryable());
//! assert_eq!(FetchError::Rejected.severity(), ErrorSeverity::Error);
//! ```

use std::fmt;
use std::time::Duration;

/// Standard classification interface for error types
///
/// Retry layers consult [`is_retryable`](Self::is_retryable) before
/// scheduling another attempt; logging consults
/// [`severity`](Self::severity) to pick a level.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: connection resets, overloaded
    /// upstreams, rate limiting.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (for
    /// example from a `Retry-After` header), `None` otherwise.
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl ErrorSeverity {
    /// Short uppercase label used in log lines
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
