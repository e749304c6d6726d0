//! Client error taxonomy
//!
//! [`TransportError`] describes raw wire failures inside the transport
//! stack. [`ClientError`] is what callers see: every failed operation ends in
//! exactly one variant, produced by the
//! [`ErrorClassifier`](crate::classifier::ErrorClassifier).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vecta_common::error::{ErrorClassification, ErrorSeverity};

use crate::auth::TokenError;
use crate::wire::{ResourceType, RpcCode, WireResponse, WireStatus};

/// The original status and message of a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFailure {
    pub status: WireStatus,
    pub message: String,
}

impl WireFailure {
    #[must_use]
    pub fn new(status: WireStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// Capture a failed response, extracting the server's message when the
    /// body is a structured error document
    #[must_use]
    pub fn from_response(response: &WireResponse) -> Self {
        Self::new(response.status, extract_message(&response.text()))
    }
}

impl fmt::Display for WireFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{}: {}", self.status, self.message)
        }
    }
}

/// Pulls `error[].message` or `message` out of a JSON error body, falling
/// back to the raw text.
fn extract_message(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(document) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };

    if let Some(errors) = document.get("error").and_then(serde_json::Value::as_array) {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|entry| entry.get("message").and_then(serde_json::Value::as_str))
            .collect();
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }

    document
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| trimmed.to_string(), str::to_string)
}

/// Failures raised inside the transport stack before classification
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call's cancellation signal fired
    #[error("Request cancelled")]
    Cancelled,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No credential could be obtained for the call
    #[error("Credential unavailable: {0}")]
    Token(#[from] TokenError),
}

impl TransportError {
    /// Connection and I/O failures are worth another attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Io(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() || err.is_decode() || err.is_redirect() {
            Self::Protocol(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Typed failure of a client operation
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Bad request: {0}")]
    BadRequest(WireFailure),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(WireFailure),

    #[error("Unauthorized: {0}")]
    Unauthorized(WireFailure),

    #[error("{resource} not found: {failure}")]
    NotFound { resource: ResourceType, failure: WireFailure },

    #[error("Conflict: {0}")]
    Conflict(WireFailure),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(WireFailure),

    #[error("Collection limit reached: {0}")]
    CollectionLimitReached(WireFailure),

    #[error("Module not available: {0}")]
    ModuleNotAvailable(WireFailure),

    #[error("External module problem: {0}")]
    ExternalModuleProblem(WireFailure),

    #[error("Feature not supported by server: {0}")]
    FeatureNotSupported(WireFailure),

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { duration: Duration, operation: String },

    #[error("Operation cancelled")]
    Cancelled,

    /// Any failed response no specific kind matched
    #[error("Server error: {0}")]
    Server(WireFailure),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Authentication token unavailable: {0}")]
    Token(#[from] TokenError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The failed response behind a status-derived error
    #[must_use]
    pub const fn failure(&self) -> Option<&WireFailure> {
        match self {
            Self::BadRequest(failure)
            | Self::Unauthenticated(failure)
            | Self::Unauthorized(failure)
            | Self::NotFound { failure, .. }
            | Self::Conflict(failure)
            | Self::UnprocessableEntity(failure)
            | Self::CollectionLimitReached(failure)
            | Self::ModuleNotAvailable(failure)
            | Self::ExternalModuleProblem(failure)
            | Self::FeatureNotSupported(failure)
            | Self::Server(failure) => Some(failure),
            Self::Timeout { .. }
            | Self::Cancelled
            | Self::Transport(_)
            | Self::Token(_)
            | Self::Config(_)
            | Self::Decode(_) => None,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl ErrorClassification for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Server(failure) => matches!(
                failure.status,
                WireStatus::Http(429 | 502..=504) | WireStatus::Rpc(RpcCode::Unavailable)
            ),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled | Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Timeout { .. } | Self::Transport(_) | Self::CollectionLimitReached(_) => {
                ErrorSeverity::Warning
            }
            Self::Token(_) | Self::Config(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
