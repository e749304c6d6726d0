//! Client configuration
//!
//! Loaded from TOML or built in code. Every duration is written in
//! milliseconds:
//!
//! ```toml
//! base_url = "https://db.example.com"
//!
//! [timeouts]
//! query = 60000
//!
//! [retry]
//! max_retries = 5
//! retryable_status_codes = [429, 503]
//!
//! [auth]
//! proactive_refresh = true
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vecta_common::{duration_millis, option_duration_millis, RetryConfig, RetryError};

use crate::errors::ConfigError;
use crate::transport::retrying::DEFAULT_RETRYABLE_STATUS_CODES;

/// Timeout applied when neither an operation nor a default timeout is set
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Category of a call, used to pick its timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationKind {
    /// Connection setup and metadata calls
    Init,
    Query,
    Insert,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeouts: TimeoutConfig,
    pub retry: RetrySettings,
    pub auth: AuthSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeouts: TimeoutConfig::default(),
            retry: RetrySettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub init: Option<Duration>,
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub query: Option<Duration>,
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub insert: Option<Duration>,
    /// Used for any kind without its own timeout
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub default: Option<Duration>,
}

impl TimeoutConfig {
    /// Operation timeout, else the default, else [`FALLBACK_TIMEOUT`]
    #[must_use]
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        let specific = match kind {
            OperationKind::Init => self.init,
            OperationKind::Query => self.query,
            OperationKind::Insert => self.insert,
            OperationKind::Other => None,
        };
        specific.or(self.default).unwrap_or(FALLBACK_TIMEOUT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed one
    pub jitter_ratio: f64,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.5,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetrySettings {
    /// Build the retry executor configuration
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the settings do not form a valid
    /// retry configuration.
    pub fn to_retry_config(&self) -> Result<RetryConfig, ConfigError> {
        RetryConfig::builder()
            .max_retries(self.max_retries)
            .exponential_backoff(self.initial_delay, self.multiplier, self.max_delay)
            .proportional_jitter(self.jitter_ratio)
            .build()
            .map_err(|e| match e {
                RetryError::InvalidConfiguration { message } => ConfigError::Invalid(message),
                _ => ConfigError::Invalid("invalid retry settings".to_string()),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Tokens this close to expiry are renewed before use
    #[serde(with = "duration_millis")]
    pub refresh_buffer: Duration,
    pub proactive_refresh: bool,
    #[serde(with = "duration_millis")]
    pub proactive_interval: Duration,
    /// Look up the token endpoint for bearer tokens with a refresh token
    pub oidc_discovery: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(300),
            proactive_refresh: false,
            proactive_interval: Duration::from_secs(300),
            oidc_discovery: true,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for an unusable base URL, retry
    /// settings that break backoff monotonicity, or zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url cannot be empty".to_string()));
        }
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Invalid(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("base_url must use http or https".to_string()));
        }

        let timeouts = [
            ("timeouts.init", self.timeouts.init),
            ("timeouts.query", self.timeouts.query),
            ("timeouts.insert", self.timeouts.insert),
            ("timeouts.default", self.timeouts.default),
        ];
        for (name, value) in timeouts {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.retry.initial_delay.is_zero() {
            return Err(ConfigError::Invalid(
                "retry.initial_delay must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay must not be below retry.initial_delay".to_string(),
            ));
        }
        self.retry.to_retry_config()?;

        if self.auth.proactive_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "auth.proactive_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
