//! Token state held by a token service

use std::fmt;
use std::time::{Duration, Instant};

use super::oauth_client::TokenResponse;

/// Refresh this long before the server-side expiry
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Current access token and its validity window
#[derive(Clone, PartialEq, Eq)]
pub struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<Duration>,
    issued_at: Instant,
}

impl TokenState {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
        issued_at: Instant,
    ) -> Self {
        Self { access_token: access_token.into(), refresh_token, expires_in, issued_at }
    }

    /// Build state from a token endpoint response received at `issued_at`
    #[must_use]
    pub fn from_response(response: TokenResponse, issued_at: Instant) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in.map(Duration::from_secs),
            issued_at,
        }
    }

    /// Keep `previous` when the endpoint did not rotate the refresh token
    #[must_use]
    pub fn or_refresh_token(mut self, previous: Option<String>) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous;
        }
        self
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub const fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }

    /// Whether `now` falls inside the refresh buffer before expiry
    ///
    /// The boundary itself counts as expiring: with a 600 s lifetime and a
    /// 300 s buffer the token is valid at 299 s and expiring from 300 s on.
    /// Tokens without a lifetime never expire.
    #[must_use]
    pub fn is_expiring(&self, now: Instant, buffer: Duration) -> bool {
        match self.expires_in {
            Some(lifetime) => now.saturating_duration_since(self.issued_at) + buffer >= lifetime,
            None => false,
        }
    }

    /// Whether the full lifetime has elapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.is_expiring(now, Duration::ZERO)
    }

    /// Non-empty and outside the refresh buffer
    #[must_use]
    pub fn is_usable(&self, now: Instant, buffer: Duration) -> bool {
        !self.access_token.is_empty() && !self.is_expiring(now, buffer)
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}
