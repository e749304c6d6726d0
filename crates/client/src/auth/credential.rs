//! Credential descriptions

use std::fmt;
use std::time::Duration;

/// How a client authenticates
///
/// Immutable once constructed. `Debug` output never contains secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Static API key sent as a bearer token
    ApiKey { value: String },

    /// Pre-issued bearer token, optionally refreshable
    BearerToken {
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Duration,
    },

    /// OAuth `client_credentials` grant
    ClientCredentials {
        token_endpoint: String,
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
    },

    /// OAuth resource-owner `password` grant
    Password {
        token_endpoint: String,
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
        username: String,
        password: String,
    },
}

impl Credential {
    #[must_use]
    pub fn api_key(value: impl Into<String>) -> Self {
        Self::ApiKey { value: value.into() }
    }

    #[must_use]
    pub fn bearer(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Duration,
    ) -> Self {
        Self::BearerToken { access_token: access_token.into(), refresh_token, expires_in }
    }

    #[must_use]
    pub fn client_credentials(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self::ClientCredentials {
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret,
            scopes,
        }
    }

    #[must_use]
    pub fn password(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::Password {
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret,
            scopes,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "api_key",
            Self::BearerToken { .. } => "bearer_token",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::Password { .. } => "password",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { .. } => f.debug_struct("ApiKey").field("value", &"[REDACTED]").finish(),
            Self::BearerToken { refresh_token, expires_in, .. } => f
                .debug_struct("BearerToken")
                .field("access_token", &"[REDACTED]")
                .field("has_refresh_token", &refresh_token.is_some())
                .field("expires_in", expires_in)
                .finish(),
            Self::ClientCredentials { token_endpoint, client_id, scopes, .. } => f
                .debug_struct("ClientCredentials")
                .field("token_endpoint", token_endpoint)
                .field("client_id", client_id)
                .field("scopes", scopes)
                .finish_non_exhaustive(),
            Self::Password { token_endpoint, client_id, scopes, username, .. } => f
                .debug_struct("Password")
                .field("token_endpoint", token_endpoint)
                .field("client_id", client_id)
                .field("scopes", scopes)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}
