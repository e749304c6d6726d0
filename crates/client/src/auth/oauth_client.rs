//! OAuth 2.0 token endpoint client
//!
//! Handles the three grants the token services need:
//! - `client_credentials`
//! - `password`
//! - `refresh_token`
//!
//! Requests are form-encoded POSTs. Error bodies following RFC 6749 §5.2
//! (`error`, `error_description`) are surfaced as [`OAuthClientError::OAuth`].

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Error body returned by an OAuth server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Error type for token endpoint calls
#[derive(Debug, Error)]
pub enum OAuthClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// OAuth server returned an error document
    #[error("OAuth error: {0}")]
    OAuth(OAuthErrorBody),

    /// Non-success status without an OAuth error document
    #[error("Token endpoint returned HTTP {status}")]
    Status { status: u16, body: String },

    /// Failed to parse a success response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Refresh requested without a refresh token
    #[error("No refresh token available")]
    NoRefreshToken,
}

/// Successful token endpoint response
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// A single grant request
#[derive(Clone, PartialEq, Eq)]
pub enum GrantRequest {
    ClientCredentials {
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
    },
    Password {
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
        username: String,
        password: String,
    },
    RefreshToken {
        client_id: String,
        client_secret: Option<String>,
        refresh_token: String,
    },
}

impl GrantRequest {
    /// Value of the `grant_type` form field
    #[must_use]
    pub const fn grant_type(&self) -> &'static str {
        match self {
            Self::ClientCredentials { .. } => "client_credentials",
            Self::Password { .. } => "password",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form fields for the token request
    #[must_use]
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", self.grant_type().to_string())];

        let (client_id, client_secret) = match self {
            Self::ClientCredentials { client_id, client_secret, .. }
            | Self::Password { client_id, client_secret, .. }
            | Self::RefreshToken { client_id, client_secret, .. } => (client_id, client_secret),
        };
        form.push(("client_id", client_id.clone()));
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret.clone()));
        }

        match self {
            Self::ClientCredentials { scopes, .. } => push_scope(&mut form, scopes),
            Self::Password { scopes, username, password, .. } => {
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
                push_scope(&mut form, scopes);
            }
            Self::RefreshToken { refresh_token, .. } => {
                form.push(("refresh_token", refresh_token.clone()));
            }
        }

        form
    }
}

fn push_scope(form: &mut Vec<(&'static str, String)>, scopes: &[String]) {
    if !scopes.is_empty() {
        form.push(("scope", scopes.join(" ")));
    }
}

impl fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantRequest")
            .field("grant_type", &self.grant_type())
            .finish_non_exhaustive()
    }
}

/// Something that can exchange a grant for tokens
///
/// Token services depend on this seam rather than on [`OAuthClient`] so
/// tests can count and script token requests.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a grant for a token response
    async fn request_token(&self, grant: &GrantRequest) -> Result<TokenResponse, OAuthClientError>;
}

/// reqwest-backed token endpoint client
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    token_endpoint: String,
}

impl OAuthClient {
    #[must_use]
    pub fn new(token_endpoint: impl Into<String>) -> Self {
        Self::with_http_client(Client::new(), token_endpoint)
    }

    /// Reuse an existing connection pool
    #[must_use]
    pub fn with_http_client(http: Client, token_endpoint: impl Into<String>) -> Self {
        Self { http, token_endpoint: token_endpoint.into() }
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// POST the grant to the token endpoint
    ///
    /// # Errors
    /// - [`OAuthClientError::NoRefreshToken`] for an empty refresh token
    /// - [`OAuthClientError::OAuth`] / [`OAuthClientError::Status`] for
    ///   non-success responses
    /// - [`OAuthClientError::Request`] / [`OAuthClientError::Parse`] for
    ///   transport and decoding failures
    #[instrument(
        skip(self, grant),
        fields(grant_type = grant.grant_type(), endpoint = %self.token_endpoint)
    )]
    pub async fn exchange(&self, grant: &GrantRequest) -> Result<TokenResponse, OAuthClientError> {
        if let GrantRequest::RefreshToken { refresh_token, .. } = grant {
            if refresh_token.is_empty() {
                return Err(OAuthClientError::NoRefreshToken);
            }
        }

        let response = self.http.post(&self.token_endpoint).form(&grant.form()).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token endpoint rejected grant");
            return Err(match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(error) => OAuthClientError::OAuth(error),
                Err(_) => OAuthClientError::Status { status: status.as_u16(), body },
            });
        }

        let body = response.text().await?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| OAuthClientError::Parse(e.to_string()))?;

        debug!(expires_in = ?token.expires_in, "Token endpoint issued access token");
        Ok(token)
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn request_token(&self, grant: &GrantRequest) -> Result<TokenResponse, OAuthClientError> {
        self.exchange(grant).await
    }
}
