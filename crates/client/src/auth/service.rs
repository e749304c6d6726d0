//! Token services
//!
//! A [`TokenService`] hands out a currently valid access token and renews it
//! when needed. Two implementations exist:
//! - [`ApiKeyTokenService`]: a static key that never expires
//! - [`OAuthTokenService`]: OAuth grants and pre-issued bearer tokens, with
//!   single-flight renewal
//!
//! # Renewal
//!
//! Renewal runs under a per-instance async mutex. Callers that find the
//! token expiring queue on that mutex; the first one through performs the
//! network round-trip and the rest re-check the state after acquiring it
//! and reuse the fresh token. At most one renewal is in flight per
//! instance, whether triggered by `access_token`, a forced
//! `refresh_token` or the proactive refresh task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use vecta_common::time::{Clock, SystemClock};

use super::oauth_client::{GrantRequest, OAuthClientError, TokenEndpoint, TokenResponse};
use super::token::{TokenState, DEFAULT_REFRESH_BUFFER};

/// Error type for token service operations
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token endpoint call failed
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthClientError),

    /// No token has been obtained
    #[error("Not authenticated (no tokens)")]
    NotAuthenticated,

    /// Renewal needs a refresh token that was never issued
    #[error("No refresh token available")]
    NoRefreshToken,

    /// No token endpoint is known for this credential
    #[error("Token endpoint unavailable: {0}")]
    EndpointUnavailable(String),
}

/// Result of a forced refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new token is in place
    Refreshed,
    /// The credential cannot be rotated (static API key)
    NotApplicable,
}

/// Produces valid access tokens for one credential
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Return a token that is not inside the expiry buffer, renewing first
    /// if needed
    async fn access_token(&self) -> Result<String, TokenError>;

    /// Force a renewal
    async fn refresh_token(&self) -> Result<RefreshOutcome, TokenError>;

    /// Whether a non-empty, non-expiring token is held
    async fn is_authenticated(&self) -> bool;
}

/// Static API key
pub struct ApiKeyTokenService {
    key: String,
}

impl ApiKeyTokenService {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for ApiKeyTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyTokenService").field("key", &"[REDACTED]").finish()
    }
}

#[async_trait]
impl TokenService for ApiKeyTokenService {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.key.clone())
    }

    async fn refresh_token(&self) -> Result<RefreshOutcome, TokenError> {
        Ok(RefreshOutcome::NotApplicable)
    }

    async fn is_authenticated(&self) -> bool {
        !self.key.is_empty()
    }
}

/// How an [`OAuthTokenService`] (re-)authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// Every renewal is a fresh `client_credentials` request
    ClientCredentials { client_id: String, client_secret: Option<String>, scopes: Vec<String> },
    /// Renew with the refresh token, falling back to the password grant
    Password {
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
        username: String,
        password: String,
    },
    /// Pre-issued token; renew only through its refresh token and keep
    /// handing out the held token until it has fully expired
    Bearer { client_id: String, client_secret: Option<String> },
}

impl Grant {
    const fn kind(&self) -> &'static str {
        match self {
            Self::ClientCredentials { .. } => "client_credentials",
            Self::Password { .. } => "password",
            Self::Bearer { .. } => "bearer",
        }
    }

    /// Full authentication request, if the grant can authenticate from scratch
    fn authenticate_request(&self) -> Option<GrantRequest> {
        match self {
            Self::ClientCredentials { client_id, client_secret, scopes } => {
                Some(GrantRequest::ClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    scopes: scopes.clone(),
                })
            }
            Self::Password { client_id, client_secret, scopes, username, password } => {
                Some(GrantRequest::Password {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    scopes: scopes.clone(),
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            Self::Bearer { .. } => None,
        }
    }

    fn refresh_request(&self, refresh_token: &str) -> GrantRequest {
        let (client_id, client_secret) = match self {
            Self::ClientCredentials { client_id, client_secret, .. }
            | Self::Password { client_id, client_secret, .. }
            | Self::Bearer { client_id, client_secret } => (client_id, client_secret),
        };
        GrantRequest::RefreshToken {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            refresh_token: refresh_token.to_string(),
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grant").field("kind", &self.kind()).finish_non_exhaustive()
    }
}

/// OAuth-backed token service with single-flight renewal
pub struct OAuthTokenService {
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    grant: Grant,
    clock: Arc<dyn Clock>,
    refresh_buffer: Duration,
    state: RwLock<Option<TokenState>>,
    refresh_lock: Mutex<()>,
    /// Bumped after every successful renewal
    generation: AtomicU64,
}

impl OAuthTokenService {
    #[must_use]
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, grant: Grant) -> Self {
        Self::build(Some(endpoint), grant)
    }

    /// A service that can only hand out its initial token
    ///
    /// Used for bearer credentials whose token endpoint could not be
    /// resolved; renewal reports [`TokenError::EndpointUnavailable`].
    #[must_use]
    pub fn without_endpoint(grant: Grant) -> Self {
        Self::build(None, grant)
    }

    fn build(endpoint: Option<Arc<dyn TokenEndpoint>>, grant: Grant) -> Self {
        Self {
            endpoint,
            grant,
            clock: Arc::new(SystemClock),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the time source; call before [`with_initial_token`](Self::with_initial_token)
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Seed a token issued now
    #[must_use]
    pub fn with_initial_token(
        mut self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) -> Self {
        let state = TokenState::new(access_token, refresh_token, expires_in, self.clock.now());
        self.state = RwLock::new(Some(state));
        self
    }

    /// Snapshot of the current token state
    pub async fn current_state(&self) -> Option<TokenState> {
        self.state.read().await.clone()
    }

    async fn usable_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.state
            .read()
            .await
            .as_ref()
            .filter(|state| state.is_usable(now, self.refresh_buffer))
            .map(|state| state.access_token().to_string())
    }

    /// Held bearer token that has not reached its expiry, buffer ignored
    async fn unexpired_bearer_token(&self) -> Option<String> {
        if !matches!(self.grant, Grant::Bearer { .. }) {
            return None;
        }
        let now = self.clock.now();
        self.state
            .read()
            .await
            .as_ref()
            .filter(|state| !state.access_token().is_empty() && !state.is_expired(now))
            .map(|state| state.access_token().to_string())
    }

    /// Renew the token. Callers must hold `refresh_lock`.
    async fn renew_locked(&self) -> Result<TokenState, TokenError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            let grant = self.grant.kind();
            TokenError::EndpointUnavailable(format!("no token endpoint for {grant} grant"))
        })?;

        let previous_refresh = self
            .state
            .read()
            .await
            .as_ref()
            .and_then(|state| state.refresh_token().map(str::to_string));

        let response = match (&self.grant, previous_refresh.as_deref()) {
            (Grant::ClientCredentials { .. }, _) | (_, None) => {
                self.authenticate(&**endpoint).await?
            }
            (_, Some(refresh_token)) => {
                match endpoint.request_token(&self.grant.refresh_request(refresh_token)).await {
                    Ok(response) => response,
                    Err(err) => match self.grant.authenticate_request() {
                        Some(request) => {
                            warn!(error = %err, "Refresh token exchange failed, re-authenticating");
                            endpoint.request_token(&request).await?
                        }
                        None => return Err(err.into()),
                    },
                }
            }
        };

        let state =
            TokenState::from_response(response, self.clock.now()).or_refresh_token(previous_refresh);
        *self.state.write().await = Some(state.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);

        info!(grant = self.grant.kind(), expires_in = ?state.expires_in(), "Access token renewed");
        Ok(state)
    }

    async fn authenticate(
        &self,
        endpoint: &dyn TokenEndpoint,
    ) -> Result<TokenResponse, TokenError> {
        match self.grant.authenticate_request() {
            Some(request) => {
                debug!(grant = self.grant.kind(), "Authenticating with token endpoint");
                Ok(endpoint.request_token(&request).await?)
            }
            None => Err(TokenError::NoRefreshToken),
        }
    }
}

impl std::fmt::Debug for OAuthTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenService")
            .field("grant", &self.grant)
            .field("has_endpoint", &self.endpoint.is_some())
            .field("refresh_buffer", &self.refresh_buffer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenService for OAuthTokenService {
    #[instrument(skip(self), fields(grant = self.grant.kind()))]
    async fn access_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.usable_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have renewed while we waited for the lock
        if let Some(token) = self.usable_token().await {
            debug!("Reusing token renewed by a concurrent caller");
            return Ok(token);
        }

        match self.renew_locked().await {
            Ok(state) => Ok(state.access_token().to_string()),
            Err(err) => match self.unexpired_bearer_token().await {
                Some(token) => {
                    warn!(error = %err, "Bearer token renewal failed, using held token");
                    Ok(token)
                }
                None => Err(err),
            },
        }
    }

    #[instrument(skip(self), fields(grant = self.grant.kind()))]
    async fn refresh_token(&self) -> Result<RefreshOutcome, TokenError> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            debug!("Token renewed while waiting for refresh lock");
            return Ok(RefreshOutcome::Refreshed);
        }

        self.renew_locked().await?;
        Ok(RefreshOutcome::Refreshed)
    }

    async fn is_authenticated(&self) -> bool {
        self.usable_token().await.is_some()
    }
}
