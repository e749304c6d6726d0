//! Credentials and token services
//!
//! - [`Credential`]: what the caller authenticates with
//! - [`TokenService`]: turns a credential into valid access tokens
//! - [`OAuthClient`]: token endpoint calls for the OAuth grants
//! - [`OidcDiscovery`]: locates the token endpoint for bearer credentials
//!
//! [`build_token_service`] picks the right service for a credential.

pub mod credential;
pub mod discovery;
pub mod oauth_client;
pub mod service;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vecta_common::time::{Clock, SystemClock};

pub use credential::Credential;
pub use discovery::{DiscoveryOutcome, OidcDiscovery, OidcEndpoints};
pub use oauth_client::{
    GrantRequest, OAuthClient, OAuthClientError, OAuthErrorBody, TokenEndpoint, TokenResponse,
};
pub use service::{
    ApiKeyTokenService, Grant, OAuthTokenService, RefreshOutcome, TokenError, TokenService,
};
pub use token::{TokenState, DEFAULT_REFRESH_BUFFER};

/// Inputs for [`build_token_service`]
#[derive(Clone)]
pub struct TokenServiceOptions {
    pub refresh_buffer: Duration,
    /// Server base URL used for OIDC discovery of bearer refresh endpoints
    pub discovery_base_url: Option<String>,
    pub clock: Arc<dyn Clock>,
    pub http: reqwest::Client,
}

impl Default for TokenServiceOptions {
    fn default() -> Self {
        Self {
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            discovery_base_url: None,
            clock: Arc::new(SystemClock),
            http: reqwest::Client::new(),
        }
    }
}

impl std::fmt::Debug for TokenServiceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenServiceOptions")
            .field("refresh_buffer", &self.refresh_buffer)
            .field("discovery_base_url", &self.discovery_base_url)
            .finish_non_exhaustive()
    }
}

/// Build the token service for a credential
///
/// OAuth credentials authenticate lazily on the first `access_token` call.
/// A bearer token with a refresh token resolves its token endpoint through
/// OIDC discovery; when discovery is disabled or not reachable the service
/// still hands out the initial token until it expires but cannot renew it.
pub async fn build_token_service(
    credential: Credential,
    options: &TokenServiceOptions,
) -> Arc<dyn TokenService> {
    info!(kind = credential.kind(), "Building token service");

    let endpoint_for = |url: String| -> Arc<dyn TokenEndpoint> {
        Arc::new(OAuthClient::with_http_client(options.http.clone(), url))
    };

    let service = match credential {
        Credential::ApiKey { value } => return Arc::new(ApiKeyTokenService::new(value)),
        Credential::ClientCredentials { token_endpoint, client_id, client_secret, scopes } => {
            OAuthTokenService::new(
                endpoint_for(token_endpoint),
                Grant::ClientCredentials { client_id, client_secret, scopes },
            )
            .with_clock(options.clock.clone())
        }
        Credential::Password {
            token_endpoint,
            client_id,
            client_secret,
            scopes,
            username,
            password,
        } => OAuthTokenService::new(
            endpoint_for(token_endpoint),
            Grant::Password { client_id, client_secret, scopes, username, password },
        )
        .with_clock(options.clock.clone()),
        Credential::BearerToken { access_token, refresh_token, expires_in } => {
            let discovered = match (&refresh_token, &options.discovery_base_url) {
                (Some(_), Some(base_url)) => {
                    OidcDiscovery::with_http_client(options.http.clone(), base_url.clone())
                        .discover()
                        .await
                        .endpoints()
                }
                _ => None,
            };

            let service = match discovered {
                Some(endpoints) => OAuthTokenService::new(
                    endpoint_for(endpoints.token_endpoint),
                    Grant::Bearer { client_id: endpoints.client_id, client_secret: None },
                ),
                None => {
                    if refresh_token.is_some() {
                        warn!("No token endpoint resolved; bearer token will not be renewed");
                    }
                    OAuthTokenService::without_endpoint(Grant::Bearer {
                        client_id: String::new(),
                        client_secret: None,
                    })
                }
            };

            service.with_clock(options.clock.clone()).with_initial_token(
                access_token,
                refresh_token,
                Some(expires_in),
            )
        }
    };

    Arc::new(service.with_refresh_buffer(options.refresh_buffer))
}
