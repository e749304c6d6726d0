//! OIDC token endpoint discovery
//!
//! The server advertises its identity provider at
//! `{base_url}/.well-known/openid-configuration` as `{ "href", "clientId" }`.
//! `href` points at the provider's discovery document, whose
//! `token_endpoint` is where refresh grants go.
//!
//! Discovery never fails loudly: any transport error, non-success status or
//! malformed document yields [`DiscoveryOutcome::NotReachable`].

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Endpoints resolved through discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcEndpoints {
    pub client_id: String,
    pub token_endpoint: String,
    /// URL of the provider discovery document
    pub issuer_document: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(OidcEndpoints),
    NotReachable { reason: String },
}

impl DiscoveryOutcome {
    #[must_use]
    pub fn endpoints(self) -> Option<OidcEndpoints> {
        match self {
            Self::Found(endpoints) => Some(endpoints),
            Self::NotReachable { .. } => None,
        }
    }
}

#[derive(Deserialize)]
struct ServerOidcConfig {
    href: String,
    #[serde(rename = "clientId")]
    client_id: String,
}

#[derive(Deserialize)]
struct ProviderDocument {
    token_endpoint: String,
}

/// Resolves the token endpoint for a server
#[derive(Debug, Clone)]
pub struct OidcDiscovery {
    http: Client,
    base_url: String,
}

impl OidcDiscovery {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http_client(Client::new(), base_url)
    }

    #[must_use]
    pub fn with_http_client(http: Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into() }
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn discover(&self) -> DiscoveryOutcome {
        let well_known = format!("{}{WELL_KNOWN_PATH}", self.base_url.trim_end_matches('/'));

        let server: ServerOidcConfig = match self.fetch_json(&well_known).await {
            Ok(config) => config,
            Err(reason) => return not_reachable(reason),
        };

        let provider: ProviderDocument = match self.fetch_json(&server.href).await {
            Ok(document) => document,
            Err(reason) => return not_reachable(reason),
        };

        debug!(token_endpoint = %provider.token_endpoint, "Resolved OIDC token endpoint");
        DiscoveryOutcome::Found(OidcEndpoints {
            client_id: server.client_id,
            token_endpoint: provider.token_endpoint,
            issuer_document: server.href,
        })
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, String> {
        let response =
            self.http.get(url).send().await.map_err(|e| format!("GET {url} failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {url} returned HTTP {}", status.as_u16()));
        }

        response.json::<T>().await.map_err(|e| format!("GET {url} returned malformed JSON: {e}"))
    }
}

fn not_reachable(reason: String) -> DiscoveryOutcome {
    warn!(%reason, "OIDC discovery failed");
    DiscoveryOutcome::NotReachable { reason }
}
