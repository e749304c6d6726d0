//! HTTP transport backed by reqwest

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::Transport;
use crate::errors::{ConfigError, TransportError};
use crate::wire::{RpcCode, WireRequest, WireResponse, WireStatus};

/// Trailer-style status headers set by RPC gateways
const RPC_STATUS_HEADER: &str = "grpc-status";
const RPC_MESSAGE_HEADER: &str = "grpc-message";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url`
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Self::with_client(Client::new(), base_url)
    }

    /// Reuse an existing connection pool
    ///
    /// # Errors
    /// See [`new`](Self::new).
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("invalid base URL '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base URL '{base_url}' must use http or https"
            )));
        }

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn exchange(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), self.url_for(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let http_status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let mut body = response.bytes().await?.to_vec();

        let status = match rpc_status(&headers) {
            Some(code) if code != RpcCode::Ok => {
                if body.is_empty() {
                    if let Some(message) = header_value(&headers, RPC_MESSAGE_HEADER) {
                        body = message.as_bytes().to_vec();
                    }
                }
                WireStatus::Rpc(code)
            }
            _ => WireStatus::Http(http_status),
        };

        Ok(WireResponse { status, headers, body })
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
}

fn rpc_status(headers: &[(String, String)]) -> Option<RpcCode> {
    header_value(headers, RPC_STATUS_HEADER)
        .and_then(|value| value.trim().parse::<i32>().ok())
        .and_then(RpcCode::from_code)
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request, cancel), fields(method = %request.method, path = %request.path))]
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<WireResponse, TransportError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("HTTP request cancelled");
                return Err(TransportError::Cancelled);
            }
            result = self.exchange(request) => result?,
        };

        debug!(status = %response.status, "HTTP response received");
        Ok(response)
    }
}
