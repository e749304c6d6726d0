//! Client facade
//!
//! [`Client`] wires the layers together for every call:
//!
//! ```text
//! RequestPipeline
//!   -> RetryingTransport
//!     -> AuthenticatingTransport
//!       -> HttpTransport (or any injected Transport)
//! ```
//!
//! Each call runs under its own [`TimeoutContext`], which bounds the call
//! even when the transport ignores its signal. The raw outcome is
//! classified before the pipeline's after and error hooks see it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use vecta_common::time::{Clock, SystemClock};

use crate::auth::{build_token_service, Credential, TokenService, TokenServiceOptions};
use crate::classifier::ErrorClassifier;
use crate::config::{ClientConfig, OperationKind};
use crate::errors::{ClientError, ConfigError};
use crate::pipeline::{HeaderInterceptor, Interceptor, RequestPipeline, TracingInterceptor};
use crate::timeout::TimeoutContext;
use crate::transport::{
    AuthenticatingTransport, HttpTransport, RetryingTransport, TransientFailurePolicy, Transport,
};
use crate::wire::{ResourceType, WireRequest, WireResponse};

/// Header identifying the client library on every request
pub const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

type Authenticated = Arc<AuthenticatingTransport<Arc<dyn Transport>>>;

/// Per-call settings
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    kind: OperationKind,
    timeout: Option<Duration>,
    no_timeout: bool,
    cancellation: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the configured timeout for this kind of operation
    #[must_use]
    pub const fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the configured timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.no_timeout = false;
        self
    }

    /// Run until completion or caller cancellation
    #[must_use]
    pub const fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self.no_timeout = true;
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn effective_timeout(&self, config: &ClientConfig) -> Option<Duration> {
        if self.no_timeout {
            return None;
        }
        Some(self.timeout.unwrap_or_else(|| config.timeouts.for_kind(self.kind)))
    }
}

pub struct Client {
    config: ClientConfig,
    pipeline: RequestPipeline,
    authenticating: Authenticated,
    transport: RetryingTransport<Authenticated>,
}

impl Client {
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn token_service(&self) -> &Arc<dyn TokenService> {
        self.authenticating.token_service()
    }

    /// Whether the current credential yields a usable token
    pub async fn is_authenticated(&self) -> bool {
        self.token_service().is_authenticated().await
    }

    /// Send one request through the full stack
    ///
    /// # Errors
    /// Returns the classified failure: a status-derived kind, `Timeout` or
    /// `Cancelled`, a token failure, or the raw transport failure. Errors
    /// raised by interceptors are returned unchanged.
    #[instrument(skip(self, request, options), fields(operation = request.operation_label()))]
    pub async fn execute(
        &self,
        request: WireRequest,
        options: CallOptions,
    ) -> Result<WireResponse, ClientError> {
        let caller = options.cancellation.clone().unwrap_or_default();
        let context = TimeoutContext::new(
            options.effective_timeout(&self.config),
            &caller,
            request.operation_label(),
        );
        let context = &context;
        let transport = &self.transport;

        self.pipeline
            .execute(request, |request| {
                context.run(async move {
                    let resource = request.resource;
                    let outcome = transport.send(request, context.signal()).await;
                    ErrorClassifier::check(outcome, context, resource)
                })
            })
            .await
    }

    /// GET `path` and decode the JSON body
    ///
    /// # Errors
    /// As [`execute`](Self::execute), plus [`ClientError::Decode`] when the
    /// body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: ResourceType,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        self.execute_json(WireRequest::get(path).with_resource(resource), options).await
    }

    /// POST a JSON body to `path` and decode the JSON reply
    ///
    /// # Errors
    /// See [`get_json`](Self::get_json).
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        resource: ResourceType,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        self.execute_json(WireRequest::post(path, body).with_resource(resource), options).await
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: WireRequest,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        let response = self.execute(request, options).await?;
        response.json().map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Stop background work owned by the client
    pub async fn shutdown(&self) {
        if self.authenticating.stop_proactive_refresh().await {
            info!("Client shut down");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Client`]
///
/// A credential or a prebuilt token service is required. Without an
/// injected transport the client talks HTTP to `config.base_url`.
pub struct ClientBuilder {
    config: ClientConfig,
    credential: Option<Credential>,
    token_service: Option<Arc<dyn TokenService>>,
    transport: Option<Arc<dyn Transport>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    tracing: bool,
    clock: Option<Arc<dyn Clock>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            credential: None,
            token_service: None,
            transport: None,
            interceptors: Vec::new(),
            tracing: false,
            clock: None,
            http: None,
        }
    }

    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Use an existing token service instead of building one
    #[must_use]
    pub fn token_service(mut self, service: Arc<dyn TokenService>) -> Self {
        self.token_service = Some(service);
        self
    }

    /// Replace the HTTP transport at the bottom of the stack
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Append an interceptor after the built-in ones
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Register [`TracingInterceptor`]
    #[must_use]
    pub const fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a reqwest connection pool with the token endpoints
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Validate the configuration and assemble the client
    ///
    /// Bearer credentials with a refresh token may contact the server for
    /// OIDC discovery here. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns [`ClientError::Config`] for an invalid configuration or a
    /// missing credential.
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    pub async fn build(self) -> Result<Client, ClientError> {
        let Self {
            config,
            credential,
            token_service,
            transport,
            interceptors,
            tracing,
            clock,
            http,
        } = self;
        config.validate()?;

        let http = http.unwrap_or_default();
        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_client(http.clone(), &config.base_url)?),
        };

        let tokens = match (token_service, credential) {
            (Some(service), _) => service,
            (None, Some(credential)) => {
                let options = TokenServiceOptions {
                    refresh_buffer: config.auth.refresh_buffer,
                    discovery_base_url: config.auth.oidc_discovery.then(|| config.base_url.clone()),
                    clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
                    http,
                };
                build_token_service(credential, &options).await
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "a credential or token service is required".to_string(),
                )
                .into());
            }
        };

        let authenticating = Arc::new(AuthenticatingTransport::new(transport, tokens));
        if config.auth.proactive_refresh {
            authenticating.start_proactive_refresh(config.auth.proactive_interval);
        }

        let policy = TransientFailurePolicy::new()
            .with_status_codes(config.retry.retryable_status_codes.iter().copied());
        let retry_config = config.retry.to_retry_config()?;
        let retrying = RetryingTransport::new(authenticating.clone(), retry_config, policy)?;

        let mut pipeline = RequestPipeline::new().with(Arc::new(
            HeaderInterceptor::new()
                .header(CLIENT_VERSION_HEADER, concat!("vecta-client/", env!("CARGO_PKG_VERSION"))),
        ));
        if tracing {
            pipeline.push(Arc::new(TracingInterceptor));
        }
        for interceptor in interceptors {
            pipeline.push(interceptor);
        }

        debug!(interceptors = pipeline.len(), "Client assembled");
        Ok(Client { config, pipeline, authenticating, transport: retrying })
    }
}
