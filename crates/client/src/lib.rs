//! Session management and resilient transport for the Vecta client
//!
//! Every call made through [`Client`] passes the same stack:
//! - a [`RequestPipeline`] of interceptors around the whole call
//! - a [`RetryingTransport`] for transient failures
//! - an [`AuthenticatingTransport`] attaching bearer tokens from a
//!   [`TokenService`] and recovering once from authentication failures
//! - the wire [`Transport`], HTTP by default
//!
//! Each call runs under a [`TimeoutContext`], and failures reach the caller
//! as exactly one [`ClientError`] chosen by the [`ErrorClassifier`].

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod timeout;
pub mod transport;
pub mod wire;

pub use auth::{
    build_token_service, ApiKeyTokenService, Credential, OAuthTokenService, RefreshOutcome,
    TokenError, TokenService, TokenServiceOptions,
};
pub use classifier::ErrorClassifier;
pub use client::{CallOptions, Client, ClientBuilder};
pub use config::{ClientConfig, OperationKind, FALLBACK_TIMEOUT};
pub use errors::{ClientError, ConfigError, TransportError, WireFailure};
pub use pipeline::{HeaderInterceptor, Interceptor, RequestPipeline, TracingInterceptor};
pub use timeout::TimeoutContext;
pub use transport::{
    AuthenticatingTransport, HttpTransport, RetryingTransport, TransientFailurePolicy, Transport,
};
pub use wire::{ResourceType, RpcCode, WireRequest, WireResponse, WireStatus};
