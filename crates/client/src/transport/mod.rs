//! Transport stack
//!
//! Layers, outermost first:
//! - [`RetryingTransport`]: bounded retries with backoff for transient
//!   failures
//! - [`AuthenticatingTransport`]: bearer credential attachment, one
//!   refresh-and-retry on authentication failures, proactive refresh
//! - [`HttpTransport`]: the reqwest-backed wire call
//!
//! Every layer implements [`Transport`] and observes the call's
//! cancellation signal.

pub mod authenticating;
pub mod http;
pub mod retrying;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::wire::{WireRequest, WireResponse};

pub use authenticating::AuthenticatingTransport;
pub use http::HttpTransport;
pub use retrying::{RetryingTransport, TransientFailurePolicy};

/// Sends a request and returns whatever response came back
///
/// Non-success statuses are returned as `Ok`; only failures without a
/// response are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<WireResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<WireResponse, TransportError> {
        (**self).send(request, cancel).await
    }
}
