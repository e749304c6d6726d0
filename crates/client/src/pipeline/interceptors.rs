//! Built-in interceptors

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Interceptor;
use crate::errors::ClientError;
use crate::wire::{WireRequest, WireResponse};

/// Logs request start, response status and failures
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

#[async_trait]
impl Interceptor for TracingInterceptor {
    async fn before_send(&self, request: &mut WireRequest) -> Result<(), ClientError> {
        debug!(
            operation = request.operation_label(),
            method = %request.method,
            path = %request.path,
            "Sending request"
        );
        Ok(())
    }

    async fn after_receive(
        &self,
        request: &WireRequest,
        response: &mut WireResponse,
    ) -> Result<(), ClientError> {
        info!(
            operation = request.operation_label(),
            path = %request.path,
            status = %response.status,
            bytes = response.body.len(),
            "Request completed"
        );
        Ok(())
    }

    async fn on_error(&self, request: &WireRequest, error: &ClientError) {
        warn!(
            operation = request.operation_label(),
            path = %request.path,
            error = %error,
            "Request failed"
        );
    }
}

/// Adds fixed headers to every request
///
/// Headers already present on the request are left alone.
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: Vec<(String, String)>,
}

impl HeaderInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl Interceptor for HeaderInterceptor {
    async fn before_send(&self, request: &mut WireRequest) -> Result<(), ClientError> {
        for (name, value) in &self.headers {
            if request.header(name).is_none() {
                request.set_header(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}
