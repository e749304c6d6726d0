//! Request pipeline
//!
//! An ordered list of [`Interceptor`]s wrapped around a single send:
//! - `before_send` hooks run in registration order and may modify the
//!   request
//! - `after_receive` hooks run in reverse registration order and may
//!   modify the response
//! - when a hook or the send fails, every `on_error` hook runs in
//!   registration order and the original error is returned unchanged

pub mod interceptors;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::wire::{WireRequest, WireResponse};

pub use interceptors::{HeaderInterceptor, TracingInterceptor};

/// Hooks observing one request lifecycle
///
/// Every hook has a no-op default, so implementations override only what
/// they need.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or modify the request before it is sent
    async fn before_send(&self, _request: &mut WireRequest) -> Result<(), ClientError> {
        Ok(())
    }

    /// Inspect or modify a successful response
    async fn after_receive(
        &self,
        _request: &WireRequest,
        _response: &mut WireResponse,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    /// Observe a failure; the error cannot be replaced
    async fn on_error(&self, _request: &WireRequest, _error: &ClientError) {}
}

#[derive(Clone, Default)]
pub struct RequestPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.push(interceptor);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the hooks around `send`
    ///
    /// `send` is invoked exactly once with the request produced by the last
    /// `before_send` hook, unless a hook fails first.
    ///
    /// # Errors
    /// Returns the first error raised by a hook or by `send`, unchanged.
    pub async fn execute<F, Fut>(
        &self,
        request: WireRequest,
        send: F,
    ) -> Result<WireResponse, ClientError>
    where
        F: FnOnce(WireRequest) -> Fut,
        Fut: Future<Output = Result<WireResponse, ClientError>>,
    {
        let mut request = request;

        for interceptor in &self.interceptors {
            if let Err(error) = interceptor.before_send(&mut request).await {
                self.notify_error(&request, &error).await;
                return Err(error);
            }
        }

        let mut response = match send(request.clone()).await {
            Ok(response) => response,
            Err(error) => {
                self.notify_error(&request, &error).await;
                return Err(error);
            }
        };

        for interceptor in self.interceptors.iter().rev() {
            if let Err(error) = interceptor.after_receive(&request, &mut response).await {
                self.notify_error(&request, &error).await;
                return Err(error);
            }
        }

        Ok(response)
    }

    async fn notify_error(&self, request: &WireRequest, error: &ClientError) {
        for interceptor in &self.interceptors {
            interceptor.on_error(request, error).await;
        }
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline").field("interceptors", &self.interceptors.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::errors::WireFailure;
    use crate::wire::WireStatus;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        journal: Journal,
        fail_before: bool,
    }

    impl Recording {
        fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self { name, journal: journal.clone(), fail_before: false })
        }
    }

    #[async_trait]
    impl Interceptor for Recording {
        async fn before_send(&self, request: &mut WireRequest) -> Result<(), ClientError> {
            self.journal.lock().push(format!("before:{}", self.name));
            if self.fail_before {
                return Err(ClientError::Cancelled);
            }
            let trail = request.header("x-trail").unwrap_or_default().to_string();
            request.set_header("x-trail", format!("{trail}{}", self.name));
            Ok(())
        }

        async fn after_receive(
            &self,
            _request: &WireRequest,
            response: &mut WireResponse,
        ) -> Result<(), ClientError> {
            self.journal.lock().push(format!("after:{}", self.name));
            response.body.extend_from_slice(self.name.as_bytes());
            Ok(())
        }

        async fn on_error(&self, _request: &WireRequest, _error: &ClientError) {
            self.journal.lock().push(format!("error:{}", self.name));
        }
    }

    fn pipeline(journal: &Journal) -> RequestPipeline {
        RequestPipeline::new()
            .with(Recording::new("A", journal))
            .with(Recording::new("B", journal))
    }

    #[tokio::test]
    async fn test_hook_order_on_success() {
        let journal = Journal::default();
        let sent = Arc::new(Mutex::new(None));

        let sent_clone = sent.clone();
        let response = pipeline(&journal)
            .execute(WireRequest::get("/v1/meta"), |request| async move {
                *sent_clone.lock() = request.header("x-trail").map(str::to_string);
                Ok(WireResponse::http(200, Vec::new()))
            })
            .await
            .unwrap();

        assert_eq!(*journal.lock(), ["before:A", "before:B", "after:B", "after:A"]);
        assert_eq!(sent.lock().as_deref(), Some("AB"));
        assert_eq!(response.text(), "BA");
    }

    #[tokio::test]
    async fn test_send_error_notifies_in_order_and_propagates_unchanged() {
        let journal = Journal::default();
        let failure = WireFailure::new(WireStatus::Http(409), "already exists");

        let expected = failure.clone();
        let result = pipeline(&journal)
            .execute(WireRequest::get("/v1/schema"), |_request| async move {
                Err(ClientError::Conflict(expected))
            })
            .await;

        assert_eq!(*journal.lock(), ["before:A", "before:B", "error:A", "error:B"]);
        match result {
            Err(ClientError::Conflict(returned)) => assert_eq!(returned, failure),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_before_hook_failure_skips_send() {
        let journal = Journal::default();
        let failing =
            Arc::new(Recording { name: "A", journal: journal.clone(), fail_before: true });
        let pipeline = RequestPipeline::new().with(failing).with(Recording::new("B", &journal));
        let sent = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let sent_flag = sent.clone();
        let result = pipeline
            .execute(WireRequest::get("/v1/meta"), |_request| async move {
                sent_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(WireResponse::http(200, Vec::new()))
            })
            .await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(!sent.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(*journal.lock(), ["before:A", "error:A", "error:B"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_sends_once() {
        let pipeline = RequestPipeline::new();
        assert!(pipeline.is_empty());

        let response = pipeline
            .execute(WireRequest::get("/v1/meta"), |_request| async move {
                Ok(WireResponse::http(204, Vec::new()))
            })
            .await
            .unwrap();

        assert_eq!(response.status, WireStatus::Http(204));
    }
}
