//! Credential attachment and authentication recovery
//!
//! Every request gets `Authorization: Bearer <token>` from the
//! [`TokenService`]. An authentication failure (HTTP 401 or RPC
//! `UNAUTHENTICATED`) forces one refresh; if that produced a new token the
//! request is sent once more. There is no further retry at this layer.
//!
//! The transport can also keep the token warm with a background task that
//! refreshes on a fixed interval. The task is owned by the transport,
//! stopped by [`stop_proactive_refresh`](AuthenticatingTransport::stop_proactive_refresh)
//! and cancelled on drop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Transport;
use crate::auth::{RefreshOutcome, TokenService};
use crate::errors::TransportError;
use crate::wire::{WireRequest, WireResponse};

/// Default proactive refresh interval
pub const DEFAULT_PROACTIVE_INTERVAL: Duration = Duration::from_secs(300);

/// How long `stop_proactive_refresh` waits for the task to finish
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

struct BackgroundRefresh {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AuthenticatingTransport<T> {
    inner: T,
    tokens: Arc<dyn TokenService>,
    background: Mutex<Option<BackgroundRefresh>>,
}

impl<T> AuthenticatingTransport<T> {
    pub fn new(inner: T, tokens: Arc<dyn TokenService>) -> Self {
        Self { inner, tokens, background: Mutex::new(None) }
    }

    pub fn token_service(&self) -> &Arc<dyn TokenService> {
        &self.tokens
    }

    /// Start refreshing the token every `interval`
    ///
    /// Returns `false` without starting anything if a task is already
    /// running or `interval` is zero. Must be called inside a tokio runtime.
    pub fn start_proactive_refresh(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            warn!("Ignoring proactive refresh with zero interval");
            return false;
        }

        let mut slot = self.background.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("Proactive refresh already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(self.tokens.clone(), interval, cancel.clone()));
        *slot = Some(BackgroundRefresh { cancel, handle });

        info!(interval = ?interval, "Proactive token refresh started");
        true
    }

    /// Whether the background refresh task is alive
    pub fn is_refreshing_in_background(&self) -> bool {
        self.background.lock().as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    /// Cancel the background task and wait briefly for it to exit
    ///
    /// Returns `false` if no task was running.
    #[instrument(skip(self))]
    pub async fn stop_proactive_refresh(&self) -> bool {
        let task = self.background.lock().take();
        let Some(mut task) = task else {
            return false;
        };

        task.cancel.cancel();
        match tokio::time::timeout(STOP_GRACE_PERIOD, &mut task.handle).await {
            Ok(Ok(())) => info!("Proactive token refresh stopped"),
            Ok(Err(e)) if e.is_cancelled() => debug!("Proactive refresh task was aborted"),
            Ok(Err(e)) => warn!("Proactive refresh task panicked: {}", e),
            Err(_) => {
                warn!("Proactive refresh task did not stop within {:?}; aborting", STOP_GRACE_PERIOD);
                task.handle.abort();
            }
        }
        true
    }

    async fn token(&self, cancel: &CancellationToken) -> Result<String, TransportError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            token = self.tokens.access_token() => Ok(token?),
        }
    }
}

async fn refresh_loop(
    tokens: Arc<dyn TokenService>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Proactive refresh loop cancelled");
                break;
            }
            () = tokio::time::sleep(interval) => {}
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = tokens.refresh_token() => outcome,
        };

        match outcome {
            Ok(RefreshOutcome::Refreshed) => debug!("Proactive token refresh succeeded"),
            Ok(RefreshOutcome::NotApplicable) => {
                debug!("Credential cannot be refreshed; stopping proactive refresh");
                break;
            }
            Err(e) => warn!(error = %e, "Proactive token refresh failed"),
        }
    }
}

impl<T> Drop for AuthenticatingTransport<T> {
    fn drop(&mut self) {
        if let Some(task) = self.background.get_mut().take() {
            if !task.handle.is_finished() {
                debug!("AuthenticatingTransport dropped with proactive refresh running; cancelling");
            }
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for AuthenticatingTransport<T> {
    #[instrument(skip(self, request, cancel), fields(operation = request.operation_label()))]
    async fn send(
        &self,
        request: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<WireResponse, TransportError> {
        let token = self.token(cancel).await?;
        let response = self.inner.send(request.clone().with_bearer(&token), cancel).await?;

        if !response.status.is_unauthenticated() {
            return Ok(response);
        }

        debug!(status = %response.status, "Authentication rejected; forcing token refresh");
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = self.tokens.refresh_token() => outcome,
        };
        match outcome {
            Ok(RefreshOutcome::Refreshed) => {}
            Ok(RefreshOutcome::NotApplicable) => return Ok(response),
            Err(e) => {
                warn!(error = %e, "Token refresh after authentication failure failed");
                return Ok(response);
            }
        }

        let token = self.token(cancel).await?;
        self.inner.send(request.with_bearer(&token), cancel).await
    }
}
