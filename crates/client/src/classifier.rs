//! Failure classification
//!
//! Maps raw call outcomes to [`ClientError`] in a fixed priority order:
//!
//! 1. A cancellation caused by the call's timeout becomes `Timeout`; any
//!    other cancellation becomes `Cancelled`
//! 2. Status codes with a dedicated kind (400, 401, 403, 404, 409 and their
//!    RPC equivalents, RPC `UNIMPLEMENTED`)
//! 3. Known server messages on 422, 5xx and generic RPC failures
//! 4. Any other 422 becomes `UnprocessableEntity`
//! 5. Everything else is wrapped unchanged in `Server`
//!
//! Classification runs after retries; classified errors are never retried.

use tracing::debug;

use crate::errors::{ClientError, TransportError, WireFailure};
use crate::timeout::TimeoutContext;
use crate::wire::{ResourceType, RpcCode, WireResponse, WireStatus};

/// Case-insensitive message fragments with a dedicated error kind
const MESSAGE_RULES: [(&str, fn(WireFailure) -> ClientError); 3] = [
    ("maximum number of collections", ClientError::CollectionLimitReached),
    ("no module with name", ClientError::ModuleNotAvailable),
    ("could not vectorize", ClientError::ExternalModuleProblem),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Pass successful responses through and classify everything else
    ///
    /// # Errors
    /// Returns the classified error for a failed outcome.
    pub fn check(
        outcome: Result<WireResponse, TransportError>,
        context: &TimeoutContext,
        resource: ResourceType,
    ) -> Result<WireResponse, ClientError> {
        match outcome {
            Ok(response) if response.status.is_success() => Ok(response),
            Ok(response) => Err(Self::classify_response(&response, resource)),
            Err(error) => Err(Self::classify_transport(error, context)),
        }
    }

    /// Classify a transport failure that carries no status
    #[must_use]
    pub fn classify_transport(error: TransportError, context: &TimeoutContext) -> ClientError {
        match error {
            TransportError::Cancelled => context.cancellation_error(),
            TransportError::Token(token_error) => ClientError::Token(token_error),
            other => ClientError::Transport(other),
        }
    }

    /// Classify a failed response
    #[must_use]
    pub fn classify_response(response: &WireResponse, resource: ResourceType) -> ClientError {
        Self::classify_failure(WireFailure::from_response(response), resource)
    }

    #[must_use]
    pub fn classify_failure(failure: WireFailure, resource: ResourceType) -> ClientError {
        let error = match failure.status {
            WireStatus::Http(400) | WireStatus::Rpc(RpcCode::InvalidArgument) => {
                ClientError::BadRequest(failure)
            }
            WireStatus::Http(401) | WireStatus::Rpc(RpcCode::Unauthenticated) => {
                ClientError::Unauthenticated(failure)
            }
            WireStatus::Http(403) | WireStatus::Rpc(RpcCode::PermissionDenied) => {
                ClientError::Unauthorized(failure)
            }
            WireStatus::Http(404) | WireStatus::Rpc(RpcCode::NotFound) => {
                ClientError::NotFound { resource, failure }
            }
            WireStatus::Http(409) | WireStatus::Rpc(RpcCode::AlreadyExists) => {
                ClientError::Conflict(failure)
            }
            WireStatus::Rpc(RpcCode::Unimplemented) => ClientError::FeatureNotSupported(failure),
            status if inspects_message(status) => Self::classify_message(failure),
            _ => ClientError::Server(failure),
        };

        debug!(kind = %error, "Classified failed call");
        error
    }

    fn classify_message(failure: WireFailure) -> ClientError {
        let message = failure.message.to_lowercase();
        let rule = MESSAGE_RULES.iter().find(|(fragment, _)| message.contains(fragment));

        match rule {
            Some((_, kind)) => kind(failure),
            None if failure.status == WireStatus::Http(422) => {
                ClientError::UnprocessableEntity(failure)
            }
            None => ClientError::Server(failure),
        }
    }
}

const fn inspects_message(status: WireStatus) -> bool {
    match status {
        WireStatus::Http(code) => code == 422 || (code >= 500 && code < 600),
        WireStatus::Rpc(code) => matches!(code, RpcCode::Unknown | RpcCode::Internal),
    }
}
