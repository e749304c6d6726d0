//! Protocol-neutral request and response model
//!
//! Every layer of the transport stack speaks [`WireRequest`] and
//! [`WireResponse`]. A response carries a [`WireStatus`] that is either an
//! HTTP status code or an RPC status code, so authentication handling,
//! retry decisions and error classification work the same way for both
//! protocols.

use std::fmt;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Header carrying the bearer credential
pub const AUTHORIZATION: &str = "authorization";

/// Kind of server resource a request addresses
///
/// Used as the hint carried by `NotFound` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceType {
    Collection,
    Object,
    Tenant,
    Alias,
    Backup,
    Role,
    User,
    Group,
    Shard,
    #[default]
    Unknown,
}

const RESOURCE_NAMES: [(ResourceType, &str); 10] = [
    (ResourceType::Collection, "collection"),
    (ResourceType::Object, "object"),
    (ResourceType::Tenant, "tenant"),
    (ResourceType::Alias, "alias"),
    (ResourceType::Backup, "backup"),
    (ResourceType::Role, "role"),
    (ResourceType::User, "user"),
    (ResourceType::Group, "group"),
    (ResourceType::Shard, "shard"),
    (ResourceType::Unknown, "unknown"),
];

impl ResourceType {
    /// Wire name of the resource type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        RESOURCE_NAMES
            .iter()
            .find_map(|(kind, name)| (*kind == self).then_some(*name))
            .unwrap_or("unknown")
    }

    /// Look up a resource type by its wire name, case-insensitively
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        RESOURCE_NAMES
            .iter()
            .find_map(|(kind, wire)| wire.eq_ignore_ascii_case(name).then_some(*kind))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical RPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

const RPC_CODES: [(RpcCode, i32, &str); 17] = [
    (RpcCode::Ok, 0, "OK"),
    (RpcCode::Cancelled, 1, "CANCELLED"),
    (RpcCode::Unknown, 2, "UNKNOWN"),
    (RpcCode::InvalidArgument, 3, "INVALID_ARGUMENT"),
    (RpcCode::DeadlineExceeded, 4, "DEADLINE_EXCEEDED"),
    (RpcCode::NotFound, 5, "NOT_FOUND"),
    (RpcCode::AlreadyExists, 6, "ALREADY_EXISTS"),
    (RpcCode::PermissionDenied, 7, "PERMISSION_DENIED"),
    (RpcCode::ResourceExhausted, 8, "RESOURCE_EXHAUSTED"),
    (RpcCode::FailedPrecondition, 9, "FAILED_PRECONDITION"),
    (RpcCode::Aborted, 10, "ABORTED"),
    (RpcCode::OutOfRange, 11, "OUT_OF_RANGE"),
    (RpcCode::Unimplemented, 12, "UNIMPLEMENTED"),
    (RpcCode::Internal, 13, "INTERNAL"),
    (RpcCode::Unavailable, 14, "UNAVAILABLE"),
    (RpcCode::DataLoss, 15, "DATA_LOSS"),
    (RpcCode::Unauthenticated, 16, "UNAUTHENTICATED"),
];

impl RpcCode {
    /// Numeric code as sent on the wire
    #[must_use]
    pub fn code(self) -> i32 {
        RPC_CODES.iter().find_map(|(kind, code, _)| (*kind == self).then_some(*code)).unwrap_or(2)
    }

    /// Canonical upper-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        RPC_CODES
            .iter()
            .find_map(|(kind, _, name)| (*kind == self).then_some(*name))
            .unwrap_or("UNKNOWN")
    }

    /// Look up a code by its numeric value
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        RPC_CODES.iter().find_map(|(kind, value, _)| (*value == code).then_some(*kind))
    }

    /// Look up a code by its canonical name, case-insensitively
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        RPC_CODES
            .iter()
            .find_map(|(kind, _, wire)| wire.eq_ignore_ascii_case(name).then_some(*kind))
    }
}

/// Outcome status of a call on either protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireStatus {
    Http(u16),
    Rpc(RpcCode),
}

impl WireStatus {
    #[must_use]
    pub const fn is_success(self) -> bool {
        match self {
            Self::Http(code) => code >= 200 && code < 300,
            Self::Rpc(code) => matches!(code, RpcCode::Ok),
        }
    }

    /// HTTP 401 or RPC `UNAUTHENTICATED`
    #[must_use]
    pub const fn is_unauthenticated(self) -> bool {
        matches!(self, Self::Http(401) | Self::Rpc(RpcCode::Unauthenticated))
    }

    #[must_use]
    pub const fn http_code(self) -> Option<u16> {
        match self {
            Self::Http(code) => Some(code),
            Self::Rpc(_) => None,
        }
    }
}

impl fmt::Display for WireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "HTTP {code}"),
            Self::Rpc(code) => write!(f, "RPC {}({})", code.name(), code.code()),
        }
    }
}

/// Outbound call description
#[derive(Clone)]
pub struct WireRequest {
    pub method: Method,
    /// Path relative to the client's base URL, starting with `/`
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Resource the call addresses, used for `NotFound` hints
    pub resource: ResourceType,
    /// Label used in logs and `Timeout` errors
    pub operation: Option<String>,
}

impl WireRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            resource: ResourceType::Unknown,
            operation: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub const fn with_resource(mut self, resource: ResourceType) -> Self {
        self.resource = resource;
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attach `Authorization: Bearer <token>`, replacing any existing value
    #[must_use]
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.set_header(AUTHORIZATION, format!("Bearer {token}"));
        self
    }

    /// Insert or replace a header; names compare case-insensitively
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Operation label, or `"request"` when none was set
    #[must_use]
    pub fn operation_label(&self) -> &str {
        self.operation.as_deref().unwrap_or("request")
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case(AUTHORIZATION) {
                    (name.as_str(), "[REDACTED]")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &headers)
            .field("has_body", &self.body.is_some())
            .field("resource", &self.resource)
            .field("operation", &self.operation)
            .finish()
    }
}

/// Result of a completed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: WireStatus,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WireResponse {
    #[must_use]
    pub fn new(status: WireStatus, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    #[must_use]
    pub fn http(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(WireStatus::Http(status), body)
    }

    /// RPC response whose body is the status message
    #[must_use]
    pub fn rpc(code: RpcCode, message: impl Into<String>) -> Self {
        Self::new(WireStatus::Rpc(code), message.into().into_bytes())
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as text, replacing invalid UTF-8
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON; an empty body decodes from `null`
    ///
    /// # Errors
    /// Returns the decoder error when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        }
    }
}
