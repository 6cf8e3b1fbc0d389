//! Normalized request and result types exchanged between the transports and the engine.
//!
//! Transports build an [`IncomingRequest`] per call and receive a [`MockResult`]
//! back; neither type carries any wire-level detail.

use crate::errors::FailureKind;
use hyper::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Protocol a mock is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }

    /// Name of the top-level directory holding this protocol's scripts.
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "http" => Some(Protocol::Http),
            "grpc" => Some(Protocol::Grpc),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-valued string mapping used for headers, metadata and query strings.
///
/// Keys keep the caller's casing; values keep arrival order.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// Parameter name to the literal path segment it was bound to.
pub type BoundParams = BTreeMap<String, String>;

/// What the request addresses: an HTTP method + path, or an RPC service + method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Http { method: String, path: String },
    Rpc { service: String, method: String },
}

impl Target {
    pub fn protocol(&self) -> Protocol {
        match self {
            Target::Http { .. } => Protocol::Http,
            Target::Rpc { .. } => Protocol::Grpc,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Http { method, path } => write!(f, "{method} {path}"),
            Target::Rpc { service, method } => write!(f, "/{service}/{method}"),
        }
    }
}

/// A request as handed over by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub target: Target,
    /// HTTP headers or RPC metadata.
    pub headers: MultiMap,
    pub query: MultiMap,
    pub body: Value,
}

impl IncomingRequest {
    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Target::Http {
            method: method.into(),
            path: path.into(),
        })
    }

    pub fn rpc(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(Target::Rpc {
            service: service.into(),
            method: method.into(),
        })
    }

    fn new(target: Target) -> Self {
        Self {
            target,
            headers: MultiMap::new(),
            query: MultiMap::new(),
            body: Value::Object(Default::default()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.target.protocol()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Alias of [`IncomingRequest::with_header`] reading better for RPC requests.
    pub fn with_metadata(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_header(key, value)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// Protocol-native status of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Http(StatusCode),
    Rpc(tonic::Code),
}

impl Status {
    pub fn protocol(&self) -> Protocol {
        match self {
            Status::Http(_) => Protocol::Http,
            Status::Rpc(_) => Protocol::Grpc,
        }
    }

    /// Numeric value as seen on the wire (HTTP status or RPC code).
    pub fn code(&self) -> u16 {
        match self {
            Status::Http(status) => status.as_u16(),
            Status::Rpc(code) => *code as i32 as u16,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Http(status) => write!(f, "{status}"),
            Status::Rpc(code) => write!(f, "{} {code:?}", *code as i32),
        }
    }
}

/// Successful mock response.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: Status,
    /// `None` means the script supplied no custom headers, which is not the
    /// same as an explicitly empty mapping.
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Value,
}

/// Failed mock call, either declared by the script or produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MockFailure {
    pub status: Status,
    pub message: String,
    /// `None` when the script declared the error itself.
    pub kind: Option<FailureKind>,
}

/// Outcome of one `handle` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResult {
    Success(MockResponse),
    Failure(MockFailure),
}

impl MockResult {
    pub fn status(&self) -> Status {
        match self {
            MockResult::Success(response) => response.status,
            MockResult::Failure(failure) => failure.status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MockResult::Success(_))
    }

    /// Label used for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            MockResult::Success(_) => "success",
            MockResult::Failure(MockFailure { kind: None, .. }) => "declared_error",
            MockResult::Failure(MockFailure {
                kind: Some(kind), ..
            }) => kind.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_request_builder() {
        let request = IncomingRequest::http("GET", "/users/42")
            .with_header("Test-Case-Name", "Ann")
            .with_header("Accept", "a")
            .with_header("Accept", "b")
            .with_query("page", "1");

        assert_eq!(request.protocol(), Protocol::Http);
        assert_eq!(request.headers["Test-Case-Name"], vec!["Ann"]);
        assert_eq!(request.headers["Accept"], vec!["a", "b"]);
        assert_eq!(request.query["page"], vec!["1"]);
        assert_eq!(request.body, json!({}));
    }

    #[test]
    fn test_rpc_request_builder() {
        let request = IncomingRequest::rpc("example.ExampleService", "SayHello")
            .with_metadata("test-case-error", "1")
            .with_body(json!({"name": "Ann"}));

        assert_eq!(request.protocol(), Protocol::Grpc);
        assert_eq!(request.target.to_string(), "/example.ExampleService/SayHello");
        assert_eq!(request.body["name"], "Ann");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Http(StatusCode::CREATED).code(), 201);
        assert_eq!(Status::Rpc(tonic::Code::InvalidArgument).code(), 3);
        assert_eq!(Status::Rpc(tonic::Code::Ok).protocol(), Protocol::Grpc);
    }

    #[test]
    fn test_outcome_labels() {
        let declared = MockResult::Failure(MockFailure {
            status: Status::Rpc(tonic::Code::InvalidArgument),
            message: "Invalid argument".to_string(),
            kind: None,
        });
        assert_eq!(declared.outcome(), "declared_error");

        let timeout = MockResult::Failure(MockFailure {
            status: Status::Http(StatusCode::GATEWAY_TIMEOUT),
            message: "too slow".to_string(),
            kind: Some(FailureKind::Timeout),
        });
        assert_eq!(timeout.outcome(), "timeout");
        assert!(!timeout.is_success());
    }
}
