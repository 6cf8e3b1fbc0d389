//! Error types and the single mapping from failure kinds to protocol statuses.

use crate::model::{MockFailure, MockResult, Protocol, Status};
use hyper::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Why the engine could not produce a script-defined response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    Timeout,
    Thrown,
    MalformedResult,
    Unavailable,
    BadRequest,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Timeout => "timeout",
            FailureKind::Thrown => "thrown",
            FailureKind::MalformedResult => "malformed_result",
            FailureKind::Unavailable => "unavailable",
            FailureKind::BadRequest => "bad_request",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FailureKind::Thrown | FailureKind::MalformedResult => StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureKind::BadRequest => StatusCode::BAD_REQUEST,
        }
    }

    pub fn rpc_code(&self) -> tonic::Code {
        match self {
            FailureKind::NotFound => tonic::Code::NotFound,
            FailureKind::Timeout => tonic::Code::DeadlineExceeded,
            FailureKind::Thrown | FailureKind::MalformedResult => tonic::Code::Internal,
            FailureKind::Unavailable => tonic::Code::Unavailable,
            FailureKind::BadRequest => tonic::Code::InvalidArgument,
        }
    }
}

/// Build the protocol-native failure for `kind`.
pub fn translate(protocol: Protocol, kind: FailureKind, message: impl Into<String>) -> MockResult {
    let status = match protocol {
        Protocol::Http => Status::Http(kind.http_status()),
        Protocol::Grpc => Status::Rpc(kind.rpc_code()),
    };
    MockResult::Failure(MockFailure {
        status,
        message: message.into(),
        kind: Some(kind),
    })
}

/// Failure to turn a mocks tree into a route table.
///
/// Paths are relative to the mocks root and use `/` separators.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("mocks directory {} does not exist", .0.display())]
    MissingRoot(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: mock script is not valid UTF-8")]
    NotUtf8 { path: String },

    #[error("{path}: `{stem}` is not an HTTP method")]
    UnknownMethod { path: String, stem: String },

    #[error("{path}: invalid dynamic segment `{segment}`, expected `__` followed by letters, digits or `_`")]
    InvalidParam { path: String, segment: String },

    #[error("{path}: parameter `{name}` is bound more than once on the same path")]
    DuplicateParam { path: String, name: String },

    #[error("{path}: dynamic segment `__{name}` conflicts with sibling `__{existing}`")]
    AmbiguousParams {
        path: String,
        name: String,
        existing: String,
    },

    #[error("{path}: dynamic segments are not supported for RPC mocks")]
    DynamicRpcSegment { path: String },

    #[error("{path}: RPC mocks must live at grpc/<package>/<Service>/<Method>.js")]
    InvalidRpcPath { path: String },

    #[error("{path}: route is already served by {existing}")]
    DuplicateRoute { path: String, existing: String },

    #[error("{path}: script does not parse: {message}")]
    Compile { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_http_statuses() {
        let cases = [
            (FailureKind::NotFound, 404),
            (FailureKind::Timeout, 504),
            (FailureKind::Thrown, 500),
            (FailureKind::MalformedResult, 500),
            (FailureKind::Unavailable, 503),
            (FailureKind::BadRequest, 400),
        ];
        for (kind, expected) in cases {
            let result = translate(Protocol::Http, kind, "boom");
            assert_eq!(result.status().code(), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_translate_rpc_codes() {
        let cases = [
            (FailureKind::NotFound, tonic::Code::NotFound),
            (FailureKind::Timeout, tonic::Code::DeadlineExceeded),
            (FailureKind::Thrown, tonic::Code::Internal),
            (FailureKind::MalformedResult, tonic::Code::Internal),
            (FailureKind::Unavailable, tonic::Code::Unavailable),
            (FailureKind::BadRequest, tonic::Code::InvalidArgument),
        ];
        for (kind, expected) in cases {
            assert_eq!(
                translate(Protocol::Grpc, kind, "boom").status(),
                Status::Rpc(expected)
            );
        }
    }

    #[test]
    fn test_translate_keeps_message_and_kind() {
        match translate(Protocol::Grpc, FailureKind::NotFound, "no mock") {
            MockResult::Failure(failure) => {
                assert_eq!(failure.message, "no mock");
                assert_eq!(failure.kind, Some(FailureKind::NotFound));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_load_error_messages_name_the_file() {
        let err = LoadError::AmbiguousParams {
            path: "http/users/__id/GET.js".to_string(),
            name: "id".to_string(),
            existing: "user_id".to_string(),
        };
        let message = err.to_string();
        assert!(message.starts_with("http/users/__id/GET.js"));
        assert!(message.contains("__user_id"));
    }
}
