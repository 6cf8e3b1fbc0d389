use crate::model::{MockFailure, MockResponse, MockResult, Status};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub struct ResponseBuilder {
    status: StatusCode,
    body: Option<Bytes>,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status_code: StatusCode) -> Self {
        ResponseBuilder {
            status: status_code,
            body: None,
            headers: Default::default(),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn merge_headers<H, K, V>(mut self, headers: H) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        for (key, value) in headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value))
            {
                self.headers.insert(name, value);
            }
        }
        self
    }

    /// Set `content-type` unless one is already present.
    pub fn default_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(content_type));
        self
    }

    pub fn build_full(self) -> Response<Full<Bytes>> {
        let payload = self.body.unwrap_or_default();
        let mut response = Response::new(Full::new(payload));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

/// HTTP rendering of a mock result.
///
/// String bodies are sent as-is, `null` as an empty payload, anything else
/// as JSON. Failures render as `{"error": {"kind", "message"}}`.
pub fn mock_response(result: &MockResult) -> Response<Full<Bytes>> {
    match result {
        MockResult::Success(response) => success_response(response),
        MockResult::Failure(failure) => failure_response(failure),
    }
}

fn http_status(status: Status) -> StatusCode {
    match status {
        Status::Http(status) => status,
        Status::Rpc(code) => {
            tracing::debug!(?code, "RPC status rendered over HTTP");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn success_response(response: &MockResponse) -> Response<Full<Bytes>> {
    let builder = ResponseBuilder::new(http_status(response.status)).merge_headers(
        response
            .headers
            .iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    match &response.body {
        Value::Null => builder.build_full(),
        Value::String(text) => builder
            .default_content_type(TEXT_CONTENT_TYPE)
            .body(text.clone())
            .build_full(),
        body => builder
            .default_content_type(JSON_CONTENT_TYPE)
            .body(serde_json::to_vec(body).unwrap_or_default())
            .build_full(),
    }
}

fn failure_response(failure: &MockFailure) -> Response<Full<Bytes>> {
    let kind = failure.kind.map(|k| k.as_str()).unwrap_or("declared");
    let body = json!({"error": {"kind": kind, "message": failure.message}});
    json_response(http_status(failure.status), &body)
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    ResponseBuilder::new(status)
        .header(CONTENT_TYPE.as_str(), JSON_CONTENT_TYPE)
        .body(json)
        .build_full()
}

pub fn text_response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    ResponseBuilder::new(status)
        .header(CONTENT_TYPE.as_str(), content_type)
        .body(body)
        .build_full()
}

pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({"error": {"kind": status.as_str(), "message": message}}))
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}
