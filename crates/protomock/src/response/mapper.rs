//! Turns a script's raw result into a protocol-native [`MockResult`].
//!
//! HTTP results look like `{ status, headers?, body? }`. RPC results carry
//! exactly one of `body` or `error: { code, message? }`, plus optional
//! `metadata`. Anything else is a malformed result.

use crate::errors::{translate, FailureKind};
use crate::model::{MockFailure, MockResponse, MockResult, Protocol, Status};
use crate::scripting::RawResult;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

type Fields = Map<String, Value>;

/// Map `raw` for `protocol`. Shape violations become `MalformedResult`
/// failures carrying the reason.
pub fn map_result(protocol: Protocol, raw: RawResult) -> MockResult {
    let mapped = match raw {
        Value::Object(fields) => match protocol {
            Protocol::Http => map_http(fields),
            Protocol::Grpc => map_rpc(fields),
        },
        other => Err(format!("result must be an object, got {}", kind_of(&other))),
    };
    mapped.unwrap_or_else(|reason| translate(protocol, FailureKind::MalformedResult, reason))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn present<'a>(fields: &'a Fields, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn map_http(mut fields: Fields) -> Result<MockResult, String> {
    let status = match present(&fields, "status") {
        Some(value) => http_status(value)?,
        None if fields.contains_key("body") => StatusCode::OK,
        None => return Err("result has neither `status` nor `body`".to_string()),
    };
    let headers = match present(&fields, "headers") {
        None => None,
        Some(Value::Object(map)) => Some(normalize_headers(map, true)?),
        Some(other) => return Err(format!("`headers` must be an object, got {}", kind_of(other))),
    };
    let body = fields.remove("body").unwrap_or(Value::Null);

    Ok(MockResult::Success(MockResponse {
        status: Status::Http(status),
        headers,
        body,
    }))
}

fn http_status(value: &Value) -> Result<StatusCode, String> {
    value
        .as_u64()
        .filter(|code| (100..=599).contains(code))
        .and_then(|code| StatusCode::from_u16(code as u16).ok())
        .ok_or_else(|| format!("`status` must be an integer between 100 and 599, got {value}"))
}

fn map_rpc(mut fields: Fields) -> Result<MockResult, String> {
    let metadata = match present(&fields, "metadata") {
        None => None,
        Some(Value::Object(map)) => Some(normalize_headers(map, false)?),
        Some(other) => return Err(format!("`metadata` must be an object, got {}", kind_of(other))),
    };

    let has_body = present(&fields, "body").is_some();
    let error = present(&fields, "error").cloned();
    match (has_body, error) {
        (true, Some(_)) => Err("result sets both `body` and `error`".to_string()),
        (false, None) => Err("result has neither `body` nor `error`".to_string()),
        (false, Some(error)) => rpc_error(&error),
        (true, None) => Ok(MockResult::Success(MockResponse {
            status: Status::Rpc(tonic::Code::Ok),
            headers: metadata,
            body: fields.remove("body").unwrap_or(Value::Null),
        })),
    }
}

fn rpc_error(error: &Value) -> Result<MockResult, String> {
    let Value::Object(error) = error else {
        return Err(format!("`error` must be an object, got {}", kind_of(error)));
    };
    let raw_code = present(error, "code").ok_or("`error.code` is required")?;
    let code = raw_code
        .as_i64()
        .filter(|code| (1..=16).contains(code))
        .map(|code| tonic::Code::from_i32(code as i32))
        .ok_or_else(|| format!("`error.code` must be an integer between 1 and 16, got {raw_code}"))?;
    let message = match present(error, "message") {
        None => code.description().to_string(),
        Some(Value::String(message)) => message.clone(),
        Some(other) => {
            return Err(format!("`error.message` must be a string, got {}", kind_of(other)))
        }
    };

    Ok(MockResult::Failure(MockFailure {
        status: Status::Rpc(code),
        message,
        kind: None,
    }))
}

/// Stringify header values. HTTP names are lower-cased and must be valid
/// header names; RPC metadata keys are kept as written.
fn normalize_headers(map: &Fields, http: bool) -> Result<BTreeMap<String, String>, String> {
    let mut headers = BTreeMap::new();
    for (name, value) in map {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(format!(
                    "header `{name}` must be a string, number or boolean, got {}",
                    kind_of(other)
                ))
            }
        };
        let name = if http {
            let lowered = name.to_ascii_lowercase();
            HeaderName::from_bytes(lowered.as_bytes())
                .map_err(|_| format!("`{name}` is not a valid header name"))?;
            HeaderValue::from_str(&value)
                .map_err(|_| format!("value of header `{name}` is not a valid header value"))?;
            lowered
        } else {
            name.clone()
        };
        headers.insert(name, value);
    }
    Ok(headers)
}
