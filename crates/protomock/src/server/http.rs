//! HTTP transport: wire requests in, mock results out.

use super::accept_loop;
use crate::engine::MockEngine;
use crate::errors::{translate, FailureKind};
use crate::model::{IncomingRequest, MockResult, MultiMap, Protocol};
use crate::response::mock_response;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Serves the mocks tree over HTTP/1.1.
pub struct MockServer {
    listener: TcpListener,
    engine: Arc<MockEngine>,
}

impl MockServer {
    pub async fn bind(addr: SocketAddr, engine: Arc<MockEngine>) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind mock server to {addr}: {e}"))?;
        Ok(Self { listener, engine })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), anyhow::Error> {
        info!("Mock server listening on http://{}", self.local_addr()?);
        let engine = self.engine;
        accept_loop("Mock server", self.listener, shutdown, move |req, peer| {
            handle_request(req, Arc::clone(&engine), peer)
        })
        .await;
        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    engine: Arc<MockEngine>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let started = Instant::now();
        let result = match into_incoming(req).await {
            Ok(incoming) => engine.handle(&incoming).await,
            Err(failure) => failure,
        };

        let mut response = mock_response(&result);
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        info!(
            %peer,
            status = response.status().as_u16(),
            outcome = result.outcome(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}

/// Convert a hyper request into the engine's view of it.
///
/// An empty body becomes `{}`. A non-empty body is parsed as JSON; when that
/// fails the raw text is passed through, unless the request claims to be
/// JSON, which is a `BadRequest`.
pub async fn into_incoming<B>(req: Request<B>) -> Result<IncomingRequest, MockResult>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let bad_request = |message: String| translate(Protocol::Http, FailureKind::BadRequest, message);

    let mut incoming = IncomingRequest::http(parts.method.as_str(), parts.uri.path());
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            incoming = incoming.with_header(name.as_str(), value);
        }
    }
    incoming.query = parts.uri.query().map(parse_query).unwrap_or_default();

    let bytes = body
        .collect()
        .await
        .map_err(|e| bad_request(format!("failed to read request body: {e}")))?
        .to_bytes();
    if bytes.is_empty() {
        return Ok(incoming);
    }

    let claims_json = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    incoming.body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => value,
        Err(e) if claims_json => return Err(bad_request(format!("invalid JSON body: {e}"))),
        Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    };
    Ok(incoming)
}

/// Decode `a=1&b=x+y&a=2` into a multi-map; `+` means space.
pub fn parse_query(query: &str) -> MultiMap {
    let mut map = MultiMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
    map
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}
