//! Admin API: health, route listing, reload and Prometheus metrics.
//!
//! | Method | Path       | Response                                   |
//! |--------|------------|--------------------------------------------|
//! | GET    | `/health`  | `{"status":"ok","generation":N,"routes":N}`|
//! | GET    | `/routes`  | route descriptors, sorted                  |
//! | POST   | `/reload`  | reload summary, or 422 with the load error |
//! | GET    | `/metrics` | Prometheus text format                     |

use super::accept_loop;
use crate::engine::MockEngine;
use crate::metrics::collect_metrics;
use crate::response::{error_response, json_response, not_found, text_response};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct AdminServer {
    listener: TcpListener,
    engine: Arc<MockEngine>,
}

impl AdminServer {
    pub async fn bind(addr: SocketAddr, engine: Arc<MockEngine>) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind admin API to {addr}: {e}"))?;
        Ok(Self { listener, engine })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), anyhow::Error> {
        info!("Admin API listening on http://{}", self.local_addr()?);
        let engine = self.engine;
        accept_loop("Admin API", self.listener, shutdown, move |req, _peer| {
            route_request(req, Arc::clone(&engine))
        })
        .await;
        Ok(())
    }
}

/// Dispatch on method and path. Request bodies are ignored.
pub async fn route_request<B>(req: Request<B>, engine: Arc<MockEngine>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("Admin API: {} {}", method, path);

    match (method, path.as_str()) {
        (Method::GET, "/health") => handle_health(&engine),
        (Method::GET, "/routes") => json_response(StatusCode::OK, &engine.snapshot().routes()),
        (Method::POST, "/reload") => handle_reload(engine).await,
        (Method::GET, "/metrics") => {
            text_response(StatusCode::OK, METRICS_CONTENT_TYPE, collect_metrics())
        }
        _ => not_found(),
    }
}

fn handle_health(engine: &MockEngine) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "generation": engine.generation(),
            "routes": engine.snapshot().len(),
        }),
    )
}

async fn handle_reload(engine: Arc<MockEngine>) -> Response<Full<Bytes>> {
    match tokio::task::spawn_blocking(move || engine.reload()).await {
        Ok(Ok(summary)) => json_response(StatusCode::OK, &summary),
        Ok(Err(e)) => json_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &json!({"error": {"kind": "load_error", "message": e.to_string()}}),
        ),
        Err(e) => {
            warn!("Reload task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "reload task failed")
        }
    }
}
