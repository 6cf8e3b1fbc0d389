//! Network front ends: the HTTP mock listener and the admin API.

mod admin;
mod http;

pub use admin::AdminServer;
pub use http::{into_incoming, parse_query, MockServer, REQUEST_ID_HEADER};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Accept connections until `shutdown` fires, serving each one with
/// `handler` on its own task.
async fn accept_loop<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
    handler: F,
) where
    F: Fn(Request<Incoming>, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let response = handler(req, peer);
                                async move { Ok::<_, Infallible>(response.await) }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!("{} connection error from {}: {}", name, peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("{} accept error: {}", name, e);
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("{} shutting down", name);
                break;
            }
        }
    }
}
