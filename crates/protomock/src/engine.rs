//! The mock engine: owns the active route table and turns an
//! [`IncomingRequest`] into a [`MockResult`].
//!
//! The table lives behind an `Arc` swapped under a short write lock. A
//! request clones the `Arc` once and finishes against that snapshot, so a
//! concurrent reload is never observed halfway.

use crate::errors::{translate, FailureKind, LoadError};
use crate::metrics;
use crate::model::{IncomingRequest, MockResult, Protocol};
use crate::response::map_result;
use crate::routing::{MockSource, RouteTable};
use crate::scripting::{Diagnostic, DiagnosticLevel, SandboxExecutor, ScriptContext};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a successful reload published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub generation: u64,
    pub routes: usize,
    pub http: usize,
    pub grpc: usize,
}

impl ReloadSummary {
    fn of(generation: u64, table: &RouteTable) -> Self {
        let counts = table.counts();
        Self {
            generation,
            routes: table.len(),
            http: counts.get(&Protocol::Http).copied().unwrap_or_default(),
            grpc: counts.get(&Protocol::Grpc).copied().unwrap_or_default(),
        }
    }
}

pub struct MockEngine {
    source: Box<dyn MockSource>,
    executor: SandboxExecutor,
    table: RwLock<Arc<RouteTable>>,
    generation: AtomicU64,
    /// Held for the whole of a reload.
    reload_lock: Mutex<()>,
}

impl MockEngine {
    /// Load the initial table. A load error here is fatal to the caller.
    pub fn new(source: impl MockSource + 'static, executor: SandboxExecutor) -> Result<Self, LoadError> {
        let table = Arc::new(RouteTable::build(&source.load()?)?);
        publish_route_counts(&table);
        info!(
            source = %source.describe(),
            routes = table.len(),
            "Mock routes loaded"
        );

        Ok(Self {
            source: Box::new(source),
            executor,
            table: RwLock::new(table),
            generation: AtomicU64::new(1),
            reload_lock: Mutex::new(()),
        })
    }

    /// The table new requests are currently resolved against.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Rebuild the table from the source and publish it.
    ///
    /// Reloads serialize with each other but never block requests. On
    /// failure the previous table stays active.
    pub fn reload(&self) -> Result<ReloadSummary, LoadError> {
        let _guard = self.reload_lock.lock();

        let built = self
            .source
            .load()
            .and_then(|tree| RouteTable::build(&tree));
        let table = match built {
            Ok(table) => Arc::new(table),
            Err(e) => {
                metrics::record_reload(false);
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Reload failed, keeping current routes"
                );
                return Err(e);
            }
        };

        let generation = self.generation.load(Ordering::Acquire) + 1;
        let summary = ReloadSummary::of(generation, &table);
        publish_route_counts(&table);
        *self.table.write() = table;
        self.generation.store(generation, Ordering::Release);
        metrics::record_reload(true);

        info!(
            generation = summary.generation,
            routes = summary.routes,
            http = summary.http,
            grpc = summary.grpc,
            "Mock routes reloaded"
        );
        Ok(summary)
    }

    /// Serve one request. Every failure comes back as a
    /// [`MockResult::Failure`]; nothing here panics or returns an error.
    pub async fn handle(&self, request: &IncomingRequest) -> MockResult {
        let protocol = request.protocol();
        let table = self.snapshot();

        let result = match table.resolve(request) {
            None => {
                debug!(request = %request.target, "No route matched");
                translate(
                    protocol,
                    FailureKind::NotFound,
                    format!("no mock registered for {}", request.target),
                )
            }
            Some(matched) => {
                let script = &matched.route.script;
                debug!(
                    request = %request.target,
                    script = script.id(),
                    params = ?matched.params,
                    "Route matched"
                );

                let context = ScriptContext::from_request(request, matched.params);
                let started = Instant::now();
                let execution = self.executor.execute(script, context).await;
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

                forward_diagnostics(script.id(), &execution.diagnostics);

                match execution.outcome {
                    Ok(raw) => {
                        metrics::record_script_execution(protocol, "success", elapsed_ms);
                        map_result(protocol, raw)
                    }
                    Err(e) => {
                        let kind = e.kind();
                        metrics::record_script_execution(protocol, kind.as_str(), elapsed_ms);
                        warn!(script = script.id(), error = %e, "Script execution failed");
                        translate(protocol, kind, e.to_string())
                    }
                }
            }
        };

        metrics::record_request(protocol, &result);
        result
    }
}

fn publish_route_counts(table: &RouteTable) {
    for (protocol, count) in table.counts() {
        metrics::set_route_count(protocol, count);
    }
}

/// Replay script console output as tracing events.
fn forward_diagnostics(script: &str, diagnostics: &[Diagnostic]) {
    for Diagnostic { level, message } in diagnostics {
        match level {
            DiagnosticLevel::Debug => {
                tracing::debug!(target: "protomock::script", script, "{message}")
            }
            DiagnosticLevel::Log | DiagnosticLevel::Info => {
                tracing::info!(target: "protomock::script", script, "{message}")
            }
            DiagnosticLevel::Warn => {
                tracing::warn!(target: "protomock::script", script, "{message}")
            }
            DiagnosticLevel::Error => {
                tracing::error!(target: "protomock::script", script, "{message}")
            }
        }
    }
}
