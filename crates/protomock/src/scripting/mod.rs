//! Sandboxed execution of mock scripts.
//!
//! Every execution gets a fresh JavaScript context holding only the frozen
//! `request` object and a `console` whose output is captured per request.
//! Executions run on a dedicated worker pool so a runaway script can be
//! abandoned by wall-clock timeout while the async runtime keeps serving.

use crate::errors::FailureKind;
use crate::model::{BoundParams, IncomingRequest, MultiMap, Protocol, Target};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod js_engine;
mod script_pool;
mod validator;

pub use js_engine::execute_script;
pub use script_pool::{PoolError, ScriptPool, ScriptPoolConfig};
pub use validator::{JsValidator, ScriptValidationError, ScriptValidator};

/// A script that passed load-time validation.
///
/// Cheap to clone; the source is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    id: Arc<str>,
    source: Arc<str>,
}

impl CompiledScript {
    pub fn compile(
        id: impl Into<Arc<str>>,
        source: impl Into<Arc<str>>,
    ) -> Result<Self, ScriptValidationError> {
        let source = source.into();
        JsValidator::new().validate(&source)?;
        Ok(Self {
            id: id.into(),
            source,
        })
    }

    /// Where the script came from, e.g. `http/users/GET.js`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Engine-level bounds applied to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

/// The read-only view of a request a script sees as `request`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptContext {
    pub protocol: Protocol,
    /// HTTP verb (upper-case) or RPC method name.
    pub method: String,
    pub path: Option<String>,
    pub service: Option<String>,
    /// First value per key, keys as received.
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub params: BoundParams,
    pub body: Value,
}

fn first_values(map: &MultiMap) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(key, values)| values.first().map(|v| (key.clone(), v.clone())))
        .collect()
}

impl ScriptContext {
    pub fn from_request(request: &IncomingRequest, params: BoundParams) -> Self {
        let (method, path, service) = match &request.target {
            Target::Http { method, path } => (method.to_ascii_uppercase(), Some(path.clone()), None),
            Target::Rpc { service, method } => (method.clone(), None, Some(service.clone())),
        };
        Self {
            protocol: request.protocol(),
            method,
            path,
            service,
            headers: first_values(&request.headers),
            query: first_values(&request.query),
            params,
            body: request.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Log => "log",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// One line written through the script's `console`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Untyped completion value of a script; checked by the response mapper.
pub type RawResult = Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("script exceeded its execution bound: {0}")]
    Timeout(String),

    #[error("script threw: {0}")]
    Thrown(String),

    #[error("script returned a malformed result: {0}")]
    MalformedResult(String),

    #[error("script executor unavailable: {0}")]
    Unavailable(String),
}

impl ExecutionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::Timeout(_) => FailureKind::Timeout,
            ExecutionError::Thrown(_) => FailureKind::Thrown,
            ExecutionError::MalformedResult(_) => FailureKind::MalformedResult,
            ExecutionError::Unavailable(_) => FailureKind::Unavailable,
        }
    }
}

/// Result of one execution plus whatever the script logged on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub outcome: Result<RawResult, ExecutionError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Execution {
    pub(crate) fn failed(error: ExecutionError) -> Self {
        Self {
            outcome: Err(error),
            diagnostics: Vec::new(),
        }
    }
}

/// Runs compiled scripts against request contexts.
pub struct SandboxExecutor {
    pool: ScriptPool,
    limits: SandboxLimits,
    timeout: Duration,
}

impl SandboxExecutor {
    pub fn new(pool_config: ScriptPoolConfig, limits: SandboxLimits) -> Result<Self, PoolError> {
        let timeout = Duration::from_millis(pool_config.timeout_ms);
        Ok(Self {
            pool: ScriptPool::new(pool_config)?,
            limits,
            timeout,
        })
    }

    /// Execute on the worker pool under the configured wall-clock timeout.
    pub async fn execute(&self, script: &CompiledScript, context: ScriptContext) -> Execution {
        self.execute_with_timeout(script, context, self.timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        script: &CompiledScript,
        context: ScriptContext,
        timeout: Duration,
    ) -> Execution {
        self.pool
            .execute(script.clone(), context, self.limits, timeout)
            .await
    }

    /// Execute on the calling thread. Only the engine-level limits apply.
    pub fn execute_blocking(&self, script: &CompiledScript, context: &ScriptContext) -> Execution {
        execute_script(script, context, &self.limits)
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &ScriptPool {
        &self.pool
    }
}
