use super::{execute_script, CompiledScript, Execution, ExecutionError, SandboxLimits, ScriptContext};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Configuration for the script thread pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptPoolConfig {
    /// Number of worker threads. 0 means auto-detect (num_cpus / 2)
    pub workers: usize,
    /// Maximum number of executions waiting for a worker
    pub queue_size: usize,
    /// Wall-clock budget per execution, queueing included
    pub timeout_ms: u64,
}

impl ScriptPoolConfig {
    fn default_workers() -> usize {
        (num_cpus::get() / 2).clamp(2, 16)
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            Self::default_workers()
        } else {
            self.workers
        }
    }
}

impl Default for ScriptPoolConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            queue_size: 1000,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn script worker {worker_id}: {source}")]
    Spawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },
}

struct ScriptTask {
    script: CompiledScript,
    context: ScriptContext,
    limits: SandboxLimits,
    result_tx: oneshot::Sender<Execution>,
}

#[derive(Clone)]
struct PoolGauges {
    queue_depth: Arc<AtomicUsize>,
    active_tasks: Arc<AtomicUsize>,
}

/// Decrements a gauge when dropped.
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

struct ScriptWorker {
    worker_id: usize,
    thread_handle: Option<JoinHandle<()>>,
}

impl ScriptWorker {
    fn spawn(
        worker_id: usize,
        work_rx: Receiver<ScriptTask>,
        shutdown_rx: Receiver<()>,
        gauges: PoolGauges,
    ) -> Result<Self, PoolError> {
        let handle = thread::Builder::new()
            .name(format!("script-worker-{worker_id}"))
            .spawn(move || {
                debug!("Script worker {} started", worker_id);

                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        debug!("Script worker {} received shutdown signal", worker_id);
                        break;
                    }

                    match work_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(task) => {
                            gauges.queue_depth.fetch_sub(1, Ordering::Relaxed);

                            // The caller already gave up waiting.
                            if task.result_tx.is_closed() {
                                debug!(
                                    script = task.script.id(),
                                    "Skipping abandoned script execution"
                                );
                                continue;
                            }

                            let _active = GaugeGuard::enter(&gauges.active_tasks);
                            let start = Instant::now();
                            let execution = execute_script(&task.script, &task.context, &task.limits);
                            debug!(
                                script = task.script.id(),
                                worker = worker_id,
                                "Script execution completed in {:?}",
                                start.elapsed()
                            );

                            let _ = task.result_tx.send(execution);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Script worker {} channel disconnected", worker_id);
                            break;
                        }
                    }
                }

                debug!("Script worker {} shutting down", worker_id);
            })
            .map_err(|source| PoolError::Spawn { worker_id, source })?;

        Ok(Self {
            worker_id,
            thread_handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for script worker {} to finish", self.worker_id);
            let _ = handle.join();
        }
    }
}

/// Fixed set of OS threads executing scripts off the async runtime.
///
/// A bounded queue provides backpressure: when it is full, callers get
/// [`ExecutionError::Unavailable`] instead of waiting.
pub struct ScriptPool {
    workers: Vec<ScriptWorker>,
    work_tx: Sender<ScriptTask>,
    shutdown_tx: Sender<()>,
    config: ScriptPoolConfig,
    gauges: PoolGauges,
}

impl ScriptPool {
    pub fn new(config: ScriptPoolConfig) -> Result<Self, PoolError> {
        let worker_count = config.effective_workers();
        info!(
            "Creating script pool with {} workers, queue size {}",
            worker_count, config.queue_size
        );

        let (work_tx, work_rx) = bounded(config.queue_size);
        let (shutdown_tx, shutdown_rx) = bounded(worker_count);
        let gauges = PoolGauges {
            queue_depth: Arc::new(AtomicUsize::new(0)),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            workers.push(ScriptWorker::spawn(
                worker_id,
                work_rx.clone(),
                shutdown_rx.clone(),
                gauges.clone(),
            )?);
        }

        Ok(Self {
            workers,
            work_tx,
            shutdown_tx,
            config,
            gauges,
        })
    }

    /// Queue an execution and wait for it at most `timeout`.
    ///
    /// On timeout the execution is abandoned: a queued task is skipped, a
    /// running one is left to hit its engine limits and its result dropped.
    pub async fn execute(
        &self,
        script: CompiledScript,
        context: ScriptContext,
        limits: SandboxLimits,
        timeout: Duration,
    ) -> Execution {
        let (result_tx, result_rx) = oneshot::channel();
        let script_id = script.id().to_string();
        let task = ScriptTask {
            script,
            context,
            limits,
            result_tx,
        };

        self.gauges.queue_depth.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.work_tx.try_send(task) {
            self.gauges.queue_depth.fetch_sub(1, Ordering::Relaxed);
            let reason = match e {
                TrySendError::Full(_) => {
                    warn!(script = %script_id, "Script pool queue is full");
                    "script queue is full"
                }
                TrySendError::Disconnected(_) => {
                    error!(script = %script_id, "Script pool is shut down");
                    "script pool is shut down"
                }
            };
            return Execution::failed(ExecutionError::Unavailable(reason.to_string()));
        }

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(execution)) => execution,
            Ok(Err(_)) => Execution::failed(ExecutionError::Unavailable(
                "script worker dropped the execution".to_string(),
            )),
            Err(_) => {
                warn!(script = %script_id, ?timeout, "Script execution timed out");
                Execution::failed(ExecutionError::Timeout(format!(
                    "no result within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Executions waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.gauges.queue_depth.load(Ordering::Relaxed)
    }

    /// Executions currently running.
    pub fn active_tasks(&self) -> usize {
        self.gauges.active_tasks.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &ScriptPoolConfig {
        &self.config
    }

    /// Stop all workers, waiting for in-flight executions.
    pub fn shutdown(&mut self) {
        if self.workers.iter().all(|w| w.thread_handle.is_none()) {
            return;
        }
        info!(
            "Shutting down script pool with {} workers",
            self.workers.len()
        );

        for _ in 0..self.workers.len() {
            let _ = self.shutdown_tx.send(());
        }
        for worker in &mut self.workers {
            worker.shutdown();
        }

        info!("Script pool shutdown complete");
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundParams, IncomingRequest};
    use serde_json::json;

    fn pool(workers: usize, queue_size: usize) -> ScriptPool {
        ScriptPool::new(ScriptPoolConfig {
            workers,
            queue_size,
            timeout_ms: 5000,
        })
        .unwrap()
    }

    fn context() -> ScriptContext {
        ScriptContext::from_request(&IncomingRequest::http("GET", "/"), BoundParams::new())
    }

    fn script(source: &str) -> CompiledScript {
        CompiledScript::compile("pool.js", source).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ScriptPoolConfig::default();
        assert!(config.workers >= 2);
        assert!(config.workers <= 16);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_zero_workers_auto_detects() {
        let config = ScriptPoolConfig {
            workers: 0,
            ..ScriptPoolConfig::default()
        };
        assert!(config.effective_workers() >= 2);
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool(2, 10);
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.queue_depth(), 0);
        assert_eq!(pool.active_tasks(), 0);
    }

    #[test]
    fn test_pool_double_shutdown() {
        let mut pool = pool(2, 10);
        pool.shutdown();
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_pool_executes_script() {
        let pool = pool(2, 10);
        let execution = pool
            .execute(
                script("({ status: 200, body: { ok: true } })"),
                context(),
                SandboxLimits::default(),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(execution.outcome, Ok(json!({"status": 200, "body": {"ok": true}})));
        assert_eq!(pool.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_pool_timeout_is_reported_and_gauges_recover() {
        let pool = pool(1, 10);
        let limits = SandboxLimits {
            loop_iteration_limit: u64::MAX,
            recursion_limit: 512,
        };
        let busy_until = "var end = Date.now() + 300; while (Date.now() < end) {} ({ body: null })";

        let execution = pool
            .execute(script(busy_until), context(), limits, Duration::from_millis(50))
            .await;
        assert!(matches!(execution.outcome, Err(ExecutionError::Timeout(_))));

        // The abandoned execution finishes on its own and releases the worker.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(pool.active_tasks(), 0);
        assert_eq!(pool.queue_depth(), 0);

        let execution = pool
            .execute(script("({ body: 1 })"), context(), limits, Duration::from_secs(5))
            .await;
        assert!(execution.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_pool_full_queue_is_unavailable() {
        let pool = pool(1, 1);
        let limits = SandboxLimits {
            loop_iteration_limit: u64::MAX,
            recursion_limit: 512,
        };
        let slow = script("var end = Date.now() + 300; while (Date.now() < end) {} ({ body: null })");
        let call = || pool.execute(slow.clone(), context(), limits, Duration::from_secs(5));

        // One running, at most one queued, the rest rejected.
        let (a, b, c, d) = tokio::join!(call(), call(), call(), call());
        let results = [a, b, c, d];
        assert!(results
            .iter()
            .any(|e| matches!(e.outcome, Err(ExecutionError::Unavailable(_)))));
        assert!(results.iter().any(|e| e.outcome.is_ok()));
    }
}
