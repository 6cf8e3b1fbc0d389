//! Sandbox and script pool configuration.

use crate::scripting::{SandboxLimits, ScriptPoolConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptConfig {
    /// Wall-clock bound per execution, queueing included.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Number of worker threads (0 = auto-detect: num_cpus/2, min 2, max 16)
    #[serde(default)]
    pub workers: usize,
    /// Maximum queue size for pending script executions
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_loop_iteration_limit")]
    pub loop_iteration_limit: u64,
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl ScriptConfig {
    pub fn pool_config(&self) -> ScriptPoolConfig {
        ScriptPoolConfig {
            workers: self.workers,
            queue_size: self.queue_size,
            timeout_ms: self.timeout_ms,
        }
    }

    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            loop_iteration_limit: self.loop_iteration_limit,
            recursion_limit: self.recursion_limit,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            workers: 0,
            queue_size: default_queue_size(),
            loop_iteration_limit: default_loop_iteration_limit(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    ScriptPoolConfig::default().timeout_ms
}

fn default_queue_size() -> usize {
    ScriptPoolConfig::default().queue_size
}

fn default_loop_iteration_limit() -> u64 {
    SandboxLimits::default().loop_iteration_limit
}

fn default_recursion_limit() -> usize {
    SandboxLimits::default().recursion_limit
}
