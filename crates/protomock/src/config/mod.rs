//! Configuration for the protomock server.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration serving `./mocks` on port 8080.

mod listen;
mod observe;
mod scripting;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use listen::{AdminConfig, HttpConfig};
pub use observe::{LogConfig, LogFormat, WatchConfig};
pub use scripting::ScriptConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the mocks tree (`http/` and `grpc/` live underneath).
    #[serde(default = "default_mocks_dir")]
    pub mocks_dir: PathBuf,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_mocks_dir() -> PathBuf {
    PathBuf::from("mocks")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mocks_dir: default_mocks_dir(),
            http: HttpConfig::default(),
            admin: AdminConfig::default(),
            script: ScriptConfig::default(),
            watch: WatchConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        Self::from_yaml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
        // serde_yaml rejects an empty document for a struct.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.script.timeout_ms == 0 {
            anyhow::bail!("script.timeout_ms must be greater than 0");
        }
        if self.script.queue_size == 0 {
            anyhow::bail!("script.queue_size must be greater than 0");
        }
        if self.script.loop_iteration_limit == 0 || self.script.recursion_limit == 0 {
            anyhow::bail!("script.loop_iteration_limit and script.recursion_limit must be greater than 0");
        }
        if self.admin.enabled && self.http.port != 0 && self.http.port == self.admin.port {
            anyhow::bail!(
                "http.port and admin.port must differ (both are {})",
                self.http.port
            );
        }
        if self.log.level.trim().is_empty() {
            anyhow::bail!("log.level must not be empty");
        }
        Ok(())
    }
}
