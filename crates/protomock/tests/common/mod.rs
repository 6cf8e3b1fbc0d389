//! Shared helpers for the integration tests.
#![allow(dead_code)]

use protomock::routing::{DirectorySource, MockSource};
use protomock::scripting::{SandboxExecutor, SandboxLimits, ScriptPoolConfig};
use protomock::MockEngine;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The fixtures shipped at the repository root.
pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../mocks")
}

pub fn executor(timeout_ms: u64, limits: SandboxLimits) -> SandboxExecutor {
    let config = ScriptPoolConfig {
        workers: 2,
        queue_size: 64,
        timeout_ms,
    };
    SandboxExecutor::new(config, limits).unwrap()
}

pub fn engine_for(source: impl MockSource + 'static) -> Arc<MockEngine> {
    Arc::new(MockEngine::new(source, executor(5000, SandboxLimits::default())).unwrap())
}

pub fn fixtures_engine() -> Arc<MockEngine> {
    engine_for(DirectorySource::new(fixtures_dir()))
}

pub fn write_script(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}
