//! Mocks directory watcher for hot reload.

use crate::engine::MockEngine;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Keeps the filesystem watch alive; dropping it stops reloading.
pub struct MockWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl MockWatcher {
    /// Watch `root` recursively and reload `engine` once changes have been
    /// quiet for `debounce`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        root: &Path,
        engine: Arc<MockEngine>,
        debounce: Duration,
    ) -> Result<Self, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !event.kind.is_access() {
                        tracing::debug!(paths = ?event.paths, "Mocks change detected");
                        let _ = change_tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(reload_loop(engine, change_rx, debounce));
        tracing::info!(path = ?root, debounce_ms = debounce.as_millis() as u64, "Mocks watcher started");

        Ok(Self {
            path: root.to_path_buf(),
            _watcher: watcher,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MockWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reload_loop(
    engine: Arc<MockEngine>,
    mut changes: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) {
    while changes.recv().await.is_some() {
        // Swallow the burst an editor or `git checkout` produces.
        loop {
            match tokio::time::timeout(debounce, changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let engine = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || engine.reload()).await {
            // Failures are logged by the engine; the old table keeps serving.
            Ok(_) => {}
            Err(e) => tracing::error!("Reload task failed: {}", e),
        }
    }
}
