//! Reload behavior against a real directory tree.

mod common;

use common::{engine_for, write_script};
use hyper::StatusCode;
use protomock::routing::DirectorySource;
use protomock::watcher::MockWatcher;
use protomock::{IncomingRequest, LoadError, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const OK: &str = "({ status: 200, body: 'ok' })";

#[tokio::test]
async fn test_reload_publishes_new_routes() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "http/a/GET.js", OK);
    let engine = engine_for(DirectorySource::new(dir.path()));

    let before = engine.snapshot();
    write_script(dir.path(), "http/b/GET.js", OK);
    let missing = engine.handle(&IncomingRequest::http("GET", "/b")).await;
    assert_eq!(missing.status(), Status::Http(StatusCode::NOT_FOUND));

    let summary = engine.reload().unwrap();
    assert_eq!(summary.routes, 2);
    assert_eq!(summary.http, 2);

    let found = engine.handle(&IncomingRequest::http("GET", "/b")).await;
    assert_eq!(found.status(), Status::Http(StatusCode::OK));

    // A snapshot taken earlier is untouched by the reload.
    assert_eq!(before.len(), 1);
    assert!(before.resolve_http("GET", "/b").is_none());
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_table() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "http/a/GET.js", OK);
    let engine = engine_for(DirectorySource::new(dir.path()));

    write_script(dir.path(), "http/__x/GET.js", OK);
    write_script(dir.path(), "http/__y/POST.js", OK);
    assert!(matches!(
        engine.reload(),
        Err(LoadError::AmbiguousParams { .. })
    ));
    assert_eq!(engine.generation(), 1);

    let result = engine.handle(&IncomingRequest::http("GET", "/a")).await;
    assert_eq!(result.status(), Status::Http(StatusCode::OK));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_during_reload_see_old_or_new_table() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "http/a/GET.js", OK);
    let engine = engine_for(DirectorySource::new(dir.path()));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut seen_new = false;
            while !done.load(Ordering::Acquire) {
                let table = engine.snapshot();
                let a = table.resolve_http("GET", "/a").is_some();
                let b = table.resolve_http("GET", "/b").is_some();
                let c = table.resolve_http("GET", "/c/1").is_some();
                // The new table adds /b and /c/:id together.
                assert!(a, "route /a disappeared");
                assert_eq!(b, c, "observed a partially built table");
                assert!(!(seen_new && !b), "went back to the old table");
                seen_new |= b;
                tokio::task::yield_now().await;
            }
            seen_new
        })
    };

    write_script(dir.path(), "http/b/GET.js", OK);
    write_script(dir.path(), "http/c/__id/GET.js", OK);
    let reloader = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.reload())
    };
    reloader.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    done.store(true, Ordering::Release);

    assert!(reader.await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reloads_serialize() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "http/a/GET.js", OK);
    let engine = engine_for(DirectorySource::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || engine.reload().unwrap().generation)
        })
        .collect();
    let mut generations = Vec::new();
    for handle in handles {
        generations.push(handle.await.unwrap());
    }
    generations.sort_unstable();

    assert_eq!(generations, (2..=9).collect::<Vec<u64>>());
    assert_eq!(engine.generation(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_reloads_on_change() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "http/a/GET.js", OK);
    let engine = engine_for(DirectorySource::new(dir.path()));
    let _watcher =
        MockWatcher::spawn(dir.path(), Arc::clone(&engine), Duration::from_millis(50)).unwrap();

    write_script(dir.path(), "http/b/GET.js", OK);

    let deadline = Instant::now() + Duration::from_secs(15);
    while engine.snapshot().len() < 2 {
        assert!(Instant::now() < deadline, "watcher did not reload");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(engine.generation() >= 2);
}
