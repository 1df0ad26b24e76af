//! # scheduler.rs
//!
//! One `tokio` task per enabled root route. Each worker runs its chain,
//! persists the selected result, and sleeps until its next tick or a
//! shutdown signal — the async analogue of `BaseMonitorThread`'s daemon
//! thread loop.

use crate::chain::run_chain;
use crate::config::RouteConfig;
use crate::executor::Executor;
use crate::store::ResultStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Shared shutdown signal. Pairs an `AtomicBool` with a `Notify` so a stop
/// requested before a worker starts sleeping is never missed — a bare
/// `Notify::notified()` call racing `notify_waiters()` can otherwise drop a
/// pre-fired notification.
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(StopSignal {
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Sleeps for `seconds`, waking early if `stop` fires. A non-positive
/// duration returns immediately (mirrors `_sleep`'s no-op guard).
pub async fn cancellable_sleep(seconds: f64, stop: &Arc<StopSignal>) {
    if seconds <= 0.0 || stop.is_stopped() {
        return;
    }
    let duration = Duration::from_secs_f64(seconds);
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = stop.notify.notified() => {}
    }
}

/// Same as `cancellable_sleep`, but reports whether the wait was cut short
/// by a stop signal (used by the worker loop to break out of its interval
/// wait instead of running one more cycle).
async fn wait_cancellable(seconds: f64, stop: &Arc<StopSignal>) -> bool {
    if stop.is_stopped() {
        return true;
    }
    let duration = Duration::from_secs_f64(seconds.max(0.0));
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop.notify.notified() => true,
    }
}

/// Spawns one worker per enabled root route and returns their join handles.
pub fn spawn_workers(
    routes: Vec<RouteConfig>,
    store: Arc<ResultStore>,
    stop: Arc<StopSignal>,
    one_shot: bool,
) -> Vec<JoinHandle<()>> {
    routes
        .into_iter()
        .map(|route| {
            let store = store.clone();
            let stop = stop.clone();
            tokio::spawn(async move { run_worker(route, store, stop, one_shot).await })
        })
        .collect()
}

/// Runs `root`'s chain on its own cadence. Each cycle runs in its own
/// `tokio::task` so a panic inside a single cycle (a `WorkerCrash` in the
/// design's terms) is caught at the task boundary and logged instead of
/// silently ending this worker's loop forever — the async equivalent of the
/// original's bare `except Exception` around `BaseMonitorThread.run`'s body.
/// The `Executor` (and its cached HTTP clients) is handed into the cycle
/// task and handed back out afterward, so a clean cycle still reuses the
/// same connection pool across ticks.
async fn run_worker(root: RouteConfig, store: Arc<ResultStore>, stop: Arc<StopSignal>, one_shot: bool) {
    let root = Arc::new(root);
    let mut executor = Executor::new();
    loop {
        if stop.is_stopped() {
            break;
        }

        let cycle_root = root.clone();
        let cycle_stop = stop.clone();
        let outcome = tokio::spawn(async move {
            let record = run_chain(&executor, &cycle_root, &cycle_stop).await;
            (executor, record)
        })
        .await;

        match outcome {
            Ok((returned_executor, Some(record))) => {
                executor = returned_executor;
                store.write_result(&root.name, &record);
            }
            Ok((returned_executor, None)) => {
                executor = returned_executor;
                log::warn!("probe cycle for {} produced no result", root.name);
            }
            Err(e) => {
                log::error!("probe cycle for {} panicked: {e}", root.name);
                executor = Executor::new();
            }
        }

        if one_shot {
            break;
        }
        if wait_cancellable(root.interval, &stop).await {
            break;
        }
    }
}

/// Awaits every worker's completion, abandoning stragglers after a bounded
/// shutdown window.
pub async fn join_all_bounded(handles: Vec<JoinHandle<()>>, bound: Duration) {
    let joined = async {
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("worker task ended abnormally: {e}");
            }
        }
    };
    if tokio::time::timeout(bound, joined).await.is_err() {
        log::warn!("shutdown timed out after {bound:?}, abandoning remaining workers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn route(name: &str, url: String) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            url,
            method: "GET".to_string(),
            interval: 3600.0,
            timeout: 1.0,
            headers: IndexMap::new(),
            params: IndexMap::new(),
            data: None,
            json_body: None,
            allow_redirects: true,
            verify_ssl: true,
            ca_bundle: None,
            body_max_chars: 2048,
            file_upload: None,
            basic_auth: None,
            multipart_json_field: "json".to_string(),
            multipart_json_fields: Vec::new(),
            json_query_param: None,
            encoding_file: "utf-8".to_string(),
            encoding_json: "utf-8".to_string(),
            delay_before: None,
            children_delay: 0.0,
            wait_for: None,
            tags: Vec::new(),
            monitor_type: "http".to_string(),
            enabled: true,
            children: Vec::new(),
        }
    }

    #[tokio::test]
    async fn one_shot_worker_writes_a_result_and_returns() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempdir().unwrap();
        let results_path = dir.path().join("results.json");
        let store = Arc::new(ResultStore::new(results_path.clone(), 1).unwrap());
        let stop = StopSignal::new();

        let routes = vec![route("down", format!("http://127.0.0.1:{port}/"))];
        let handles = spawn_workers(routes, store, stop, true);
        join_all_bounded(handles, Duration::from_secs(5)).await;

        let content = std::fs::read_to_string(&results_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["routes"]["down"]["ok"], false);
    }

    #[tokio::test]
    async fn cancellable_sleep_returns_immediately_once_stopped() {
        let stop = StopSignal::new();
        stop.trigger();
        let started = std::time::Instant::now();
        cancellable_sleep(3600.0, &stop).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stopping_immediately_bounds_a_long_interval_worker() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("results.json"), 1).unwrap());
        let stop = StopSignal::new();

        let routes = vec![route("slow", format!("http://127.0.0.1:{port}/"))];
        let handles = spawn_workers(routes, store, stop.clone(), false);
        stop.trigger();

        let started = std::time::Instant::now();
        join_all_bounded(handles, Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
