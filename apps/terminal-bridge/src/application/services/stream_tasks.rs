//! Stream Task Manager
//!
//! Runs independent periodic fetch loops keyed by `(symbol, request_id)`.
//! Each loop calls its [`FetchSource`] once per interval and forwards the
//! result to a shared sink channel.
//!
//! # Guarantees
//!
//! - A task is in the table before its first tick, so a `stop` issued right
//!   after `start` always finds it.
//! - Ticks of one task never overlap. Cancellation is observed at tick
//!   boundaries; a fetch already in flight finishes, and its result is
//!   discarded.
//! - A failing or panicking fetch is reported to the sink and the task keeps
//!   its schedule. Other tasks are unaffected.
//! - `start` and `stop` hold the table lock only while mutating it, never
//!   across a fetch.
//! - A task that exits on its own (sink closed) removes its entry, so the key
//!   can be started again. After `shutdown`, `start` is refused.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FetchSource;
use crate::domain::streaming::{StreamKey, StreamPayload, StreamUpdate};
use crate::infrastructure::metrics;

/// Errors starting stream tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamTaskError {
    /// Tick interval must be non-zero.
    #[error("stream interval must be greater than zero")]
    ZeroInterval,

    /// Tasks can only be spawned inside a Tokio runtime.
    #[error("no tokio runtime available to spawn stream tasks")]
    NoRuntime,

    /// The manager has been shut down.
    #[error("stream task manager is shut down")]
    ShutDown,
}

/// Generate a fresh request id.
#[must_use]
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Stats
// =============================================================================

/// Counters shared with the health endpoint.
#[derive(Debug, Default)]
pub struct StreamTaskStats {
    active: AtomicUsize,
    started: AtomicU64,
    stopped: AtomicU64,
    ticks: AtomicU64,
    failures: AtomicU64,
}

impl StreamTaskStats {
    /// Number of registered tasks.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Tasks started since creation.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Tasks stopped since creation.
    #[must_use]
    pub fn stopped(&self) -> u64 {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Fetches completed (successful or not).
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Fetches that failed or panicked.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Manager
// =============================================================================

struct TaskHandle {
    id: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

type TaskTable = Mutex<HashMap<StreamKey, TaskHandle>>;

fn record_removal(stats: &StreamTaskStats, remaining: usize, removed: usize) {
    stats.active.store(remaining, Ordering::Relaxed);
    stats.stopped.fetch_add(removed as u64, Ordering::Relaxed);
    metrics::set_stream_tasks(remaining);
}

/// Owns the table of running stream tasks.
pub struct StreamTaskManager<T> {
    tasks: Arc<TaskTable>,
    next_id: AtomicU64,
    sink: mpsc::Sender<StreamUpdate<T>>,
    shutdown: CancellationToken,
    stats: Arc<StreamTaskStats>,
}

impl<T> std::fmt::Debug for StreamTaskManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTaskManager")
            .field("tasks", &self.tasks.lock().len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> StreamTaskManager<T> {
    /// Create a manager that delivers every update to `sink`.
    #[must_use]
    pub fn new(sink: mpsc::Sender<StreamUpdate<T>>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            sink,
            shutdown: CancellationToken::new(),
            stats: Arc::new(StreamTaskStats::default()),
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<StreamTaskStats> {
        Arc::clone(&self.stats)
    }

    /// Start one task per symbol under `request_id`.
    ///
    /// Symbols already running under this request are left alone. Returns the
    /// keys that were newly started.
    ///
    /// # Errors
    ///
    /// Returns [`StreamTaskError::ZeroInterval`] for a zero interval,
    /// [`StreamTaskError::NoRuntime`] outside a Tokio runtime and
    /// [`StreamTaskError::ShutDown`] once [`shutdown`](Self::shutdown) ran.
    pub fn start<S: AsRef<str>>(
        &self,
        request_id: &str,
        symbols: &[S],
        interval: Duration,
        source: Arc<dyn FetchSource<Output = T>>,
    ) -> Result<Vec<StreamKey>, StreamTaskError> {
        if interval.is_zero() {
            return Err(StreamTaskError::ZeroInterval);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| StreamTaskError::NoRuntime)?;

        let mut started = Vec::new();
        let mut tasks = self.tasks.lock();
        if self.shutdown.is_cancelled() {
            return Err(StreamTaskError::ShutDown);
        }

        for symbol in symbols {
            let key = StreamKey::new(symbol.as_ref(), request_id);
            if tasks.contains_key(&key) {
                tracing::debug!(%key, "Stream task already running");
                continue;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = self.shutdown.child_token();
            let worker = StreamWorker {
                id,
                key: key.clone(),
                interval,
                source: Arc::clone(&source),
                sink: self.sink.clone(),
                cancel: cancel.clone(),
                stats: Arc::clone(&self.stats),
                tasks: Arc::clone(&self.tasks),
            };
            let join = runtime.spawn(worker.run());

            tasks.insert(key.clone(), TaskHandle { id, cancel, join });
            started.push(key);
        }

        self.stats.active.store(tasks.len(), Ordering::Relaxed);
        self.stats
            .started
            .fetch_add(started.len() as u64, Ordering::Relaxed);
        metrics::set_stream_tasks(tasks.len());
        drop(tasks);

        if !started.is_empty() {
            tracing::info!(
                request_id,
                count = started.len(),
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "Started stream tasks"
            );
        }

        Ok(started)
    }

    /// Stop the tasks for `symbols` under `request_id`.
    ///
    /// Unknown keys are ignored. Returns the keys that were stopped.
    pub fn stop<S: AsRef<str>>(&self, request_id: &str, symbols: &[S]) -> Vec<StreamKey> {
        let mut tasks = self.tasks.lock();
        let stopped: Vec<StreamKey> = symbols
            .iter()
            .map(|symbol| StreamKey::new(symbol.as_ref(), request_id))
            .filter_map(|key| {
                let handle = tasks.remove(&key)?;
                handle.cancel.cancel();
                Some(key)
            })
            .collect();
        record_removal(&self.stats, tasks.len(), stopped.len());
        drop(tasks);

        if !stopped.is_empty() {
            tracing::info!(request_id, count = stopped.len(), "Stopped stream tasks");
        }
        stopped
    }

    /// Stop every task under `request_id`.
    pub fn stop_request(&self, request_id: &str) -> Vec<StreamKey> {
        let mut tasks = self.tasks.lock();
        let keys: Vec<StreamKey> = tasks
            .keys()
            .filter(|key| key.request_id == request_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(handle) = tasks.remove(key) {
                handle.cancel.cancel();
            }
        }
        record_removal(&self.stats, tasks.len(), keys.len());
        keys
    }

    /// Whether a task is registered for this key.
    #[must_use]
    pub fn is_running(&self, symbol: &str, request_id: &str) -> bool {
        self.tasks
            .lock()
            .contains_key(&StreamKey::new(symbol, request_id))
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = self.tasks.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel every task and wait for them to exit.
    ///
    /// The manager accepts no new tasks afterwards.
    pub async fn shutdown(&self) {
        let handles: Vec<(StreamKey, TaskHandle)> = {
            let mut tasks = self.tasks.lock();
            self.shutdown.cancel();
            tasks.drain().collect()
        };
        record_removal(&self.stats, 0, handles.len());

        for (key, handle) in handles {
            if let Err(e) = handle.join.await {
                tracing::warn!(%key, error = %e, "Stream task ended abnormally");
            }
        }
        tracing::info!("Stream task manager shut down");
    }
}

impl<T> Drop for StreamTaskManager<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Worker
// =============================================================================

struct StreamWorker<T> {
    id: u64,
    key: StreamKey,
    interval: Duration,
    source: Arc<dyn FetchSource<Output = T>>,
    sink: mpsc::Sender<StreamUpdate<T>>,
    cancel: CancellationToken,
    stats: Arc<StreamTaskStats>,
    tasks: Arc<TaskTable>,
}

impl<T: Send + 'static> StreamWorker<T> {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(key = %self.key, "Stream task started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let payload = self.tick().await;

            if self.cancel.is_cancelled() {
                tracing::debug!(key = %self.key, "Discarding result fetched after cancellation");
                break;
            }

            let update = StreamUpdate::for_key(&self.key, payload);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sent = self.sink.send(update) => {
                    if sent.is_err() {
                        tracing::debug!(key = %self.key, "Stream sink closed");
                        break;
                    }
                }
            }
        }

        self.deregister();
        tracing::debug!(key = %self.key, "Stream task stopped");
    }

    /// Drop this task's entry unless it was already removed or replaced.
    fn deregister(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.get(&self.key).is_some_and(|handle| handle.id == self.id) {
            tasks.remove(&self.key);
            record_removal(&self.stats, tasks.len(), 1);
        }
    }

    async fn tick(&self) -> StreamPayload<T> {
        let outcome = AssertUnwindSafe(self.source.fetch(&self.key.symbol))
            .catch_unwind()
            .await;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(value)) => {
                metrics::record_fetch("ok");
                StreamPayload::Data(value)
            }
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_fetch(e.kind());
                tracing::warn!(key = %self.key, error = %e, "Stream fetch failed");
                StreamPayload::Error(e.to_string())
            }
            Err(panic) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_fetch("panic");
                let message = panic_message(panic.as_ref());
                tracing::error!(key = %self.key, panic = %message, "Stream fetch panicked");
                StreamPayload::Error(format!("fetch panicked: {message}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{FetchError, fetch_fn};

    fn counting_source(
        calls: Arc<AtomicUsize>,
    ) -> Arc<dyn FetchSource<Output = String>> {
        Arc::new(fetch_fn(move |symbol: String| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(symbol)
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn start_registers_one_task_per_symbol() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let calls = Arc::new(AtomicUsize::new(0));

        let started = manager
            .start(
                "req1",
                &["EURUSD", "GBPUSD"],
                Duration::from_secs(1),
                counting_source(Arc::clone(&calls)),
            )
            .unwrap();

        assert_eq!(started.len(), 2);
        assert_eq!(manager.task_count(), 2);
        assert!(manager.is_running("EURUSD", "req1"));
        assert_eq!(manager.stats().active(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_skipped() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(calls);

        manager
            .start("req1", &["EURUSD"], Duration::from_secs(1), Arc::clone(&source))
            .unwrap();
        let again = manager
            .start("req1", &["EURUSD", "USDJPY"], Duration::from_secs(1), source)
            .unwrap();

        assert_eq!(again, vec![StreamKey::new("USDJPY", "req1")]);
        assert_eq!(manager.task_count(), 2);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let manager = StreamTaskManager::new(tx);
        let source = counting_source(Arc::new(AtomicUsize::new(0)));
        let err = manager
            .start("req1", &["EURUSD"], Duration::ZERO, source)
            .unwrap_err();
        assert_eq!(err, StreamTaskError::ZeroInterval);
        assert_eq!(manager.task_count(), 0);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (tx, _rx) = mpsc::channel::<StreamUpdate<String>>(1);
        let manager = StreamTaskManager::new(tx);
        let source = counting_source(Arc::new(AtomicUsize::new(0)));
        let err = manager
            .start("req1", &["EURUSD"], Duration::from_secs(1), source)
            .unwrap_err();
        assert_eq!(err, StreamTaskError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_unknown_key_is_noop() {
        let (tx, _rx) = mpsc::channel::<StreamUpdate<String>>(1);
        let manager = StreamTaskManager::new(tx);
        assert!(manager.stop("missing", &["EURUSD"]).is_empty());
        assert_eq!(manager.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_removes_all_symbols() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let source = counting_source(Arc::new(AtomicUsize::new(0)));

        manager
            .start("a", &["EURUSD", "GBPUSD"], Duration::from_secs(1), Arc::clone(&source))
            .unwrap();
        manager
            .start("b", &["EURUSD"], Duration::from_secs(1), source)
            .unwrap();

        let stopped = manager.stop_request("a");
        assert_eq!(stopped.len(), 2);
        assert_eq!(manager.keys(), vec![StreamKey::new("EURUSD", "b")]);
        assert_eq!(manager.stats().stopped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_fetch_is_reported_and_task_continues() {
        let (tx, mut rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let source: Arc<dyn FetchSource<Output = u32>> =
            Arc::new(fetch_fn(|symbol: String| async move {
                Err::<u32, _>(FetchError::Transport(format!("{symbol} unreachable")))
            }));

        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), source)
            .unwrap();

        for _ in 0..2 {
            let update = rx.recv().await.unwrap();
            assert_eq!(update.symbol.as_deref(), Some("EURUSD"));
            assert_eq!(
                update.payload,
                StreamPayload::Error("transport failure: EURUSD unreachable".to_string())
            );
        }
        assert!(manager.is_running("EURUSD", "req1"));
        assert!(manager.stats().failures() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetch_is_reported() {
        let (tx, mut rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let source: Arc<dyn FetchSource<Output = u32>> =
            Arc::new(fetch_fn(|_symbol: String| async move {
                if true {
                    panic!("feed exploded");
                }
                Ok::<u32, FetchError>(0)
            }));

        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), source)
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(
            update.payload,
            StreamPayload::Error("fetch panicked: feed exploded".to_string())
        );
        let update = rx.recv().await.unwrap();
        assert!(!update.payload.is_data());
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_shutdown_is_refused() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls));

        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), Arc::clone(&source))
            .unwrap();
        manager.shutdown().await;

        let err = manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), source)
            .unwrap_err();
        assert_eq!(err, StreamTaskError::ShutDown);
        assert!(!manager.is_running("EURUSD", "req1"));
        assert_eq!(manager.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn task_with_closed_sink_leaves_table() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let manager = StreamTaskManager::new(tx);
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls));

        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), Arc::clone(&source))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_running("EURUSD", "req1"));
        assert_eq!(manager.stats().active(), 0);
        assert_eq!(manager.stats().stopped(), 1);

        let again = manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), source)
            .unwrap();
        assert_eq!(again, vec![StreamKey::new("EURUSD", "req1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_task_does_not_remove_its_replacement() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let source = counting_source(Arc::new(AtomicUsize::new(0)));

        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), Arc::clone(&source))
            .unwrap();
        manager.stop("req1", &["EURUSD"]);
        manager
            .start("req1", &["EURUSD"], Duration::from_millis(100), source)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(manager.is_running("EURUSD", "req1"));
        assert_eq!(manager.stats().active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_table() {
        let (tx, _rx) = mpsc::channel(16);
        let manager = StreamTaskManager::new(tx);
        let source = counting_source(Arc::new(AtomicUsize::new(0)));
        manager
            .start("req1", &["EURUSD", "GBPUSD"], Duration::from_secs(1), source)
            .unwrap();

        manager.shutdown().await;

        assert_eq!(manager.task_count(), 0);
        assert_eq!(manager.stats().active(), 0);
    }

    #[test]
    fn panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
