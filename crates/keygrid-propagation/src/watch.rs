//! Watch engine: store subscriptions turned into dispatched events.
//!
//! A [`WatchRegistry`] is built once per process and handed to everything
//! that needs to watch the store. Each [`WatchEngine`] it returns owns one
//! store subscription and one dispatcher task:
//!
//! ```text
//! store subscription ──► dispatcher task ──► blocking pool (≤ worker_threads)
//!                          │                       │
//!                          └─ unknown kinds: drop  └─ handler(Event)
//! ```
//!
//! Events are submitted in arrival order, but handlers run concurrently, so
//! completion order across events is not guaranteed. Handlers must be
//! idempotent and tolerate stale or reordered events.
//!
//! Lifecycle: `Created → Watching → Closed`. `close()` is idempotent and
//! never blocks: it cancels the subscription and signals the dispatcher,
//! which drains in-flight handlers for up to the grace period and then
//! abandons the rest. This makes closing a watch from inside its own
//! handler safe.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::error::{PropagationError, PropagationResult};
use crate::store::{CancelGuard, ChangeKind, ChangeNotification, ConfigStore};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one handler invocation.
pub type HandlerResult = Result<(), BoxError>;

type EventHandler = Arc<dyn Fn(Event) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A change delivered to a watch handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: String,
    /// Present for puts, absent for deletions.
    pub value: Option<String>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Created,
    Watching,
    Closed,
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Maximum concurrent handler invocations per watch.
    pub worker_threads: usize,
    /// How long a closing watch waits for in-flight handlers.
    pub close_grace: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            worker_threads: 5,
            close_grace: Duration::from_secs(5),
        }
    }
}

// ── Counters ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WatchStats {
    started: AtomicU64,
    closed: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    streams_ended: AtomicU64,
}

impl WatchStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStatsSnapshot {
    pub active: u64,
    pub started: u64,
    pub closed: u64,
    pub received: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Notifications of an unrecognized kind, never delivered.
    pub dropped: u64,
    /// Handlers still running when a close grace period ran out.
    pub abandoned: u64,
    /// Subscriptions whose stream ended on the store side.
    pub streams_ended: u64,
}

// ── Registry ───────────────────────────────────────────────────────

struct RegistryInner {
    store: Arc<dyn ConfigStore>,
    runtime: Handle,
    settings: WatchSettings,
    stats: Arc<WatchStats>,
    live: Mutex<HashMap<u64, Arc<WatchShared>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Process-wide owner of every active watch.
#[derive(Clone)]
pub struct WatchRegistry {
    inner: Arc<RegistryInner>,
}

impl WatchRegistry {
    /// Create a registry bound to the current tokio runtime.
    pub fn new(store: Arc<dyn ConfigStore>, settings: WatchSettings) -> PropagationResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| PropagationError::Watch(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(store, settings, runtime))
    }

    /// Create a registry that spawns its dispatchers on `runtime`.
    pub fn with_runtime(store: Arc<dyn ConfigStore>, settings: WatchSettings, runtime: Handle) -> Self {
        let settings = WatchSettings {
            worker_threads: settings.worker_threads.max(1),
            ..settings
        };
        info!(
            workers = settings.worker_threads,
            grace_ms = settings.close_grace.as_millis() as u64,
            "watch registry created"
        );
        Self {
            inner: Arc::new(RegistryInner {
                store,
                runtime,
                settings,
                stats: Arc::new(WatchStats::default()),
                live: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Open a watch on every key under `prefix`, dispatching to `handler`.
    pub fn watch<F>(&self, prefix: &str, handler: F) -> PropagationResult<WatchEngine>
    where
        F: Fn(Event) -> HandlerResult + Send + Sync + 'static,
    {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(PropagationError::Watch("watch registry is shut down".to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (drained_tx, drained_rx) = watch::channel(false);
        let shared = Arc::new(WatchShared {
            id,
            prefix: prefix.to_string(),
            state: Mutex::new(WatchState::Created),
            cancel: Mutex::new(None),
            shutdown_tx,
            drained_rx,
            stats: self.inner.stats.clone(),
            registry: Arc::downgrade(&self.inner),
        });

        let (receiver, guard) = self.inner.store.watch(prefix)?.into_parts();
        *shared.cancel.lock() = Some(guard);

        let dispatcher = Dispatcher {
            id,
            prefix: prefix.to_string(),
            handler: Arc::new(handler),
            workers: self.inner.settings.worker_threads,
            grace: self.inner.settings.close_grace,
            stats: self.inner.stats.clone(),
        };
        self.inner
            .runtime
            .spawn(dispatcher.run(receiver, shutdown_rx, drained_tx));

        *shared.state.lock() = WatchState::Watching;
        WatchStats::bump(&self.inner.stats.started);
        self.inner.live.lock().insert(id, shared.clone());

        // close_all may have drained `live` before the insert above.
        if self.inner.shut_down.load(Ordering::Acquire) {
            shared.close();
            return Err(PropagationError::Watch("watch registry is shut down".to_string()));
        }
        info!(id, %prefix, "watch started");

        Ok(WatchEngine { shared })
    }

    /// Counters across every watch this registry created.
    pub fn stats(&self) -> WatchStatsSnapshot {
        let s = &self.inner.stats;
        WatchStatsSnapshot {
            active: self.inner.live.lock().len() as u64,
            started: s.started.load(Ordering::Relaxed),
            closed: s.closed.load(Ordering::Relaxed),
            received: s.received.load(Ordering::Relaxed),
            dispatched: s.dispatched.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            abandoned: s.abandoned.load(Ordering::Relaxed),
            streams_ended: s.streams_ended.load(Ordering::Relaxed),
        }
    }

    pub fn active_watches(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Refuse new watches and close every live one. Returns how many closed.
    pub fn close_all(&self) -> usize {
        self.inner.shut_down.store(true, Ordering::Release);
        let watches: Vec<Arc<WatchShared>> = self.inner.live.lock().drain().map(|(_, w)| w).collect();
        let closed = watches.iter().filter(|w| w.close()).count();
        info!(closed, "all watches closed");
        closed
    }

    /// [`close_all`](Self::close_all), then wait for every dispatcher to drain.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let watches: Vec<Arc<WatchShared>> = self.inner.live.lock().drain().map(|(_, w)| w).collect();
        for watch in &watches {
            watch.close();
        }
        for watch in &watches {
            watch.wait_drained().await;
        }
        info!(count = watches.len(), "watch registry shut down");
    }
}

// ── Watch engine ───────────────────────────────────────────────────

struct WatchShared {
    id: u64,
    prefix: String,
    state: Mutex<WatchState>,
    cancel: Mutex<Option<CancelGuard>>,
    shutdown_tx: watch::Sender<bool>,
    drained_rx: watch::Receiver<bool>,
    stats: Arc<WatchStats>,
    registry: Weak<RegistryInner>,
}

impl WatchShared {
    fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == WatchState::Closed {
                trace!(id = self.id, "watch already closed");
                return false;
            }
            *state = WatchState::Closed;
        }

        if let Some(guard) = self.cancel.lock().take() {
            guard.cancel();
        }
        let _ = self.shutdown_tx.send(true);
        WatchStats::bump(&self.stats.closed);

        if let Some(registry) = self.registry.upgrade() {
            registry.live.lock().remove(&self.id);
        }
        info!(id = self.id, prefix = %self.prefix, "watch closed");
        true
    }

    async fn wait_drained(&self) {
        let mut rx = self.drained_rx.clone();
        // Err means the dispatcher is gone, which is as drained as it gets.
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

/// Handle to one active watch. Dropping it closes the watch.
pub struct WatchEngine {
    shared: Arc<WatchShared>,
}

impl WatchEngine {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    pub fn state(&self) -> WatchState {
        *self.shared.state.lock()
    }

    /// Stop watching. Only the first call has an effect; returns whether
    /// this call performed the close.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Wait until the dispatcher has finished (drained or abandoned).
    pub async fn closed(&self) {
        self.shared.wait_drained().await;
    }
}

impl Drop for WatchEngine {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for WatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEngine")
            .field("id", &self.shared.id)
            .field("prefix", &self.shared.prefix)
            .field("state", &self.state())
            .finish()
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

struct Dispatcher {
    id: u64,
    prefix: String,
    handler: EventHandler,
    workers: usize,
    grace: Duration,
    stats: Arc<WatchStats>,
}

impl Dispatcher {
    async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<ChangeNotification>,
        mut shutdown: watch::Receiver<bool>,
        drained: watch::Sender<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut in_flight: JoinSet<HandlerResult> = JoinSet::new();

        'dispatch: loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break 'dispatch,
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.record(done);
                }
                next = receiver.recv() => {
                    let Some(notification) = next else {
                        WatchStats::bump(&self.stats.streams_ended);
                        info!(id = self.id, prefix = %self.prefix, "watch stream ended");
                        break 'dispatch;
                    };
                    WatchStats::bump(&self.stats.received);

                    let event = match notification.kind {
                        ChangeKind::Put => Event {
                            key: notification.key,
                            value: notification.value,
                            kind: EventKind::Put,
                        },
                        ChangeKind::Delete => Event {
                            key: notification.key,
                            value: None,
                            kind: EventKind::Delete,
                        },
                        ChangeKind::Unrecognized(code) => {
                            WatchStats::bump(&self.stats.dropped);
                            warn!(id = self.id, key = %notification.key, code, "dropping unrecognized watch notification");
                            continue 'dispatch;
                        }
                    };

                    // Wait for a worker slot without ignoring shutdown.
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break 'dispatch,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break 'dispatch,
                        },
                    };

                    WatchStats::bump(&self.stats.dispatched);
                    trace!(id = self.id, key = %event.key, kind = ?event.kind, "dispatching watch event");
                    let handler = self.handler.clone();
                    in_flight.spawn_blocking(move || {
                        let _permit = permit;
                        handler(event)
                    });
                }
            }
        }

        self.drain(&mut in_flight).await;
        let _ = drained.send(true);
        debug!(id = self.id, "watch dispatcher stopped");
    }

    async fn drain(&self, in_flight: &mut JoinSet<HandlerResult>) {
        if in_flight.is_empty() {
            return;
        }
        let wait = async {
            while let Some(done) = in_flight.join_next().await {
                self.record(done);
            }
        };
        if tokio::time::timeout(self.grace, wait).await.is_err() {
            let abandoned = in_flight.len() as u64;
            self.stats.abandoned.fetch_add(abandoned, Ordering::Relaxed);
            warn!(id = self.id, abandoned, "close grace period elapsed, abandoning handlers");
            in_flight.abort_all();
            in_flight.detach_all();
        }
    }

    fn record(&self, done: Result<HandlerResult, JoinError>) {
        match done {
            Ok(Ok(())) => WatchStats::bump(&self.stats.succeeded),
            Ok(Err(e)) => {
                WatchStats::bump(&self.stats.failed);
                warn!(id = self.id, prefix = %self.prefix, error = %e, "watch handler failed");
            }
            Err(e) => {
                WatchStats::bump(&self.stats.failed);
                warn!(id = self.id, prefix = %self.prefix, error = %e, "watch handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfigStore;
    use crate::store::Subscription;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn test_registry(store: &MemoryConfigStore, workers: usize) -> WatchRegistry {
        WatchRegistry::new(
            Arc::new(store.clone()),
            WatchSettings {
                worker_threads: workers,
                close_grace: Duration::from_millis(200),
            },
        )
        .unwrap()
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn collecting_handler() -> (Arc<Mutex<Vec<Event>>>, impl Fn(Event) -> HandlerResult + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event| {
            sink.lock().push(event);
            Ok(())
        })
    }

    // ── Delivery ───────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delivers_puts_and_deletes_under_prefix() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let (seen, handler) = collecting_handler();
        let watch = registry.watch("tenant/t1/", handler).unwrap();
        assert_eq!(watch.state(), WatchState::Watching);

        store.put("tenant/t1/orders", "v1").unwrap();
        store.put("tenant/t2/orders", "other").unwrap();
        store.delete("tenant/t1/orders").unwrap();

        wait_until("two events", || seen.lock().len() == 2).await;
        let events = seen.lock().clone();
        assert_eq!(events[0].kind, EventKind::Put);
        assert_eq!(events[0].value.as_deref(), Some("v1"));
        assert_eq!(events[1].kind, EventKind::Delete);
        assert!(events[1].value.is_none());

        let stats = registry.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unrecognized_notifications_are_dropped_and_counted() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let (seen, handler) = collecting_handler();
        let _watch = registry.watch("tenant/", handler).unwrap();

        store.notify_raw(ChangeNotification {
            key: "tenant/t/r".to_string(),
            value: None,
            kind: ChangeKind::Unrecognized(42),
        });
        store.put("tenant/t/r", "v").unwrap();

        wait_until("the put", || seen.lock().len() == 1).await;
        assert_eq!(seen.lock()[0].kind, EventKind::Put);
        assert_eq!(registry.stats().dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handler_errors_and_panics_are_counted() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 2);
        let _watch = registry
            .watch("k/", |event: Event| {
                match event.key.as_str() {
                    "k/err" => Err("boom".into()),
                    "k/panic" => panic!("handler panic"),
                    _ => Ok(()),
                }
            })
            .unwrap();

        store.put("k/ok", "1").unwrap();
        store.put("k/err", "1").unwrap();
        store.put("k/panic", "1").unwrap();

        wait_until("three outcomes", || {
            let s = registry.stats();
            s.succeeded + s.failed == 3
        })
        .await;
        let stats = registry.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_handlers_are_bounded_by_worker_count() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let (r, p, d) = (running.clone(), peak.clone(), done.clone());
        let _watch = registry
            .watch("k/", move |_event| {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                r.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        for i in 0..6 {
            store.put(&format!("k/{i}"), "v").unwrap();
        }
        wait_until("all handlers", || done.load(Ordering::SeqCst) == 6).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_is_idempotent_and_releases_subscription() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let (seen, handler) = collecting_handler();
        let watch = registry.watch("k/", handler).unwrap();
        assert_eq!(store.watcher_count(), 1);

        assert!(watch.close());
        assert!(!watch.close());
        assert_eq!(watch.state(), WatchState::Closed);
        assert_eq!(store.watcher_count(), 0);
        assert_eq!(registry.active_watches(), 0);
        watch.closed().await;

        store.put("k/late", "v").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().is_empty());
        assert_eq!(registry.stats().closed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_the_engine_closes_it() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let (_seen, handler) = collecting_handler();
        drop(registry.watch("k/", handler).unwrap());
        assert_eq!(store.watcher_count(), 0);
        assert_eq!(registry.stats().closed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handler_may_close_its_own_watch() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let slot: Arc<Mutex<Option<WatchEngine>>> = Arc::new(Mutex::new(None));

        let own = slot.clone();
        let watch = registry
            .watch("k/", move |_event| {
                if let Some(engine) = own.lock().take() {
                    engine.close();
                }
                Ok(())
            })
            .unwrap();
        *slot.lock() = Some(watch);

        store.put("k/1", "v").unwrap();
        wait_until("self-close", || registry.active_watches() == 0).await;
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_handlers_are_abandoned_after_grace_period() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let watch = registry
            .watch("k/", move |_event| {
                s.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_secs(2));
                Ok(())
            })
            .unwrap();

        store.put("k/1", "v").unwrap();
        wait_until("handler start", || started.load(Ordering::SeqCst) == 1).await;

        let begin = Instant::now();
        watch.close();
        watch.closed().await;
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(registry.stats().abandoned, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_all_refuses_new_watches() {
        let store = MemoryConfigStore::new();
        let registry = test_registry(&store, 1);
        let (_a, h1) = collecting_handler();
        let (_b, h2) = collecting_handler();
        let w1 = registry.watch("a/", h1).unwrap();
        let w2 = registry.watch("b/", h2).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert_eq!(w1.state(), WatchState::Closed);
        assert_eq!(w2.state(), WatchState::Closed);
        assert_eq!(store.watcher_count(), 0);

        let (_c, h3) = collecting_handler();
        assert!(matches!(registry.watch("c/", h3), Err(PropagationError::Watch(_))));
    }

    /// Store that closes the registry while a watch is being opened.
    struct ClosingStore {
        inner: MemoryConfigStore,
        registry: Mutex<Option<WatchRegistry>>,
    }

    impl ConfigStore for ClosingStore {
        fn get(&self, key: &str) -> PropagationResult<Option<String>> {
            self.inner.get(key)
        }

        fn get_prefix(&self, prefix: &str) -> PropagationResult<Vec<(String, String)>> {
            self.inner.get_prefix(prefix)
        }

        fn put(&self, key: &str, value: &str) -> PropagationResult<()> {
            self.inner.put(key, value)
        }

        fn put_all(&self, entries: &[(String, String)]) -> PropagationResult<()> {
            self.inner.put_all(entries)
        }

        fn delete(&self, key: &str) -> PropagationResult<bool> {
            self.inner.delete(key)
        }

        fn delete_all(&self, keys: &[String]) -> PropagationResult<()> {
            self.inner.delete_all(keys)
        }

        fn watch(&self, prefix: &str) -> PropagationResult<Subscription> {
            let subscription = self.inner.watch(prefix)?;
            if let Some(registry) = self.registry.lock().take() {
                registry.close_all();
            }
            Ok(subscription)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_all_during_watch_leaves_nothing_open() {
        let memory = MemoryConfigStore::new();
        let store = Arc::new(ClosingStore {
            inner: memory.clone(),
            registry: Mutex::new(None),
        });
        let registry = WatchRegistry::new(store.clone(), WatchSettings::default()).unwrap();
        *store.registry.lock() = Some(registry.clone());

        let (_seen, handler) = collecting_handler();
        assert!(matches!(registry.watch("a/", handler), Err(PropagationError::Watch(_))));
        assert_eq!(registry.active_watches(), 0);
        assert_eq!(memory.watcher_count(), 0);
        assert_eq!(registry.stats().closed, 1);
    }

    #[test]
    fn registry_requires_a_runtime() {
        let store = MemoryConfigStore::new();
        let result = WatchRegistry::new(Arc::new(store), WatchSettings::default());
        assert!(matches!(result, Err(PropagationError::Watch(_))));
    }
}
