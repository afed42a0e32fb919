//! In-process configuration store.
//!
//! An ordered map behind a mutex. Watchers are notified while the lock is
//! held, so every watcher sees mutations in commit order and a batch is
//! never observed half-applied.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::PropagationResult;
use crate::store::{CancelGuard, ChangeKind, ChangeNotification, ConfigStore, Subscription};

struct Watcher {
    id: u64,
    prefix: String,
    sender: mpsc::UnboundedSender<ChangeNotification>,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, String>,
    watchers: Vec<Watcher>,
}

impl Inner {
    /// Fan a notification out to matching watchers, pruning closed ones.
    fn notify(&mut self, notification: &ChangeNotification) {
        self.watchers.retain(|w| {
            if !notification.key.starts_with(&w.prefix) {
                return true;
            }
            w.sender.send(notification.clone()).is_ok()
        });
    }

    fn put(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
        self.notify(&ChangeNotification {
            key: key.to_string(),
            value: Some(value.to_string()),
            kind: ChangeKind::Put,
        });
    }

    fn delete(&mut self, key: &str) -> bool {
        let existed = self.data.remove(key).is_some();
        if existed {
            self.notify(&ChangeNotification {
                key: key.to_string(),
                value: None,
                kind: ChangeKind::Delete,
            });
        }
        existed
    }
}

/// Thread-safe in-memory [`ConfigStore`].
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
    next_watcher: Arc<AtomicU64>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Deliver a notification to matching watchers without touching the data.
    ///
    /// Simulates store-side events such as unsupported notification types.
    pub fn notify_raw(&self, notification: ChangeNotification) {
        self.inner.lock().notify(&notification);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> PropagationResult<Option<String>> {
        Ok(self.inner.lock().data.get(key).cloned())
    }

    fn get_prefix(&self, prefix: &str) -> PropagationResult<Vec<(String, String)>> {
        let inner = self.inner.lock();
        Ok(inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn put(&self, key: &str, value: &str) -> PropagationResult<()> {
        self.inner.lock().put(key, value);
        trace!(%key, "memory store put");
        Ok(())
    }

    fn put_all(&self, entries: &[(String, String)]) -> PropagationResult<()> {
        let mut inner = self.inner.lock();
        for (key, value) in entries {
            inner.put(key, value);
        }
        trace!(count = entries.len(), "memory store batch put");
        Ok(())
    }

    fn delete(&self, key: &str) -> PropagationResult<bool> {
        let existed = self.inner.lock().delete(key);
        trace!(%key, existed, "memory store delete");
        Ok(existed)
    }

    fn delete_all(&self, keys: &[String]) -> PropagationResult<()> {
        let mut inner = self.inner.lock();
        for key in keys {
            inner.delete(key);
        }
        Ok(())
    }

    fn watch(&self, prefix: &str) -> PropagationResult<Subscription> {
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock().watchers.push(Watcher {
            id,
            prefix: prefix.to_string(),
            sender,
        });
        debug!(id, %prefix, "memory store watch opened");

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let guard = CancelGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().watchers.retain(|w| w.id != id);
                debug!(id, "memory store watch cancelled");
            }
        });
        Ok(Subscription::new(prefix, receiver, guard))
    }
}
