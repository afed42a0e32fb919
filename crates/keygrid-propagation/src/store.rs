//! The external configuration store contract.
//!
//! Implementations must give linearizable reads after a committed write and
//! deliver every committed mutation under a watched prefix, in commit order.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::PropagationResult;

/// Kind of a raw change notification coming from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Put,
    Delete,
    /// A notification type this process does not understand.
    Unrecognized(i32),
}

/// One committed mutation as reported by a store subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub key: String,
    /// New value for puts; `None` for deletes.
    pub value: Option<String>,
    pub kind: ChangeKind,
}

/// Runs a cancellation action exactly once, on [`cancel`](Self::cancel) or drop.
pub struct CancelGuard(Option<Box<dyn FnOnce() + Send>>);

impl CancelGuard {
    pub fn new<F>(on_cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(on_cancel)))
    }

    pub fn cancel(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelGuard")
            .field(&self.0.is_some())
            .finish()
    }
}

/// A live prefix subscription.
///
/// Notifications arrive on the receiver in commit order. Dropping the guard
/// cancels the subscription on the store side, after which the receiver
/// yields `None`.
#[derive(Debug)]
pub struct Subscription {
    prefix: String,
    receiver: mpsc::UnboundedReceiver<ChangeNotification>,
    guard: CancelGuard,
}

impl Subscription {
    pub fn new(
        prefix: &str,
        receiver: mpsc::UnboundedReceiver<ChangeNotification>,
        guard: CancelGuard,
    ) -> Self {
        Self {
            prefix: prefix.to_string(),
            receiver,
            guard,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Split into the notification stream and its cancellation guard.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ChangeNotification>, CancelGuard) {
        (self.receiver, self.guard)
    }
}

/// A watchable key/value store holding the published partition views.
///
/// Every call is blocking I/O; callers must not hold locks across them.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> PropagationResult<Option<String>>;

    /// All `(key, value)` pairs under `prefix`, ordered by key.
    fn get_prefix(&self, prefix: &str) -> PropagationResult<Vec<(String, String)>>;

    fn put(&self, key: &str, value: &str) -> PropagationResult<()>;

    /// Write every entry atomically: readers see all of them or none.
    fn put_all(&self, entries: &[(String, String)]) -> PropagationResult<()>;

    /// Delete one key. Returns true if it existed.
    fn delete(&self, key: &str) -> PropagationResult<bool>;

    /// Delete every key atomically.
    fn delete_all(&self, keys: &[String]) -> PropagationResult<()>;

    /// Subscribe to every mutation of keys starting with `prefix`.
    fn watch(&self, prefix: &str) -> PropagationResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_guard_runs_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            let _guard = CancelGuard::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_cancel_does_not_run_again_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let guard = {
            let count = count.clone();
            CancelGuard::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        guard.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
