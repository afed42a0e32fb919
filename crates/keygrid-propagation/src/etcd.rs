//! etcd-backed configuration store.
//!
//! Every key is stored under a configurable root prefix. Batches are etcd
//! transactions; watches are etcd prefix watches forwarded onto a channel.
//! The blocking [`ConfigStore`] calls bridge into the async client through
//! `block_in_place`, so this store needs the multi-threaded tokio runtime.

use std::future::Future;
use std::time::Duration;

use etcd_client::{
    Client, ConnectOptions, Error as EtcdError, EventType, GetOptions, Txn, TxnOp, WatchOptions,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{PropagationError, PropagationResult};
use crate::store::{CancelGuard, ChangeKind, ChangeNotification, ConfigStore, Subscription};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct Error(#[from] EtcdError);

impl From<Error> for PropagationError {
    fn from(value: Error) -> Self {
        PropagationError::Unavailable(value.0.to_string())
    }
}

fn text(bytes: &[u8], what: &str) -> PropagationResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| PropagationError::Unavailable(format!("non-utf8 {what} from etcd: {e}")))
}

#[derive(Clone)]
pub struct EtcdConfigStore {
    client: Client,
    runtime: Handle,
    root: String,
}

impl EtcdConfigStore {
    /// Connect to an etcd cluster. Must be called from within a tokio runtime.
    pub async fn connect(endpoints: &[String], root: &str) -> PropagationResult<Self> {
        let opts = ConnectOptions::new().with_connect_timeout(Duration::from_secs(5));
        let client = Client::connect(endpoints, Some(opts))
            .await
            .map_err(Error)?;
        info!(?endpoints, %root, "connected to etcd");
        Ok(Self {
            client,
            runtime: Handle::current(),
            root: root.to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.root, key)
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.runtime.block_on(fut))
    }
}

impl ConfigStore for EtcdConfigStore {
    fn get(&self, key: &str) -> PropagationResult<Option<String>> {
        let mut client = self.client.clone();
        let resp = self
            .block_on(client.get(self.full_key(key), None))
            .map_err(Error)?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(text(kv.value(), "value")?)),
            None => Ok(None),
        }
    }

    fn get_prefix(&self, prefix: &str) -> PropagationResult<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = self
            .block_on(client.get(
                self.full_key(prefix),
                Some(GetOptions::new().with_prefix()),
            ))
            .map_err(Error)?;
        let mut out = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = text(kv.key(), "key")?;
            let key = key.strip_prefix(&self.root).unwrap_or(&key).to_string();
            out.push((key, text(kv.value(), "value")?));
        }
        Ok(out)
    }

    fn put(&self, key: &str, value: &str) -> PropagationResult<()> {
        let mut client = self.client.clone();
        self.block_on(client.put(self.full_key(key), value, None))
            .map_err(Error)?;
        Ok(())
    }

    fn put_all(&self, entries: &[(String, String)]) -> PropagationResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let ops: Vec<TxnOp> = entries
            .iter()
            .map(|(k, v)| TxnOp::put(self.full_key(k), v.as_str(), None))
            .collect();
        let mut client = self.client.clone();
        self.block_on(client.txn(Txn::new().and_then(ops)))
            .map_err(Error)?;
        debug!(count = entries.len(), "etcd batch put committed");
        Ok(())
    }

    fn delete(&self, key: &str) -> PropagationResult<bool> {
        let mut client = self.client.clone();
        let resp = self
            .block_on(client.delete(self.full_key(key), None))
            .map_err(Error)?;
        Ok(resp.deleted() > 0)
    }

    fn delete_all(&self, keys: &[String]) -> PropagationResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let ops: Vec<TxnOp> = keys
            .iter()
            .map(|k| TxnOp::delete(self.full_key(k), None))
            .collect();
        let mut client = self.client.clone();
        self.block_on(client.txn(Txn::new().and_then(ops)))
            .map_err(Error)?;
        Ok(())
    }

    fn watch(&self, prefix: &str) -> PropagationResult<Subscription> {
        let mut client = self.client.clone();
        let (mut watcher, mut stream) = self
            .block_on(client.watch(
                self.full_key(prefix),
                Some(WatchOptions::new().with_prefix()),
            ))
            .map_err(Error)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let root = self.root.clone();
        let watched = prefix.to_string();

        self.runtime.spawn(async move {
            'stream: loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        if let Err(e) = watcher.cancel().await {
                            debug!(prefix = %watched, error = %e, "etcd watch cancel failed");
                        }
                        break 'stream;
                    }
                    message = stream.message() => match message {
                        Ok(Some(resp)) => {
                            for event in resp.events() {
                                let Some(kv) = event.kv() else { continue };
                                let Ok(full) = std::str::from_utf8(kv.key()) else {
                                    warn!(prefix = %watched, "non-utf8 key in etcd watch event");
                                    continue;
                                };
                                let key = full.strip_prefix(root.as_str()).unwrap_or(full).to_string();
                                let notification = match event.event_type() {
                                    EventType::Put => ChangeNotification {
                                        key,
                                        value: std::str::from_utf8(kv.value()).ok().map(str::to_string),
                                        kind: ChangeKind::Put,
                                    },
                                    EventType::Delete => ChangeNotification {
                                        key,
                                        value: None,
                                        kind: ChangeKind::Delete,
                                    },
                                };
                                if sender.send(notification).is_err() {
                                    break 'stream;
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(prefix = %watched, "etcd watch stream ended");
                            break 'stream;
                        }
                        Err(e) => {
                            warn!(prefix = %watched, error = %e, "etcd watch stream failed");
                            break 'stream;
                        }
                    }
                }
            }
        });

        debug!(%prefix, "etcd watch opened");
        let guard = CancelGuard::new(move || {
            let _ = stop_tx.send(());
        });
        Ok(Subscription::new(prefix, receiver, guard))
    }
}
