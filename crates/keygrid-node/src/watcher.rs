//! Range watcher: applies the node view to local storage.
//!
//! The watcher subscribes to `node/{uuid}/id/` and reacts to each published
//! assignment:
//!
//! | Action | Local effect | Control plane |
//! |---|---|---|
//! | Assign | provision table | `set_ready(true)` |
//! | Rebalance | ensure table | `set_ready(true)` |
//! | Delete | tombstone table, then reap | `finalize_delete` |
//!
//! Events only say which key changed: the watcher re-reads the key and
//! applies the view published now, so replays and reordered events converge.
//! Tombstones whose finalization failed stay until the periodic reaper
//! succeeds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use keygrid_propagation::{
    Event, EventKind, PropagationEngine, WatchEngine, WatchRegistry, decode_node_entry, node_prefix,
};
use keygrid_state::{NodeTenantResourceRange, RangeAction};

use crate::control::ControlPlane;
use crate::error::{NodeError, NodeResult};
use crate::storage::TenantStorage;

struct WatcherInner {
    node_uuid: String,
    propagation: PropagationEngine,
    storage: Arc<dyn TenantStorage>,
    control: Arc<dyn ControlPlane>,
    apply_lock: Mutex<()>,
}

impl WatcherInner {
    fn handle_event(&self, event: &Event) -> NodeResult<()> {
        let value = match (event.kind, event.value.as_deref()) {
            (EventKind::Delete, _) => {
                debug!(node_uuid = %self.node_uuid, key = %event.key, "node view key removed");
                return Ok(());
            }
            (EventKind::Put, None) => {
                warn!(node_uuid = %self.node_uuid, key = %event.key, "put event without value");
                return Ok(());
            }
            (EventKind::Put, Some(value)) => value,
        };

        let range = decode_node_entry(&event.key, value)?;
        if range.node_uuid != self.node_uuid {
            warn!(node_uuid = %self.node_uuid, key = %event.key, "event for another node ignored");
            return Ok(());
        }
        self.apply(&range)
    }

    /// Apply whatever is published now for the event's tenant resource.
    ///
    /// The event only names the key: a stale Assign replayed after a Delete
    /// must not provision or revive a table. Applies are serialized so the
    /// read and the local effect are not interleaved with another event.
    fn apply(&self, event: &NodeTenantResourceRange) -> NodeResult<()> {
        let _serial = self.apply_lock.lock();
        let id = event.tenant_resource();
        let Some(range) = self
            .propagation
            .read_node_resource(&self.node_uuid, &id.tenant, &id.resource)?
        else {
            debug!(node_uuid = %self.node_uuid, %id, action = ?event.meta.action, "stale event, key already removed");
            return Ok(());
        };
        if range.meta.action != event.meta.action {
            debug!(
                node_uuid = %self.node_uuid,
                %id,
                event = ?event.meta.action,
                current = ?range.meta.action,
                "stale event, applying current view"
            );
        }

        let hash = range.meta.hash;
        match range.meta.action {
            RangeAction::Assign => {
                let created = self.storage.provision(&id, hash)?;
                self.control
                    .set_ready(&self.node_uuid, &id.tenant, &id.resource, true)?;
                info!(node_uuid = %self.node_uuid, %id, hash, created, "range assigned");
            }
            RangeAction::Rebalance => {
                self.storage.provision(&id, hash)?;
                self.control
                    .set_ready(&self.node_uuid, &id.tenant, &id.resource, true)?;
                info!(node_uuid = %self.node_uuid, %id, hash, "range rebalanced");
            }
            RangeAction::Delete => {
                if self.storage.tombstone(&id)? {
                    self.reap_tombstones_locked()?;
                } else {
                    // Nothing local to clean; still let the control plane finish.
                    self.control
                        .finalize_delete(&self.node_uuid, &id.tenant, &id.resource)?;
                    info!(node_uuid = %self.node_uuid, %id, "range deleted without local table");
                }
            }
        }
        Ok(())
    }

    fn reap_tombstones(&self) -> NodeResult<usize> {
        let _serial = self.apply_lock.lock();
        self.reap_tombstones_locked()
    }

    fn reap_tombstones_locked(&self) -> NodeResult<usize> {
        let mut reaped = 0;
        for table in self.storage.tables()?.into_iter().filter(|t| t.tombstoned) {
            let id = &table.id;
            match self
                .control
                .finalize_delete(&self.node_uuid, &id.tenant, &id.resource)
            {
                Ok(()) => {
                    self.storage.remove(id)?;
                    reaped += 1;
                    info!(node_uuid = %self.node_uuid, %id, "tombstone reaped");
                }
                Err(e) => {
                    warn!(node_uuid = %self.node_uuid, %id, error = %e, "tombstone finalize failed, will retry");
                }
            }
        }
        Ok(reaped)
    }
}

/// Keeps one node's local tables in line with its published assignments.
pub struct RangeWatcher {
    inner: Arc<WatcherInner>,
    registry: WatchRegistry,
    watch: Mutex<Option<WatchEngine>>,
}

impl RangeWatcher {
    pub fn new(
        node_uuid: &str,
        propagation: PropagationEngine,
        registry: WatchRegistry,
        storage: Arc<dyn TenantStorage>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                node_uuid: node_uuid.to_string(),
                propagation,
                storage,
                control,
                apply_lock: Mutex::new(()),
            }),
            registry,
            watch: Mutex::new(None),
        }
    }

    pub fn node_uuid(&self) -> &str {
        &self.inner.node_uuid
    }

    /// Open the watch, then replay the assignments already published.
    ///
    /// Returns how many existing assignments were applied.
    pub fn start(&self) -> NodeResult<usize> {
        {
            let mut slot = self.watch.lock();
            if slot.is_some() {
                return Err(NodeError::AlreadyStarted(self.inner.node_uuid.clone()));
            }
            let inner = self.inner.clone();
            let engine = self
                .registry
                .watch(&node_prefix(&self.inner.node_uuid), move |event| {
                    inner.handle_event(&event).map_err(Into::into)
                })?;
            *slot = Some(engine);
        }
        info!(node_uuid = %self.inner.node_uuid, "range watcher started");
        self.sync_assignments()
    }

    /// Apply every published assignment for this node. Failures are logged
    /// per assignment.
    pub fn sync_assignments(&self) -> NodeResult<usize> {
        let ranges = self
            .inner
            .propagation
            .read_node_resources(&self.inner.node_uuid)?;
        let mut applied = 0;
        for range in &ranges {
            match self.inner.apply(range) {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    node_uuid = %self.inner.node_uuid,
                    id = %range.tenant_resource(),
                    error = %e,
                    "failed to apply assignment"
                ),
            }
        }
        debug!(node_uuid = %self.inner.node_uuid, applied, total = ranges.len(), "assignments synced");
        Ok(applied)
    }

    pub fn handle_event(&self, event: &Event) -> NodeResult<()> {
        self.inner.handle_event(event)
    }

    /// Finalize and remove every tombstoned table. Returns how many were reaped.
    pub fn reap_tombstones(&self) -> NodeResult<usize> {
        self.inner.reap_tombstones()
    }

    /// Reap tombstones every `period` until `shutdown` changes.
    pub async fn run_reaper(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            node_uuid = %self.inner.node_uuid,
            interval_secs = period.as_secs(),
            "tombstone reaper started"
        );
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reap_tombstones() {
                        Ok(0) => {}
                        Ok(reaped) => info!(node_uuid = %self.inner.node_uuid, reaped, "tombstone pass complete"),
                        Err(e) => warn!(node_uuid = %self.inner.node_uuid, error = %e, "tombstone pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(node_uuid = %self.inner.node_uuid, "tombstone reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Close the watch. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        match self.watch.lock().take() {
            Some(engine) => {
                engine.close();
                info!(node_uuid = %self.inner.node_uuid, "range watcher stopped");
                true
            }
            None => false,
        }
    }
}
