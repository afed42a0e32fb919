//! Partition manager: lifecycle of tenant resources across nodes.
//!
//! Lifecycle per tenant resource:
//!
//! ```text
//! absent ──create──► INIT (node view published)
//!                      │ every range ready
//!                      ▼
//!                    ACTIVE (tenant view published)
//!                      │ delete
//!                      ▼
//!                    DELETING (tenant view removed, DELETE node views)
//!                      │ finalize per node
//!                      ▼
//!                    absent
//! ```
//!
//! Rows in the state store are the source of truth. Every published key is
//! written after the row it describes and removed before it, so the
//! published views can always be rebuilt with [`PartitionManager::republish`].
//!
//! Lifecycle calls on one tenant resource are serialized through a striped
//! lock, so a readiness check and the publication it allows cannot straddle
//! a delete.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use keygrid_propagation::PropagationEngine;
use keygrid_ring::{hash_key, split_evenly, widest_segment};
use keygrid_state::{
    NodeDescriptor, NodeRange, RangeAction, RangeInsert, RangeStatus, ReadyUpdate, StateStore,
    TableVersion, TenantResource, TenantResourceRange, epoch_secs,
};

use crate::availability::select_nodes;
use crate::error::{ControlError, ControlResult};

/// Number of nodes a new tenant resource is split across.
pub const DEFAULT_CLUSTER_SIZE: usize = 2;

const LIFECYCLE_STRIPES: usize = 64;

/// Owns the assignment of tenant resource keyspace to nodes.
#[derive(Clone)]
pub struct PartitionManager {
    state: StateStore,
    propagation: PropagationEngine,
    cluster_size: usize,
    lifecycle: Arc<Vec<Mutex<()>>>,
}

impl PartitionManager {
    pub fn new(state: StateStore, propagation: PropagationEngine) -> Self {
        Self {
            state,
            propagation,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            lifecycle: Arc::new((0..LIFECYCLE_STRIPES).map(|_| Mutex::new(())).collect()),
        }
    }

    /// Set how many nodes new tenant resources are split across.
    pub fn with_cluster_size(mut self, cluster_size: usize) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn propagation(&self) -> &PropagationEngine {
        &self.propagation
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Split a new tenant resource across `cluster_size` nodes.
    ///
    /// Idempotent: when ranges already exist they are returned unchanged
    /// and nothing is written. Only the node view is published; the tenant
    /// view follows once every node reports ready.
    pub fn create_tenant_resource(
        &self,
        tenant: &str,
        resource: &str,
        table_version: TableVersion,
    ) -> ControlResult<Vec<NodeRange>> {
        let id = TenantResource::new(tenant, resource)?;
        let _lifecycle = self.lifecycle(tenant, resource);

        let existing = self.state.list_node_ranges(tenant, resource)?;
        if !existing.is_empty() {
            debug!(%id, "tenant resource already exists");
            return Ok(by_hash(existing));
        }

        let nodes = self.state.list_nodes()?;
        let load = self.state.list_all_node_ranges()?;
        let chosen = select_nodes(&nodes, &load, &BTreeSet::new(), self.cluster_size)?;
        let boundaries = split_evenly(self.cluster_size)?;

        let now = epoch_secs();
        let ranges: Vec<NodeRange> = chosen
            .iter()
            .zip(boundaries)
            .map(|(node, hash)| NodeRange {
                node_uuid: node.uuid.clone(),
                tenant: tenant.to_string(),
                resource: resource.to_string(),
                hash,
                status: RangeStatus::Init,
                ready: false,
                table_version,
                create_date: now,
                update_date: now,
            })
            .collect();

        match self.state.insert_node_ranges(tenant, resource, &ranges)? {
            RangeInsert::Inserted => {}
            RangeInsert::Existing(rows) => {
                debug!(%id, "tenant resource created concurrently");
                return Ok(by_hash(rows));
            }
        }

        let views: Vec<_> = ranges.iter().map(|r| r.node_view(RangeAction::Assign)).collect();
        self.propagation.write_node_ranges(&views)?;
        info!(%id, nodes = ranges.len(), "tenant resource created");
        Ok(by_hash(ranges))
    }

    // ── Readiness ──────────────────────────────────────────────────

    /// Record whether a node has provisioned its range.
    ///
    /// When the last range becomes ready the tenant view is published and
    /// the ranges move to ACTIVE. Setting `false` does not retract an
    /// already published tenant view.
    pub fn set_ready(
        &self,
        node_uuid: &str,
        tenant: &str,
        resource: &str,
        ready: bool,
    ) -> ControlResult<NodeRange> {
        let _lifecycle = self.lifecycle(tenant, resource);
        let (range, siblings, changed) =
            match self.state.set_node_range_ready(tenant, resource, node_uuid, ready)? {
                ReadyUpdate::Missing => {
                    return Err(ControlError::NotFound(format!(
                        "node range {tenant}/{resource} on node {node_uuid}"
                    )));
                }
                ReadyUpdate::Unchanged { range, siblings } => (range, siblings, false),
                ReadyUpdate::Updated { range, siblings } => (range, siblings, true),
            };
        debug!(%node_uuid, %tenant, %resource, ready, changed, "ready flag set");

        let all_ready = siblings.iter().all(|r| r.ready);
        let any_deleting = siblings.iter().any(|r| r.status == RangeStatus::Deleting);
        let any_init = siblings.iter().any(|r| r.status == RangeStatus::Init);

        // An unchanged flag still publishes while INIT ranges remain, which
        // retries a publication that failed after the flag was stored.
        if !(ready && all_ready && !any_deleting && (changed || any_init)) {
            return Ok(range);
        }

        if !self.publish_live_tenant_view(tenant, resource, &siblings)? {
            return Ok(range);
        }
        let activated = self.state.activate_node_ranges(tenant, resource)?;
        self.settle_rebalanced_views(&activated)?;
        Ok(activated
            .into_iter()
            .find(|r| r.node_uuid == node_uuid)
            .unwrap_or(range))
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Start deleting a tenant resource.
    ///
    /// Rows move to DELETING, the tenant view is removed so routing stops,
    /// and every node receives a DELETE node view to tombstone its data.
    pub fn delete_tenant_resource(&self, tenant: &str, resource: &str) -> ControlResult<Vec<NodeRange>> {
        let _lifecycle = self.lifecycle(tenant, resource);
        let ranges = self.state.mark_node_ranges_deleting(tenant, resource)?;
        if ranges.is_empty() {
            return Err(ControlError::NotFound(format!("tenant resource {tenant}/{resource}")));
        }

        self.propagation.delete_tenant_range(tenant, resource)?;
        let views: Vec<_> = ranges.iter().map(|r| r.node_view(RangeAction::Delete)).collect();
        self.propagation.write_node_ranges(&views)?;
        info!(%tenant, %resource, nodes = ranges.len(), "tenant resource deleting");
        Ok(by_hash(ranges))
    }

    /// Remove a node's range after it confirmed local cleanup.
    ///
    /// A missing row is not an error: the node-view key is removed anyway.
    pub fn finalize_delete(&self, node_uuid: &str, tenant: &str, resource: &str) -> ControlResult<()> {
        let _lifecycle = self.lifecycle(tenant, resource);
        match self.state.get_node_range(tenant, resource, node_uuid)? {
            Some(range) if range.status != RangeStatus::Deleting => {
                return Err(ControlError::InvalidState(format!(
                    "node range {tenant}/{resource} on node {node_uuid} is {:?}, not DELETING",
                    range.status
                )));
            }
            Some(_) => {
                self.propagation.delete_node_range(node_uuid, tenant, resource)?;
                self.state.delete_node_range(tenant, resource, node_uuid)?;
                info!(%node_uuid, %tenant, %resource, "node range deleted");
            }
            None => {
                let existed = self.propagation.delete_node_range(node_uuid, tenant, resource)?;
                warn!(%node_uuid, %tenant, %resource, existed, "finalize for missing node range");
            }
        }
        Ok(())
    }

    // ── Rebalance ──────────────────────────────────────────────────

    /// Add one node to a tenant resource by splitting its widest segment.
    ///
    /// The new range starts INIT and not ready; the owner of the split
    /// segment is told to rebalance. The published tenant view is kept until
    /// every range, the new one included, is ready again; the owner's view
    /// then returns to a plain assignment.
    pub fn rebalance_tenant_resource(&self, tenant: &str, resource: &str) -> ControlResult<NodeRange> {
        let _lifecycle = self.lifecycle(tenant, resource);
        let ranges = self.state.list_node_ranges(tenant, resource)?;
        if ranges.is_empty() {
            return Err(ControlError::NotFound(format!("tenant resource {tenant}/{resource}")));
        }
        if ranges.iter().any(|r| r.status == RangeStatus::Deleting) {
            return Err(ControlError::InvalidState(format!(
                "tenant resource {tenant}/{resource} is being deleted"
            )));
        }

        let hashes: Vec<i32> = ranges.iter().map(|r| r.hash).collect();
        let segment = widest_segment(&hashes)
            .ok_or_else(|| ControlError::NotFound(format!("tenant resource {tenant}/{resource}")))?;
        if segment.width < 2 {
            return Err(ControlError::InvalidState(format!(
                "tenant resource {tenant}/{resource} has no segment left to split"
            )));
        }
        let owner = ranges
            .iter()
            .find(|r| r.hash == segment.start)
            .cloned()
            .ok_or_else(|| ControlError::InvalidState(format!("no owner for boundary {}", segment.start)))?;

        let serving: BTreeSet<String> = ranges.iter().map(|r| r.node_uuid.clone()).collect();
        let nodes = self.state.list_nodes()?;
        let load = self.state.list_all_node_ranges()?;
        let node = select_nodes(&nodes, &load, &serving, 1)?
            .into_iter()
            .next()
            .ok_or(ControlError::NotEnoughNodes { required: 1, available: 0 })?;

        let now = epoch_secs();
        let added = NodeRange {
            node_uuid: node.uuid.clone(),
            tenant: tenant.to_string(),
            resource: resource.to_string(),
            hash: segment.midpoint(),
            status: RangeStatus::Init,
            ready: false,
            table_version: owner.table_version,
            create_date: now,
            update_date: now,
        };
        if !self.state.insert_node_range(&added)? {
            return Err(ControlError::InvalidState(format!(
                "tenant resource {tenant}/{resource} changed during rebalance"
            )));
        }

        self.propagation.write_node_ranges(&[
            added.node_view(RangeAction::Assign),
            owner.node_view(RangeAction::Rebalance),
        ])?;
        info!(
            %tenant,
            %resource,
            node_uuid = %added.node_uuid,
            hash = added.hash,
            split_from = %owner.node_uuid,
            "tenant resource rebalanced"
        );
        Ok(added)
    }

    // ── Republish ──────────────────────────────────────────────────

    /// Rebuild both published views of a tenant resource from its rows.
    pub fn republish(&self, tenant: &str, resource: &str) -> ControlResult<()> {
        let _lifecycle = self.lifecycle(tenant, resource);
        let ranges = self.state.list_node_ranges(tenant, resource)?;
        if ranges.is_empty() {
            return Err(ControlError::NotFound(format!("tenant resource {tenant}/{resource}")));
        }

        let deleting = ranges.iter().any(|r| r.status == RangeStatus::Deleting);
        if deleting {
            self.propagation.delete_tenant_range(tenant, resource)?;
        }

        let views: Vec<_> = ranges
            .iter()
            .map(|r| {
                let action = if r.status == RangeStatus::Deleting {
                    RangeAction::Delete
                } else {
                    RangeAction::Assign
                };
                r.node_view(action)
            })
            .collect();
        self.propagation.write_node_ranges(&views)?;

        if !deleting
            && ranges.iter().all(|r| r.ready)
            && self.publish_live_tenant_view(tenant, resource, &ranges)?
        {
            self.state.activate_node_ranges(tenant, resource)?;
        }
        debug!(%tenant, %resource, deleting, "tenant resource republished");
        Ok(())
    }

    /// Republish every tenant resource. Failures are logged and skipped;
    /// returns how many were republished.
    pub fn republish_all(&self) -> ControlResult<usize> {
        let mut count = 0;
        for id in self.state.list_tenant_resources()? {
            match self.republish(&id.tenant, &id.resource) {
                Ok(()) => count += 1,
                Err(e) => warn!(%id, error = %e, "republish failed"),
            }
        }
        info!(count, "tenant resources republished");
        Ok(count)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Ranges of one tenant resource, ordered by boundary.
    pub fn list_tenant_resource(&self, tenant: &str, resource: &str) -> ControlResult<Vec<NodeRange>> {
        let ranges = self.state.list_node_ranges(tenant, resource)?;
        if ranges.is_empty() {
            return Err(ControlError::NotFound(format!("tenant resource {tenant}/{resource}")));
        }
        Ok(by_hash(ranges))
    }

    pub fn list_node_ranges_for_node(&self, node_uuid: &str) -> ControlResult<Vec<NodeRange>> {
        Ok(self.state.list_node_ranges_for_node(node_uuid)?)
    }

    pub fn list_tenant_resources(&self) -> ControlResult<Vec<TenantResource>> {
        Ok(self.state.list_tenant_resources()?)
    }

    fn lifecycle(&self, tenant: &str, resource: &str) -> MutexGuard<'_, ()> {
        let slot = hash_key(&format!("{tenant}/{resource}")) as u32 as usize % self.lifecycle.len();
        self.lifecycle[slot].lock()
    }

    /// Publish the tenant view, then withdraw it if the rows were marked
    /// DELETING or removed meanwhile. Returns whether the view stayed.
    fn publish_live_tenant_view(
        &self,
        tenant: &str,
        resource: &str,
        ranges: &[NodeRange],
    ) -> ControlResult<bool> {
        self.publish_tenant_view(tenant, resource, ranges)?;

        let rows = self.state.list_node_ranges(tenant, resource)?;
        if rows.is_empty() || rows.iter().any(|r| r.status == RangeStatus::Deleting) {
            self.propagation.delete_tenant_range(tenant, resource)?;
            warn!(%tenant, %resource, "tenant resource deleted while publishing, view withdrawn");
            return Ok(false);
        }
        Ok(true)
    }

    /// Turn node views still asking for a rebalance back into assignments.
    fn settle_rebalanced_views(&self, ranges: &[NodeRange]) -> ControlResult<()> {
        let mut views = Vec::new();
        for range in ranges {
            let current = self
                .propagation
                .read_node_resource(&range.node_uuid, &range.tenant, &range.resource)?;
            if current.is_some_and(|view| view.meta.action == RangeAction::Rebalance) {
                views.push(range.node_view(RangeAction::Assign));
            }
        }
        if !views.is_empty() {
            self.propagation.write_node_ranges(&views)?;
            debug!(count = views.len(), "rebalanced node views settled");
        }
        Ok(())
    }

    fn publish_tenant_view(&self, tenant: &str, resource: &str, ranges: &[NodeRange]) -> ControlResult<()> {
        let mut map = BTreeMap::new();
        for range in ranges {
            let node = self
                .state
                .get_node(&range.node_uuid)?
                .ok_or_else(|| ControlError::NotFound(format!("node {}", range.node_uuid)))?;
            map.insert(
                range.hash,
                NodeDescriptor {
                    node_uuid: node.uuid.clone(),
                    uri: node.uri(),
                    boundary_hash: range.hash,
                },
            );
        }
        self.propagation.write_tenant_range(&TenantResourceRange {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
            ranges: map,
        })?;
        info!(%tenant, %resource, boundaries = ranges.len(), "tenant resource routable");
        Ok(())
    }
}

fn by_hash(mut ranges: Vec<NodeRange>) -> Vec<NodeRange> {
    ranges.sort_by_key(|r| r.hash);
    ranges
}
