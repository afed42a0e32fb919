//! Node range resolver: which nodes serve an entry.

use serde::Serialize;
use tracing::trace;

use keygrid_ring::{RingEngine, RingEntry};
use keygrid_state::{NodeDescriptor, TenantResourceRange};

use crate::cache::TenantRangeCache;
use crate::error::{ProxyError, ProxyResult};

pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// A node chosen for an entry and the ring position that chose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub node: NodeDescriptor,
    pub location_hash: i32,
}

/// Map ring positions onto the owners in a tenant view.
///
/// Each position goes to the largest boundary at or below it. A node that
/// wins several positions appears once, at its first position. A position
/// below the smallest boundary has no owner.
pub fn placements(range: &TenantResourceRange, entry: &RingEntry) -> ProxyResult<Vec<Placement>> {
    let mut out: Vec<Placement> = Vec::with_capacity(entry.locations.len());
    for &hash in &entry.locations {
        let node = range.owner_of(hash).ok_or(ProxyError::Unroutable { hash })?;
        if out.iter().any(|p| p.node.node_uuid == node.node_uuid) {
            continue;
        }
        out.push(Placement {
            node: node.clone(),
            location_hash: hash,
        });
    }
    Ok(out)
}

/// Resolves entry keys to placements using the cached tenant views.
#[derive(Clone)]
pub struct NodeRangeResolver {
    ring: RingEngine,
    cache: TenantRangeCache,
    replication_factor: usize,
}

impl NodeRangeResolver {
    pub fn new(cache: TenantRangeCache) -> Self {
        Self {
            ring: RingEngine::new(),
            cache,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
        }
    }

    pub fn with_replication_factor(mut self, replication_factor: usize) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn cache(&self) -> &TenantRangeCache {
        &self.cache
    }

    /// Nodes serving `entry` in a tenant resource, in ring-position order.
    pub fn resolve(&self, tenant: &str, resource: &str, entry: &str) -> ProxyResult<Vec<Placement>> {
        let located = self.ring.locate(entry, self.replication_factor)?;
        let range = self.cache.get(tenant, resource)?;
        let out = placements(&range, &located)?;
        trace!(%tenant, %resource, %entry, nodes = out.len(), "entry resolved");
        Ok(out)
    }
}
