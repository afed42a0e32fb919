//! Cluster gauges read from the control-plane state store.

use serde::Serialize;
use tracing::trace;

use keygrid_state::{NodeStatus, RangeStatus, StateStore};

/// Node and range counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub nodes_unknown: u64,
    pub nodes_disabled: u64,
    pub nodes_enabled: u64,
    pub nodes_banned: u64,
    pub tenant_resources: u64,
    pub ranges_init: u64,
    pub ranges_active: u64,
    pub ranges_deleting: u64,
    /// Ranges whose node has reported ready.
    pub ranges_ready: u64,
}

pub fn collect_cluster(state: &StateStore) -> anyhow::Result<ClusterSnapshot> {
    let mut snap = ClusterSnapshot::default();

    for node in state.list_nodes()? {
        match node.status {
            NodeStatus::Unknown => snap.nodes_unknown += 1,
            NodeStatus::Disabled => snap.nodes_disabled += 1,
            NodeStatus::Enabled => snap.nodes_enabled += 1,
            NodeStatus::Banned => snap.nodes_banned += 1,
        }
    }

    for range in state.list_all_node_ranges()? {
        match range.status {
            RangeStatus::Init => snap.ranges_init += 1,
            RangeStatus::Active => snap.ranges_active += 1,
            RangeStatus::Deleting => snap.ranges_deleting += 1,
        }
        if range.ready {
            snap.ranges_ready += 1;
        }
    }
    snap.tenant_resources = state.list_tenant_resources()?.len() as u64;

    trace!(?snap, "cluster snapshot collected");
    Ok(snap)
}
