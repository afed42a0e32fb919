//! Node selection for new partitions.
//!
//! Candidates are the ENABLED nodes, ranked by how many node ranges they
//! already hold (fewest first) with the uuid as tie-break, so the choice is
//! deterministic for a given control-plane state.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use keygrid_state::{Node, NodeRange, NodeStatus};

use crate::error::{ControlError, ControlResult};

/// A node eligible for placement and its current load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: Node,
    pub assigned_ranges: usize,
}

/// Rank every enabled node not in `exclude`, least loaded first.
pub fn rank_candidates(
    nodes: &[Node],
    ranges: &[NodeRange],
    exclude: &BTreeSet<String>,
) -> Vec<Candidate> {
    let mut load: HashMap<&str, usize> = HashMap::new();
    for range in ranges {
        *load.entry(range.node_uuid.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<Candidate> = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Enabled && !exclude.contains(&n.uuid))
        .map(|n| Candidate {
            assigned_ranges: load.get(n.uuid.as_str()).copied().unwrap_or(0),
            node: n.clone(),
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.assigned_ranges
            .cmp(&b.assigned_ranges)
            .then_with(|| a.node.uuid.cmp(&b.node.uuid))
    });
    ranked
}

/// Pick exactly `count` nodes, or fail with `NotEnoughNodes`.
pub fn select_nodes(
    nodes: &[Node],
    ranges: &[NodeRange],
    exclude: &BTreeSet<String>,
    count: usize,
) -> ControlResult<Vec<Node>> {
    let ranked = rank_candidates(nodes, ranges, exclude);
    if ranked.len() < count {
        return Err(ControlError::NotEnoughNodes {
            required: count,
            available: ranked.len(),
        });
    }
    let chosen: Vec<Node> = ranked.into_iter().take(count).map(|c| c.node).collect();
    debug!(
        count,
        nodes = ?chosen.iter().map(|n| n.uuid.as_str()).collect::<Vec<_>>(),
        "nodes selected"
    );
    Ok(chosen)
}
