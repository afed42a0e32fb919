//! Node manager: registration and status of storage nodes.
//!
//! Nodes register themselves on startup and start out DISABLED. An operator
//! enables them before they receive partitions. BANNED is terminal.

use tracing::{debug, info, trace, warn};

use keygrid_state::{Node, NodeStatus, StateStore, epoch_secs, validate_segment};

use crate::error::{ControlError, ControlResult};

/// Manages storage node records.
#[derive(Clone)]
pub struct NodeManager {
    state: StateStore,
}

impl NodeManager {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Register a node. Re-registering a known uuid returns the stored
    /// record unchanged.
    pub fn register(&self, uuid: &str, host: &str, port: u16) -> ControlResult<Node> {
        validate_segment("node uuid", uuid)?;
        if host.is_empty() {
            return Err(ControlError::InvalidRequest("node host must not be empty".to_string()));
        }

        let now = epoch_secs();
        let candidate = Node {
            uuid: uuid.to_string(),
            host: host.to_string(),
            port,
            status: NodeStatus::Disabled,
            verified: false,
            create_date: now,
            update_date: now,
        };
        let (node, created) = self.state.insert_node_if_absent(&candidate)?;
        if created {
            info!(node_uuid = %uuid, %host, port, "node registered");
        } else {
            debug!(node_uuid = %uuid, "node already registered");
        }
        Ok(node)
    }

    pub fn enable(&self, uuid: &str) -> ControlResult<Node> {
        self.transition(uuid, NodeStatus::Enabled)
    }

    pub fn disable(&self, uuid: &str) -> ControlResult<Node> {
        self.transition(uuid, NodeStatus::Disabled)
    }

    /// Ban a node permanently. Banning twice is a no-op.
    pub fn ban(&self, uuid: &str) -> ControlResult<Node> {
        let mut node = self.require(uuid)?;
        if node.status == NodeStatus::Banned {
            return Ok(node);
        }
        node.status = NodeStatus::Banned;
        node.update_date = epoch_secs();
        self.state.put_node(&node)?;
        warn!(node_uuid = %uuid, "node banned");
        Ok(node)
    }

    pub fn status(&self, uuid: &str) -> ControlResult<NodeStatus> {
        Ok(self.require(uuid)?.status)
    }

    pub fn get(&self, uuid: &str) -> ControlResult<Option<Node>> {
        Ok(self.state.get_node(uuid)?)
    }

    pub fn list(&self) -> ControlResult<Vec<Node>> {
        Ok(self.state.list_nodes()?)
    }

    /// Nodes that may receive new partitions.
    pub fn available(&self) -> ControlResult<Vec<Node>> {
        Ok(self
            .state
            .list_nodes()?
            .into_iter()
            .filter(|n| n.status == NodeStatus::Enabled)
            .collect())
    }

    fn require(&self, uuid: &str) -> ControlResult<Node> {
        self.state
            .get_node(uuid)?
            .ok_or_else(|| ControlError::NotFound(format!("node {uuid}")))
    }

    fn transition(&self, uuid: &str, target: NodeStatus) -> ControlResult<Node> {
        let mut node = self.require(uuid)?;
        if node.status == NodeStatus::Banned {
            warn!(node_uuid = %uuid, ?target, "status change refused for banned node");
            return Err(ControlError::BannedNode(uuid.to_string()));
        }
        if node.status == target {
            trace!(node_uuid = %uuid, ?target, "node already in requested status");
            return Ok(node);
        }
        node.status = target;
        node.update_date = epoch_secs();
        self.state.put_node(&node)?;
        info!(node_uuid = %uuid, status = ?target, "node status changed");
        Ok(node)
    }
}
