//! The node's view of the control plane.

use keygrid_control::PartitionManager;

use crate::error::NodeResult;

/// Calls a node makes back to the control plane.
pub trait ControlPlane: Send + Sync {
    /// Report whether this node has provisioned its range.
    fn set_ready(&self, node_uuid: &str, tenant: &str, resource: &str, ready: bool) -> NodeResult<()>;

    /// Confirm local cleanup of a deleted range.
    fn finalize_delete(&self, node_uuid: &str, tenant: &str, resource: &str) -> NodeResult<()>;
}

/// In-process control plane, used when node and control plane share a process.
impl ControlPlane for PartitionManager {
    fn set_ready(&self, node_uuid: &str, tenant: &str, resource: &str, ready: bool) -> NodeResult<()> {
        PartitionManager::set_ready(self, node_uuid, tenant, resource, ready)?;
        Ok(())
    }

    fn finalize_delete(&self, node_uuid: &str, tenant: &str, resource: &str) -> NodeResult<()> {
        PartitionManager::finalize_delete(self, node_uuid, tenant, resource)?;
        Ok(())
    }
}
