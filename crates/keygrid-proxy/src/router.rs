//! Entry router: reads and writes entries on the nodes that own them.
//!
//! Reads take the first replica that has the entry. Writes and deletes go
//! to every replica.

use std::sync::Arc;

use tracing::{debug, warn};

use keygrid_state::{EntryInfo, NodeDescriptor, epoch_millis};

use crate::error::ProxyResult;
use crate::resolver::{NodeRangeResolver, Placement};

/// Transport to one storage node's entry API.
pub trait NodeClient: Send + Sync {
    fn read_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        entry: &str,
    ) -> ProxyResult<Option<EntryInfo>>;

    fn write_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        info: &EntryInfo,
    ) -> ProxyResult<()>;

    /// Returns true if the node held the entry.
    fn delete_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        entry: &str,
    ) -> ProxyResult<bool>;
}

#[derive(Clone)]
pub struct EntryRouter {
    resolver: NodeRangeResolver,
    client: Arc<dyn NodeClient>,
}

impl EntryRouter {
    pub fn new(resolver: NodeRangeResolver, client: Arc<dyn NodeClient>) -> Self {
        Self { resolver, client }
    }

    pub fn resolver(&self) -> &NodeRangeResolver {
        &self.resolver
    }

    /// Read an entry from the first replica that has it.
    ///
    /// A failing replica is skipped. The call fails only when no replica
    /// answered at all.
    pub fn get_entry(&self, tenant: &str, resource: &str, entry: &str) -> ProxyResult<Option<EntryInfo>> {
        let placements = self.resolver.resolve(tenant, resource, entry)?;
        let mut answered = false;
        let mut last_error = None;

        for Placement { node, .. } in &placements {
            match self.client.read_entry(node, tenant, resource, entry) {
                Ok(Some(info)) => return Ok(Some(info)),
                Ok(None) => answered = true,
                Err(e) => {
                    warn!(node_uuid = %node.node_uuid, %tenant, %resource, %entry, error = %e, "replica read failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    /// Write an entry to every replica. Returns the placements written.
    pub fn put_entry(
        &self,
        tenant: &str,
        resource: &str,
        entry: &str,
        data: serde_json::Value,
    ) -> ProxyResult<Vec<Placement>> {
        let placements = self.resolver.resolve(tenant, resource, entry)?;
        let timestamp = epoch_millis();
        for placement in &placements {
            let info = EntryInfo {
                id: entry.to_string(),
                data: data.clone(),
                location_hash: placement.location_hash,
                timestamp,
            };
            self.client
                .write_entry(&placement.node, tenant, resource, &info)?;
        }
        debug!(%tenant, %resource, %entry, replicas = placements.len(), "entry written");
        Ok(placements)
    }

    /// Delete an entry from every replica. Returns whether any held it.
    pub fn delete_entry(&self, tenant: &str, resource: &str, entry: &str) -> ProxyResult<bool> {
        let placements = self.resolver.resolve(tenant, resource, entry)?;
        let mut existed = false;
        for placement in &placements {
            existed |= self
                .client
                .delete_entry(&placement.node, tenant, resource, entry)?;
        }
        debug!(%tenant, %resource, %entry, existed, "entry deleted");
        Ok(existed)
    }
}
