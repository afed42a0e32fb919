//! PropagationEngine: typed access to the node and tenant views.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use keygrid_state::{MetaData, NodeDescriptor, NodeTenantResourceRange, TenantResource, TenantResourceRange};

use crate::error::{PropagationError, PropagationResult};
use crate::store::ConfigStore;

/// `node/{uuid}/id/{tenant}/{resource}`
pub fn node_key(node_uuid: &str, tenant: &str, resource: &str) -> String {
    format!("node/{node_uuid}/id/{tenant}/{resource}")
}

/// `node/{uuid}/id/`, the prefix holding every assignment of one node.
pub fn node_prefix(node_uuid: &str) -> String {
    format!("node/{node_uuid}/id/")
}

/// `tenant/{tenant}/{resource}`
pub fn tenant_key(tenant: &str, resource: &str) -> String {
    format!("tenant/{tenant}/{resource}")
}

/// Split a node-view key into `(node_uuid, tenant, resource)`.
pub fn parse_node_key(key: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        ["node", uuid, "id", tenant, resource]
            if !uuid.is_empty() && !tenant.is_empty() && !resource.is_empty() =>
        {
            Some((uuid.to_string(), tenant.to_string(), resource.to_string()))
        }
        _ => None,
    }
}

/// Split a tenant-view key into its tenant resource.
pub fn parse_tenant_key(key: &str) -> Option<TenantResource> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        ["tenant", tenant, resource] => TenantResource::new(tenant, resource).ok(),
        _ => None,
    }
}

/// Reads and writes the published partition views.
#[derive(Clone)]
pub struct PropagationEngine {
    store: Arc<dyn ConfigStore>,
}

impl PropagationEngine {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    // ── Node view ──────────────────────────────────────────────────

    pub fn write_node_range(&self, range: &NodeTenantResourceRange) -> PropagationResult<()> {
        self.write_node_ranges(std::slice::from_ref(range))
    }

    /// Publish a batch of node assignments atomically.
    pub fn write_node_ranges(&self, ranges: &[NodeTenantResourceRange]) -> PropagationResult<()> {
        if ranges.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(ranges.len());
        for range in ranges {
            let key = node_key(&range.node_uuid, &range.tenant, &range.resource);
            let value = serde_json::to_string(&range.meta)
                .map_err(|e| PropagationError::Serialize(e.to_string()))?;
            entries.push((key, value));
        }
        self.store.put_all(&entries)?;
        debug!(count = ranges.len(), "node view published");
        Ok(())
    }

    /// Remove one node assignment. Returns true if the key existed.
    pub fn delete_node_range(
        &self,
        node_uuid: &str,
        tenant: &str,
        resource: &str,
    ) -> PropagationResult<bool> {
        let key = node_key(node_uuid, tenant, resource);
        let existed = self.store.delete(&key)?;
        debug!(%key, existed, "node view removed");
        Ok(existed)
    }

    /// Every assignment currently published for a node.
    ///
    /// Entries that fail to decode are logged and skipped so one bad value
    /// cannot hide the rest.
    pub fn read_node_resources(&self, node_uuid: &str) -> PropagationResult<Vec<NodeTenantResourceRange>> {
        let entries = self.store.get_prefix(&node_prefix(node_uuid))?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match decode_node_entry(&key, &value) {
                Ok(range) => out.push(range),
                Err(e) => warn!(%key, error = %e, "skipping undecodable node view entry"),
            }
        }
        trace!(%node_uuid, count = out.len(), "node view read");
        Ok(out)
    }

    pub fn read_node_resource(
        &self,
        node_uuid: &str,
        tenant: &str,
        resource: &str,
    ) -> PropagationResult<Option<NodeTenantResourceRange>> {
        let key = node_key(node_uuid, tenant, resource);
        match self.store.get(&key)? {
            Some(value) => Ok(Some(decode_node_entry(&key, &value)?)),
            None => Ok(None),
        }
    }

    // ── Tenant view ────────────────────────────────────────────────

    /// Publish the whole boundary map of a tenant resource as one value.
    pub fn write_tenant_range(&self, range: &TenantResourceRange) -> PropagationResult<()> {
        let key = tenant_key(&range.tenant, &range.resource);
        let value = serde_json::to_string(&range.ranges)
            .map_err(|e| PropagationError::Serialize(e.to_string()))?;
        self.store.put(&key, &value)?;
        info!(%key, boundaries = range.ranges.len(), "tenant view published");
        Ok(())
    }

    /// Remove the tenant view. Returns true if it existed.
    pub fn delete_tenant_range(&self, tenant: &str, resource: &str) -> PropagationResult<bool> {
        let key = tenant_key(tenant, resource);
        let existed = self.store.delete(&key)?;
        info!(%key, existed, "tenant view removed");
        Ok(existed)
    }

    pub fn read_tenant_resource_range(
        &self,
        tenant: &str,
        resource: &str,
    ) -> PropagationResult<Option<TenantResourceRange>> {
        let key = tenant_key(tenant, resource);
        let Some(value) = self.store.get(&key)? else {
            return Ok(None);
        };
        let ranges: BTreeMap<i32, NodeDescriptor> =
            serde_json::from_str(&value).map_err(|e| PropagationError::Deserialize {
                key: key.clone(),
                message: e.to_string(),
            })?;
        Ok(Some(TenantResourceRange {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
            ranges,
        }))
    }
}

/// Rebuild a node assignment from its key and JSON value.
pub fn decode_node_entry(key: &str, value: &str) -> PropagationResult<NodeTenantResourceRange> {
    let (node_uuid, tenant, resource) =
        parse_node_key(key).ok_or_else(|| PropagationError::MalformedKey(key.to_string()))?;
    let meta: MetaData = serde_json::from_str(value).map_err(|e| PropagationError::Deserialize {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    Ok(NodeTenantResourceRange {
        node_uuid,
        tenant,
        resource,
        meta,
    })
}
