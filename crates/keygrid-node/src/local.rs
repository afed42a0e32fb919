//! In-process [`NodeClient`] over registered [`TenantStorage`] instances.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use keygrid_proxy::{NodeClient, ProxyError, ProxyResult};
use keygrid_state::{EntryInfo, NodeDescriptor, TenantResource};

use crate::storage::TenantStorage;

/// Routes proxy calls to node storages living in the same process.
#[derive(Default)]
pub struct LocalNodeClient {
    nodes: RwLock<HashMap<String, Arc<dyn TenantStorage>>>,
}

impl LocalNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_uuid: &str, storage: Arc<dyn TenantStorage>) {
        self.nodes.write().insert(node_uuid.to_string(), storage);
    }

    pub fn unregister(&self, node_uuid: &str) -> bool {
        self.nodes.write().remove(node_uuid).is_some()
    }

    fn storage(&self, node: &NodeDescriptor) -> ProxyResult<Arc<dyn TenantStorage>> {
        self.nodes
            .read()
            .get(&node.node_uuid)
            .cloned()
            .ok_or_else(|| ProxyError::node(&node.node_uuid, "node not reachable"))
    }
}

fn table(node: &NodeDescriptor, tenant: &str, resource: &str) -> ProxyResult<TenantResource> {
    TenantResource::new(tenant, resource).map_err(|e| ProxyError::node(&node.node_uuid, e.to_string()))
}

impl NodeClient for LocalNodeClient {
    fn read_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        entry: &str,
    ) -> ProxyResult<Option<EntryInfo>> {
        let id = table(node, tenant, resource)?;
        self.storage(node)?
            .read(&id, entry)
            .map_err(|e| ProxyError::node(&node.node_uuid, e.to_string()))
    }

    fn write_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        info: &EntryInfo,
    ) -> ProxyResult<()> {
        let id = table(node, tenant, resource)?;
        self.storage(node)?
            .write(&id, info)
            .map_err(|e| ProxyError::node(&node.node_uuid, e.to_string()))
    }

    fn delete_entry(
        &self,
        node: &NodeDescriptor,
        tenant: &str,
        resource: &str,
        entry: &str,
    ) -> ProxyResult<bool> {
        let id = table(node, tenant, resource)?;
        self.storage(node)?
            .delete(&id, entry)
            .map_err(|e| ProxyError::node(&node.node_uuid, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTenantStorage;

    fn descriptor(uuid: &str) -> NodeDescriptor {
        NodeDescriptor {
            node_uuid: uuid.to_string(),
            uri: format!("{uuid}:9000"),
            boundary_hash: 0,
        }
    }

    fn info() -> EntryInfo {
        EntryInfo {
            id: "order-42".to_string(),
            data: serde_json::json!({"qty": 1}),
            location_hash: 5,
            timestamp: 1,
        }
    }

    #[test]
    fn calls_reach_registered_storage() {
        let storage = Arc::new(MemoryTenantStorage::new());
        storage
            .provision(&TenantResource::new("t1", "orders").unwrap(), 0)
            .unwrap();
        let client = LocalNodeClient::new();
        client.register("a", storage);

        let node = descriptor("a");
        client.write_entry(&node, "t1", "orders", &info()).unwrap();
        assert_eq!(
            client.read_entry(&node, "t1", "orders", "order-42").unwrap(),
            Some(info())
        );
        assert!(client.delete_entry(&node, "t1", "orders", "order-42").unwrap());
    }

    #[test]
    fn unknown_node_and_missing_table_are_node_errors() {
        let client = LocalNodeClient::new();
        client.register("a", Arc::new(MemoryTenantStorage::new()));

        assert!(matches!(
            client.read_entry(&descriptor("zz"), "t1", "orders", "k"),
            Err(ProxyError::Node { .. })
        ));
        assert!(matches!(
            client.read_entry(&descriptor("a"), "t1", "orders", "k"),
            Err(ProxyError::Node { .. })
        ));
        assert!(client.unregister("a"));
        assert!(!client.unregister("a"));
    }
}
