//! StateStore: redb-backed persistence for nodes and node ranges.
//!
//! Provides typed operations over the two control-plane tables. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Collect the node ranges whose key starts with `prefix`.
fn scan_ranges<T>(table: &T, prefix: &str) -> StateResult<Vec<NodeRange>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            results.push(decode(value.value())?);
        }
    }
    Ok(results)
}

fn tenant_prefix(tenant: &str, resource: &str) -> String {
    format!("{tenant}/{resource}/")
}

/// Outcome of a batch insert for a tenant resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeInsert {
    /// The batch was written.
    Inserted,
    /// Ranges already existed; nothing was written.
    Existing(Vec<NodeRange>),
}

/// Outcome of a set-ready update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyUpdate {
    /// No such node range.
    Missing,
    /// The flag already had the requested value; nothing was written.
    Unchanged {
        range: NodeRange,
        siblings: Vec<NodeRange>,
    },
    /// The flag was changed. `siblings` includes the updated range.
    Updated {
        range: NodeRange,
        siblings: Vec<NodeRange>,
    },
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert a node unless one with the same uuid exists.
    ///
    /// Returns the stored record and whether this call created it.
    pub fn insert_node_if_absent(&self, node: &Node) -> StateResult<(Node, bool)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let existing: Option<Node> = match table.get(node.uuid.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            outcome = match existing {
                Some(existing) => (existing, false),
                None => {
                    let value = encode(node)?;
                    table
                        .insert(node.uuid.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    (node.clone(), true)
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(uuid = %node.uuid, created = outcome.1, "node insert-if-absent");
        Ok(outcome)
    }

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        let value = encode(node)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(node.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a node by uuid.
    pub fn get_node(&self, uuid: &str) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(uuid).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all nodes, ordered by uuid.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Node ranges ────────────────────────────────────────────────

    /// Write a full set of ranges for one tenant resource, unless any
    /// range for it already exists. Check and write share one transaction.
    pub fn insert_node_ranges(
        &self,
        tenant: &str,
        resource: &str,
        ranges: &[NodeRange],
    ) -> StateResult<RangeInsert> {
        let prefix = tenant_prefix(tenant, resource);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            let existing = scan_ranges(&table, &prefix)?;
            if existing.is_empty() {
                for range in ranges {
                    let key = range.table_key();
                    let value = encode(range)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
                outcome = RangeInsert::Inserted;
            } else {
                outcome = RangeInsert::Existing(existing);
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%tenant, %resource, inserted = matches!(outcome, RangeInsert::Inserted), "node range batch");
        Ok(outcome)
    }

    /// Add one range to an existing tenant resource.
    ///
    /// Refused (returns false) when the node already holds a range for the
    /// resource or another range already starts at the same boundary.
    pub fn insert_node_range(&self, range: &NodeRange) -> StateResult<bool> {
        let prefix = tenant_prefix(&range.tenant, &range.resource);
        let key = range.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            let siblings = scan_ranges(&table, &prefix)?;
            let clash = siblings
                .iter()
                .any(|r| r.node_uuid == range.node_uuid || r.hash == range.hash);
            if clash {
                inserted = false;
            } else {
                let value = encode(range)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                inserted = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, inserted, "node range insert");
        Ok(inserted)
    }

    /// Insert or update a single node range.
    pub fn put_node_range(&self, range: &NodeRange) -> StateResult<()> {
        let key = range.table_key();
        let value = encode(range)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get one node's range for a tenant resource.
    pub fn get_node_range(
        &self,
        tenant: &str,
        resource: &str,
        node_uuid: &str,
    ) -> StateResult<Option<NodeRange>> {
        let key = node_range_key(tenant, resource, node_uuid);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Delete one node range. Returns true if it existed.
    pub fn delete_node_range(
        &self,
        tenant: &str,
        resource: &str,
        node_uuid: &str,
    ) -> StateResult<bool> {
        let key = node_range_key(tenant, resource, node_uuid);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "node range deleted");
        Ok(existed)
    }

    /// All ranges of one tenant resource, ordered by node uuid.
    pub fn list_node_ranges(&self, tenant: &str, resource: &str) -> StateResult<Vec<NodeRange>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
        scan_ranges(&table, &tenant_prefix(tenant, resource))
    }

    /// All ranges assigned to one node.
    pub fn list_node_ranges_for_node(&self, node_uuid: &str) -> StateResult<Vec<NodeRange>> {
        Ok(self
            .list_all_node_ranges()?
            .into_iter()
            .filter(|r| r.node_uuid == node_uuid)
            .collect())
    }

    /// Every node range in the store.
    pub fn list_all_node_ranges(&self) -> StateResult<Vec<NodeRange>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
        scan_ranges(&table, "")
    }

    /// Distinct tenant resources that have at least one range.
    pub fn list_tenant_resources(&self) -> StateResult<Vec<TenantResource>> {
        let distinct: BTreeSet<TenantResource> = self
            .list_all_node_ranges()?
            .iter()
            .map(NodeRange::tenant_resource)
            .collect();
        Ok(distinct.into_iter().collect())
    }

    /// Set the ready flag of one range and return it with all its siblings,
    /// read in the same transaction. No write happens when the flag already
    /// has the requested value.
    pub fn set_node_range_ready(
        &self,
        tenant: &str,
        resource: &str,
        node_uuid: &str,
        ready: bool,
    ) -> StateResult<ReadyUpdate> {
        let key = node_range_key(tenant, resource, node_uuid);
        let prefix = tenant_prefix(tenant, resource);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            let current: Option<NodeRange> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            outcome = match current {
                None => ReadyUpdate::Missing,
                Some(range) if range.ready == ready => ReadyUpdate::Unchanged {
                    range,
                    siblings: scan_ranges(&table, &prefix)?,
                },
                Some(mut range) => {
                    range.ready = ready;
                    range.update_date = epoch_secs();
                    let value = encode(&range)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    ReadyUpdate::Updated {
                        siblings: scan_ranges(&table, &prefix)?,
                        range,
                    }
                }
            };
        }
        // Commit is harmless for the read-only outcomes.
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ready, "node range ready flag");
        Ok(outcome)
    }

    /// Move every range of a tenant resource to DELETING in one transaction.
    ///
    /// Returns the updated ranges (empty when the resource has none).
    pub fn mark_node_ranges_deleting(
        &self,
        tenant: &str,
        resource: &str,
    ) -> StateResult<Vec<NodeRange>> {
        self.transition_ranges(tenant, resource, |range| {
            if range.status == RangeStatus::Deleting {
                return false;
            }
            range.status = RangeStatus::Deleting;
            true
        })
    }

    /// Move ready INIT ranges of a tenant resource to ACTIVE.
    ///
    /// Ranges that are DELETING are left untouched.
    pub fn activate_node_ranges(&self, tenant: &str, resource: &str) -> StateResult<Vec<NodeRange>> {
        self.transition_ranges(tenant, resource, |range| {
            if range.status != RangeStatus::Init || !range.ready {
                return false;
            }
            range.status = RangeStatus::Active;
            true
        })
    }

    /// Apply `change` to every range of a tenant resource inside one write
    /// transaction, persisting the ranges for which it returns true.
    fn transition_ranges<F>(
        &self,
        tenant: &str,
        resource: &str,
        mut change: F,
    ) -> StateResult<Vec<NodeRange>>
    where
        F: FnMut(&mut NodeRange) -> bool,
    {
        let prefix = tenant_prefix(tenant, resource);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut ranges;
        {
            let mut table = txn.open_table(NODE_RANGES).map_err(map_err!(Table))?;
            ranges = scan_ranges(&table, &prefix)?;
            let now = epoch_secs();
            for range in ranges.iter_mut() {
                if change(range) {
                    range.update_date = now;
                    let key = range.table_key();
                    let value = encode(range)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn test_node(uuid: &str) -> Node {
        Node {
            uuid: uuid.to_string(),
            host: "10.0.0.1".to_string(),
            port: 9000,
            status: NodeStatus::Disabled,
            verified: false,
            create_date: 1000,
            update_date: 1000,
        }
    }

    fn test_range(tenant: &str, resource: &str, node: &str, hash: i32) -> NodeRange {
        NodeRange {
            node_uuid: node.to_string(),
            tenant: tenant.to_string(),
            resource: resource.to_string(),
            hash,
            status: RangeStatus::Init,
            ready: false,
            table_version: TableVersion::V1SingleEntry,
            create_date: 1000,
            update_date: 1000,
        }
    }

    fn orders_pair() -> Vec<NodeRange> {
        vec![
            test_range("t1", "orders", "a", i32::MIN),
            test_range("t1", "orders", "b", 0),
        ]
    }

    // ── Nodes ──────────────────────────────────────────────────────

    #[test]
    fn node_insert_if_absent_keeps_first_record() {
        let store = test_store();
        let (stored, created) = store.insert_node_if_absent(&test_node("n1")).unwrap();
        assert!(created);
        assert_eq!(stored.host, "10.0.0.1");

        let mut other = test_node("n1");
        other.host = "10.9.9.9".to_string();
        let (stored, created) = store.insert_node_if_absent(&other).unwrap();
        assert!(!created);
        assert_eq!(stored.host, "10.0.0.1");
    }

    #[test]
    fn node_put_and_get() {
        let store = test_store();
        let mut node = test_node("n1");
        store.put_node(&node).unwrap();
        node.status = NodeStatus::Enabled;
        store.put_node(&node).unwrap();

        assert_eq!(store.get_node("n1").unwrap(), Some(node));
        assert!(store.get_node("missing").unwrap().is_none());
    }

    #[test]
    fn node_list_is_ordered_by_uuid() {
        let store = test_store();
        store.put_node(&test_node("n2")).unwrap();
        store.put_node(&test_node("n1")).unwrap();
        let uuids: Vec<String> = store.list_nodes().unwrap().into_iter().map(|n| n.uuid).collect();
        assert_eq!(uuids, vec!["n1", "n2"]);
    }

    // ── Node ranges ────────────────────────────────────────────────

    #[test]
    fn batch_insert_only_when_resource_is_empty() {
        let store = test_store();
        let ranges = orders_pair();
        assert_eq!(
            store.insert_node_ranges("t1", "orders", &ranges).unwrap(),
            RangeInsert::Inserted
        );

        let again = vec![test_range("t1", "orders", "c", 5)];
        match store.insert_node_ranges("t1", "orders", &again).unwrap() {
            RangeInsert::Existing(existing) => assert_eq!(existing, ranges),
            other => panic!("expected existing ranges, got {other:?}"),
        }
        assert_eq!(store.list_node_ranges("t1", "orders").unwrap().len(), 2);
    }

    #[test]
    fn prefix_scan_does_not_leak_between_resources() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();
        store
            .insert_node_ranges("t1", "orders2", &[test_range("t1", "orders2", "a", i32::MIN)])
            .unwrap();

        assert_eq!(store.list_node_ranges("t1", "orders").unwrap().len(), 2);
        assert_eq!(store.list_node_ranges("t1", "orders2").unwrap().len(), 1);
        assert_eq!(store.list_node_ranges_for_node("a").unwrap().len(), 2);
        assert_eq!(
            store.list_tenant_resources().unwrap(),
            vec![
                TenantResource::new("t1", "orders").unwrap(),
                TenantResource::new("t1", "orders2").unwrap(),
            ]
        );
    }

    #[test]
    fn single_insert_rejects_duplicate_node_or_boundary() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();

        assert!(!store.insert_node_range(&test_range("t1", "orders", "a", 100)).unwrap());
        assert!(!store.insert_node_range(&test_range("t1", "orders", "c", 0)).unwrap());
        assert!(store.insert_node_range(&test_range("t1", "orders", "c", 100)).unwrap());
        assert_eq!(store.list_node_ranges("t1", "orders").unwrap().len(), 3);
    }

    #[test]
    fn set_ready_reports_unchanged_without_writing() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();

        match store.set_node_range_ready("t1", "orders", "a", false).unwrap() {
            ReadyUpdate::Unchanged { range, siblings } => {
                assert!(!range.ready);
                assert_eq!(range.update_date, 1000);
                assert_eq!(siblings.len(), 2);
            }
            other => panic!("expected unchanged, got {other:?}"),
        }
    }

    #[test]
    fn set_ready_returns_updated_siblings() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();

        match store.set_node_range_ready("t1", "orders", "a", true).unwrap() {
            ReadyUpdate::Updated { range, siblings } => {
                assert!(range.ready);
                let a = siblings.iter().find(|r| r.node_uuid == "a").unwrap();
                assert!(a.ready);
                let b = siblings.iter().find(|r| r.node_uuid == "b").unwrap();
                assert!(!b.ready);
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(store.get_node_range("t1", "orders", "a").unwrap().unwrap().ready);
    }

    #[test]
    fn set_ready_on_missing_range() {
        let store = test_store();
        assert_eq!(
            store.set_node_range_ready("t1", "orders", "a", true).unwrap(),
            ReadyUpdate::Missing
        );
    }

    #[test]
    fn activate_only_touches_ready_init_ranges() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();
        store.set_node_range_ready("t1", "orders", "a", true).unwrap();

        let ranges = store.activate_node_ranges("t1", "orders").unwrap();
        let a = ranges.iter().find(|r| r.node_uuid == "a").unwrap();
        let b = ranges.iter().find(|r| r.node_uuid == "b").unwrap();
        assert_eq!(a.status, RangeStatus::Active);
        assert_eq!(b.status, RangeStatus::Init);
    }

    #[test]
    fn mark_deleting_updates_every_range() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();

        let ranges = store.mark_node_ranges_deleting("t1", "orders").unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(ranges.iter().all(|r| r.status == RangeStatus::Deleting));
        assert!(
            store
                .list_node_ranges("t1", "orders")
                .unwrap()
                .iter()
                .all(|r| r.status == RangeStatus::Deleting)
        );
        assert!(store.mark_node_ranges_deleting("t1", "nothing").unwrap().is_empty());
    }

    #[test]
    fn delete_range_reports_existence() {
        let store = test_store();
        store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();

        assert!(store.delete_node_range("t1", "orders", "a").unwrap());
        assert!(!store.delete_node_range("t1", "orders", "a").unwrap());
        assert!(store.get_node_range("t1", "orders", "a").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("keygrid.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_node(&test_node("n1")).unwrap();
            store.insert_node_ranges("t1", "orders", &orders_pair()).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_node("n1").unwrap().is_some());
        assert_eq!(store.list_node_ranges("t1", "orders").unwrap().len(), 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = test_store();
        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.list_all_node_ranges().unwrap().is_empty());
        assert!(store.list_tenant_resources().unwrap().is_empty());
        assert!(store.get_node_range("t", "r", "n").unwrap().is_none());
    }
}
