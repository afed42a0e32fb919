//! Tenant storage: the node's local tables, one per tenant resource.
//!
//! The encrypted SQL engine of a real node sits behind [`TenantStorage`];
//! [`MemoryTenantStorage`] keeps tables in process.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use keygrid_state::{EntryInfo, TenantResource};

use crate::error::{NodeError, NodeResult};

/// Summary of one local tenant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantTable {
    pub id: TenantResource,
    /// Ring boundary this node serves for the resource.
    pub hash: i32,
    /// Marked for deletion; rejects reads and writes until removed.
    pub tombstoned: bool,
    pub entries: usize,
}

pub trait TenantStorage: Send + Sync {
    /// Create the table if missing. Returns true if it was created.
    ///
    /// Provisioning a tombstoned table resets it to an empty live table.
    fn provision(&self, id: &TenantResource, hash: i32) -> NodeResult<bool>;

    /// Mark a table for deletion. Returns false if there is no such table.
    fn tombstone(&self, id: &TenantResource) -> NodeResult<bool>;

    /// Drop a table and its data. Returns true if it existed.
    fn remove(&self, id: &TenantResource) -> NodeResult<bool>;

    fn read(&self, id: &TenantResource, entry: &str) -> NodeResult<Option<EntryInfo>>;

    fn write(&self, id: &TenantResource, info: &EntryInfo) -> NodeResult<()>;

    fn delete(&self, id: &TenantResource, entry: &str) -> NodeResult<bool>;

    fn tables(&self) -> NodeResult<Vec<TenantTable>>;
}

struct Table {
    hash: i32,
    tombstoned: bool,
    rows: BTreeMap<String, EntryInfo>,
}

/// In-memory [`TenantStorage`].
#[derive(Default)]
pub struct MemoryTenantStorage {
    tables: RwLock<HashMap<TenantResource, Table>>,
}

impl MemoryTenantStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_provisioned(id: &TenantResource) -> NodeError {
    NodeError::NotProvisioned(id.to_string())
}

impl TenantStorage for MemoryTenantStorage {
    fn provision(&self, id: &TenantResource, hash: i32) -> NodeResult<bool> {
        let mut tables = self.tables.write();
        match tables.get_mut(id) {
            Some(table) if !table.tombstoned => {
                table.hash = hash;
                Ok(false)
            }
            _ => {
                tables.insert(
                    id.clone(),
                    Table {
                        hash,
                        tombstoned: false,
                        rows: BTreeMap::new(),
                    },
                );
                info!(%id, hash, "tenant table provisioned");
                Ok(true)
            }
        }
    }

    fn tombstone(&self, id: &TenantResource) -> NodeResult<bool> {
        match self.tables.write().get_mut(id) {
            Some(table) => {
                table.tombstoned = true;
                debug!(%id, "tenant table tombstoned");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, id: &TenantResource) -> NodeResult<bool> {
        let existed = self.tables.write().remove(id).is_some();
        if existed {
            info!(%id, "tenant table removed");
        }
        Ok(existed)
    }

    fn read(&self, id: &TenantResource, entry: &str) -> NodeResult<Option<EntryInfo>> {
        let tables = self.tables.read();
        match tables.get(id) {
            Some(table) if !table.tombstoned => Ok(table.rows.get(entry).cloned()),
            _ => Err(not_provisioned(id)),
        }
    }

    fn write(&self, id: &TenantResource, info: &EntryInfo) -> NodeResult<()> {
        let mut tables = self.tables.write();
        match tables.get_mut(id) {
            Some(table) if !table.tombstoned => {
                table.rows.insert(info.id.clone(), info.clone());
                Ok(())
            }
            _ => Err(not_provisioned(id)),
        }
    }

    fn delete(&self, id: &TenantResource, entry: &str) -> NodeResult<bool> {
        let mut tables = self.tables.write();
        match tables.get_mut(id) {
            Some(table) if !table.tombstoned => Ok(table.rows.remove(entry).is_some()),
            _ => Err(not_provisioned(id)),
        }
    }

    fn tables(&self) -> NodeResult<Vec<TenantTable>> {
        let mut out: Vec<TenantTable> = self
            .tables
            .read()
            .iter()
            .map(|(id, t)| TenantTable {
                id: id.clone(),
                hash: t.hash,
                tombstoned: t.tombstoned,
                entries: t.rows.len(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
