//! Partition directory model shared by the control plane, nodes and proxies.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected identifier segment (node uuid, tenant or resource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} `{value}`: must be non-empty and must not contain '/'")]
pub struct InvalidIdentifier {
    pub kind: &'static str,
    pub value: String,
}

/// Check that `value` can be used as one segment of a composite key.
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), InvalidIdentifier> {
    if value.is_empty() || value.contains('/') {
        return Err(InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Tenant resources ───────────────────────────────────────────────

/// A tenant's named resource (table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantResource {
    pub tenant: String,
    pub resource: String,
}

impl TenantResource {
    /// Build a validated tenant resource.
    pub fn new(tenant: &str, resource: &str) -> Result<Self, InvalidIdentifier> {
        validate_segment("tenant", tenant)?;
        validate_segment("resource", resource)?;
        Ok(Self {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for TenantResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.resource)
    }
}

/// Storage-engine schema used by the tables backing a NodeRange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableVersion {
    #[default]
    #[serde(rename = "V1SingleEntryEngine")]
    V1SingleEntry,
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Disabled,
    Enabled,
    /// Terminal; a banned node can no longer be enabled or disabled.
    Banned,
}

/// A storage node known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: String,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub verified: bool,
    pub create_date: u64,
    pub update_date: u64,
}

impl Node {
    /// Address other components use to reach the node (`host:port`).
    pub fn uri(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Node ranges ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeStatus {
    Init,
    Active,
    Deleting,
}

/// One node's slice of a tenant resource's keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRange {
    pub node_uuid: String,
    pub tenant: String,
    pub resource: String,
    /// Start boundary of the slice on the ring.
    pub hash: i32,
    pub status: RangeStatus,
    pub ready: bool,
    pub table_version: TableVersion,
    pub create_date: u64,
    pub update_date: u64,
}

impl NodeRange {
    /// Composite key `{tenant}/{resource}/{node_uuid}`.
    pub fn table_key(&self) -> String {
        node_range_key(&self.tenant, &self.resource, &self.node_uuid)
    }

    pub fn tenant_resource(&self) -> TenantResource {
        TenantResource {
            tenant: self.tenant.clone(),
            resource: self.resource.clone(),
        }
    }

    /// The node-facing projection of this range, carrying `action`.
    pub fn node_view(&self, action: RangeAction) -> NodeTenantResourceRange {
        NodeTenantResourceRange {
            node_uuid: self.node_uuid.clone(),
            tenant: self.tenant.clone(),
            resource: self.resource.clone(),
            meta: MetaData {
                hash: self.hash,
                action,
            },
        }
    }
}

pub fn node_range_key(tenant: &str, resource: &str, node_uuid: &str) -> String {
    format!("{tenant}/{resource}/{node_uuid}")
}

// ── Published views ────────────────────────────────────────────────

/// What a node should do with a published assignment.
///
/// `Assign` is the normal case and is encoded on the wire by omitting the
/// `action` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeAction {
    #[default]
    #[serde(rename = "ASSIGN", alias = "assign")]
    Assign,
    #[serde(rename = "REBALANCE", alias = "rebalance")]
    Rebalance,
    #[serde(rename = "DELETE", alias = "delete")]
    Delete,
}

impl RangeAction {
    pub fn is_assign(&self) -> bool {
        matches!(self, RangeAction::Assign)
    }
}

/// Value stored under a node-view key: `{hash, action?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    pub hash: i32,
    #[serde(default, skip_serializing_if = "RangeAction::is_assign")]
    pub action: RangeAction,
}

/// One node's assignment for one tenant resource, as published for the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTenantResourceRange {
    pub node_uuid: String,
    pub tenant: String,
    pub resource: String,
    pub meta: MetaData,
}

impl NodeTenantResourceRange {
    pub fn tenant_resource(&self) -> TenantResource {
        TenantResource {
            tenant: self.tenant.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// Where a ring boundary is served.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub node_uuid: String,
    pub uri: String,
    pub boundary_hash: i32,
}

/// The tenant-facing partition map: ring boundary to serving node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantResourceRange {
    pub tenant: String,
    pub resource: String,
    pub ranges: BTreeMap<i32, NodeDescriptor>,
}

impl TenantResourceRange {
    pub fn tenant_resource(&self) -> TenantResource {
        TenantResource {
            tenant: self.tenant.clone(),
            resource: self.resource.clone(),
        }
    }

    /// The node owning `hash`: the largest boundary less than or equal to it.
    ///
    /// There is no wraparound branch. A hash below the smallest boundary has
    /// no owner; maps built by even splitting always start at `i32::MIN`.
    pub fn owner_of(&self, hash: i32) -> Option<&NodeDescriptor> {
        self.ranges.range(..=hash).next_back().map(|(_, node)| node)
    }
}

// ── Entries ────────────────────────────────────────────────────────

/// A stored entry as written by a proxy to each replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub id: String,
    pub data: serde_json::Value,
    /// Ring position that selected the receiving node.
    pub location_hash: i32,
    /// Write time in epoch milliseconds.
    pub timestamp: u64,
}
