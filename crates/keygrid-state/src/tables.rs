//! redb table definitions for the keygrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Nodes keyed by `{uuid}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Node ranges keyed by `{tenant}/{resource}/{node_uuid}`.
pub const NODE_RANGES: TableDefinition<&str, &[u8]> = TableDefinition::new("node_ranges");
