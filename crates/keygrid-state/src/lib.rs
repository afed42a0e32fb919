//! keygrid-state: partition directory model and control-plane persistence.
//!
//! # Architecture
//!
//! The directory model (nodes, node ranges, the node-facing and
//! tenant-facing published views, stored entries) lives in [`types`] and is
//! shared by every other keygrid crate.
//!
//! The control plane's authoritative rows are kept in a
//! [redb](https://docs.rs/redb) database. Values are JSON in `&[u8]`
//! columns; node ranges use the composite key
//! `{tenant}/{resource}/{node_uuid}` so one tenant resource is a prefix scan.
//! Every multi-row change (batch create, set-ready with sibling check,
//! mark-deleting) is a single write transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{RangeInsert, ReadyUpdate, StateStore};
pub use types::*;
