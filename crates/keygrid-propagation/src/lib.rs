//! keygrid-propagation: publishing partition state through a watchable store.
//!
//! The control plane owns the authoritative rows; this crate projects them
//! into two key layouts of an external key/value store and lets nodes and
//! proxies react to changes.
//!
//! # Key layout
//!
//! | View | Key | Value |
//! |---|---|---|
//! | Node | `node/{uuid}/id/{tenant}/{resource}` | `{"hash": i32, "action"?: "REBALANCE" \| "DELETE"}` |
//! | Tenant | `tenant/{tenant}/{resource}` | `{"<boundary>": {"nodeUuid", "uri", "boundaryHash"}, ...}` |
//!
//! # Components
//!
//! - [`ConfigStore`]: blocking store abstraction with atomic batches and
//!   prefix watches. [`MemoryConfigStore`] is the in-process implementation;
//!   `EtcdConfigStore` is available with the `etcd` feature.
//! - [`PropagationEngine`]: typed reads and writes of both views.
//! - [`WatchRegistry`] / [`WatchEngine`]: turn a store subscription into
//!   `Put`/`Delete` events dispatched to a handler on a bounded worker pool.

pub mod engine;
pub mod error;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;
pub mod store;
pub mod watch;

pub use engine::{
    PropagationEngine, decode_node_entry, node_key, node_prefix, parse_node_key, parse_tenant_key,
    tenant_key,
};
pub use error::{PropagationError, PropagationResult};
#[cfg(feature = "etcd")]
pub use etcd::EtcdConfigStore;
pub use memory::MemoryConfigStore;
pub use store::{CancelGuard, ChangeKind, ChangeNotification, ConfigStore, Subscription};
pub use watch::{
    BoxError, Event, EventKind, HandlerResult, WatchEngine, WatchRegistry, WatchSettings,
    WatchState, WatchStatsSnapshot,
};
