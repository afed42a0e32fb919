//! keygrid-node: the storage node's side of partition propagation.
//!
//! A node watches its own view (`node/{uuid}/id/`), provisions or retires
//! local tenant tables as assignments arrive, and reports back to the
//! control plane.
//!
//! # Components
//!
//! - [`RangeWatcher`]: applies Assign/Rebalance/Delete actions and runs the
//!   periodic tombstone reaper.
//! - [`TenantStorage`]: local tables, one per tenant resource;
//!   [`MemoryTenantStorage`] keeps them in process.
//! - [`ControlPlane`]: the calls a node makes back to the control plane,
//!   implemented directly by `PartitionManager` for single-process setups.
//! - [`LocalNodeClient`]: lets a proxy reach in-process node storages.

pub mod control;
pub mod error;
pub mod local;
pub mod storage;
pub mod watcher;

pub use control::ControlPlane;
pub use error::{NodeError, NodeResult};
pub use local::LocalNodeClient;
pub use storage::{MemoryTenantStorage, TenantStorage, TenantTable};
pub use watcher::RangeWatcher;
