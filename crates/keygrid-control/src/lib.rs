//! keygrid-control: the partition authority.
//!
//! The control plane owns node records and node ranges in the state store
//! and publishes them through the propagation engine.
//!
//! # Components
//!
//! - [`NodeManager`]: registration, enable/disable/ban, status.
//! - [`availability`]: deterministic selection of nodes for new ranges.
//! - [`PartitionManager`]: create/ready/rebalance/delete lifecycle of
//!   tenant resources and self-healing republication.

pub mod availability;
pub mod error;
pub mod nodes;
pub mod partition;

pub use availability::{Candidate, rank_candidates, select_nodes};
pub use error::{ControlError, ControlResult};
pub use nodes::NodeManager;
pub use partition::{DEFAULT_CLUSTER_SIZE, PartitionManager};
