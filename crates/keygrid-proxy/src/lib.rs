//! keygrid-proxy: routes tenant entries to the nodes that own them.
//!
//! # Components
//!
//! - [`TenantRangeCache`]: published tenant views, each kept fresh by a
//!   watch on its key and evicted on change.
//! - [`NodeRangeResolver`]: ring positions of an entry mapped onto the
//!   owners in the cached view.
//! - [`EntryRouter`]: read from the first replica, write and delete on
//!   all of them, over a [`NodeClient`].

pub mod cache;
pub mod error;
pub mod resolver;
pub mod router;

pub use cache::{CacheStatsSnapshot, DEFAULT_CACHE_CAPACITY, TenantRangeCache};
pub use error::{ProxyError, ProxyResult};
pub use resolver::{DEFAULT_REPLICATION_FACTOR, NodeRangeResolver, Placement, placements};
pub use router::{EntryRouter, NodeClient};
