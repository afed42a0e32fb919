//! keygrid-metrics: observability for a keygrid deployment.
//!
//! # Architecture
//!
//! ```text
//! StateStore ──► collect_cluster() ──► ClusterSnapshot
//! WatchRegistry::stats() ─────────────► WatchStatsSnapshot
//! TenantRangeCache::stats() ──────────► CacheStatsSnapshot
//!                                            │
//!                     render_prometheus() ◄──┘  text/plain for /metrics
//! ```

pub mod cluster;
pub mod prometheus;

pub use cluster::{ClusterSnapshot, collect_cluster};
pub use prometheus::render_prometheus;
