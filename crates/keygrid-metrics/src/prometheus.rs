//! Prometheus text exposition format.
//!
//! Renders cluster gauges and the watch/cache counters for scraping by a
//! Prometheus server or compatible agent.

use std::fmt::Write;

use keygrid_propagation::WatchStatsSnapshot;
use keygrid_proxy::CacheStatsSnapshot;

use crate::cluster::ClusterSnapshot;

fn metric(out: &mut String, name: &str, kind: &str, help: &str, samples: &[(&str, u64)]) {
    let _ = writeln!(out, "# HELP keygrid_{name} {help}");
    let _ = writeln!(out, "# TYPE keygrid_{name} {kind}");
    for (labels, value) in samples {
        if labels.is_empty() {
            let _ = writeln!(out, "keygrid_{name} {value}");
        } else {
            let _ = writeln!(out, "keygrid_{name}{{{labels}}} {value}");
        }
    }
}

/// Render all snapshots into Prometheus text format.
pub fn render_prometheus(
    cluster: &ClusterSnapshot,
    watch: &WatchStatsSnapshot,
    cache: &CacheStatsSnapshot,
) -> String {
    let mut out = String::new();

    metric(
        &mut out,
        "nodes",
        "gauge",
        "Registered storage nodes by status.",
        &[
            ("status=\"unknown\"", cluster.nodes_unknown),
            ("status=\"disabled\"", cluster.nodes_disabled),
            ("status=\"enabled\"", cluster.nodes_enabled),
            ("status=\"banned\"", cluster.nodes_banned),
        ],
    );
    metric(
        &mut out,
        "tenant_resources",
        "gauge",
        "Tenant resources with at least one node range.",
        &[("", cluster.tenant_resources)],
    );
    metric(
        &mut out,
        "node_ranges",
        "gauge",
        "Node ranges by status.",
        &[
            ("status=\"init\"", cluster.ranges_init),
            ("status=\"active\"", cluster.ranges_active),
            ("status=\"deleting\"", cluster.ranges_deleting),
        ],
    );
    metric(
        &mut out,
        "node_ranges_ready",
        "gauge",
        "Node ranges whose node reported ready.",
        &[("", cluster.ranges_ready)],
    );

    metric(&mut out, "watches_active", "gauge", "Open watches.", &[("", watch.active)]);
    metric(
        &mut out,
        "watches_total",
        "counter",
        "Watch lifecycle transitions.",
        &[("event=\"started\"", watch.started), ("event=\"closed\"", watch.closed)],
    );
    metric(
        &mut out,
        "watch_events_total",
        "counter",
        "Store notifications seen by watch dispatchers.",
        &[
            ("outcome=\"received\"", watch.received),
            ("outcome=\"dispatched\"", watch.dispatched),
            ("outcome=\"dropped\"", watch.dropped),
        ],
    );
    metric(
        &mut out,
        "watch_handlers_total",
        "counter",
        "Handler invocations by result.",
        &[
            ("result=\"ok\"", watch.succeeded),
            ("result=\"error\"", watch.failed),
            ("result=\"abandoned\"", watch.abandoned),
        ],
    );
    metric(
        &mut out,
        "watch_streams_ended_total",
        "counter",
        "Subscriptions ended by the store.",
        &[("", watch.streams_ended)],
    );

    metric(&mut out, "range_cache_entries", "gauge", "Cached tenant range maps.", &[("", cache.entries)]);
    metric(
        &mut out,
        "range_cache_lookups_total",
        "counter",
        "Tenant range cache lookups.",
        &[("result=\"hit\"", cache.hits), ("result=\"miss\"", cache.misses)],
    );
    metric(
        &mut out,
        "range_cache_loads_total",
        "counter",
        "Tenant range maps loaded from the store.",
        &[("", cache.loads)],
    );
    metric(
        &mut out,
        "range_cache_removals_total",
        "counter",
        "Cache entries removed.",
        &[
            ("reason=\"invalidated\"", cache.invalidations),
            ("reason=\"evicted\"", cache.evictions),
        ],
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_watch() -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            active: 2,
            started: 5,
            closed: 3,
            received: 40,
            dispatched: 38,
            succeeded: 36,
            failed: 2,
            dropped: 2,
            abandoned: 0,
            streams_ended: 1,
        }
    }

    fn test_cache() -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            entries: 2,
            hits: 100,
            misses: 4,
            loads: 4,
            invalidations: 1,
            evictions: 1,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(
            &ClusterSnapshot::default(),
            &WatchStatsSnapshot::default(),
            &CacheStatsSnapshot::default(),
        );
        assert!(output.contains("# TYPE keygrid_nodes gauge"));
        assert!(output.contains("keygrid_tenant_resources 0"));
        assert!(output.contains("keygrid_watches_active 0"));
    }

    #[test]
    fn render_counters() {
        let cluster = ClusterSnapshot {
            nodes_enabled: 3,
            ranges_active: 6,
            ..Default::default()
        };
        let output = render_prometheus(&cluster, &test_watch(), &test_cache());

        assert!(output.contains("keygrid_nodes{status=\"enabled\"} 3"));
        assert!(output.contains("keygrid_node_ranges{status=\"active\"} 6"));
        assert!(output.contains("keygrid_watch_events_total{outcome=\"dropped\"} 2"));
        assert!(output.contains("keygrid_watch_handlers_total{result=\"error\"} 2"));
        assert!(output.contains("keygrid_range_cache_lookups_total{result=\"hit\"} 100"));
        assert!(output.contains("keygrid_range_cache_removals_total{reason=\"evicted\"} 1"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&ClusterSnapshot::default(), &test_watch(), &test_cache());
        for line in output.lines() {
            if line.starts_with('#') {
                assert!(line.starts_with("# HELP keygrid_") || line.starts_with("# TYPE keygrid_"));
                continue;
            }
            let (name, value) = line.rsplit_once(' ').unwrap();
            assert!(name.starts_with("keygrid_"), "bad metric name: {line}");
            assert!(value.parse::<u64>().is_ok(), "bad value: {line}");
        }
    }
}
