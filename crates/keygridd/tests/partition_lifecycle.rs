//! Partition lifecycle tests.
//!
//! Runs control plane, propagation, node watchers and the routing proxy
//! together against the in-memory configuration store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use keygrid_api::{ApiState, build_router};
use keygrid_control::{NodeManager, PartitionManager};
use keygrid_node::{LocalNodeClient, MemoryTenantStorage, RangeWatcher, TenantStorage};
use keygrid_propagation::{
    ConfigStore, MemoryConfigStore, PropagationEngine, WatchRegistry, WatchSettings, node_key,
};
use keygrid_proxy::{EntryRouter, NodeRangeResolver, ProxyError, TenantRangeCache};
use keygrid_ring::{RING_SIZE, hash_key, segments};
use keygrid_state::{RangeStatus, StateStore, TableVersion};

struct Harness {
    state: StateStore,
    store: MemoryConfigStore,
    engine: PropagationEngine,
    registry: WatchRegistry,
    nodes: NodeManager,
    partitions: PartitionManager,
    resolver: NodeRangeResolver,
}

fn harness_with_state(state: StateStore, node_uuids: &[&str]) -> Harness {
    let store = MemoryConfigStore::new();
    let engine = PropagationEngine::new(Arc::new(store.clone()));
    let registry = WatchRegistry::new(Arc::new(store.clone()), WatchSettings::default()).unwrap();
    let nodes = NodeManager::new(state.clone());
    for (i, uuid) in node_uuids.iter().enumerate() {
        nodes.register(uuid, &format!("10.0.0.{}", i + 1), 9000).unwrap();
        nodes.enable(uuid).unwrap();
    }
    let partitions = PartitionManager::new(state.clone(), engine.clone());
    let resolver = NodeRangeResolver::new(TenantRangeCache::new(engine.clone(), registry.clone()));
    Harness {
        state,
        store,
        engine,
        registry,
        nodes,
        partitions,
        resolver,
    }
}

fn harness(node_uuids: &[&str]) -> Harness {
    harness_with_state(StateStore::open_in_memory().unwrap(), node_uuids)
}

impl Harness {
    fn tenant_view_present(&self, tenant: &str, resource: &str) -> bool {
        self.engine
            .read_tenant_resource_range(tenant, resource)
            .unwrap()
            .is_some()
    }

    fn start_node(&self, uuid: &str) -> (Arc<MemoryTenantStorage>, RangeWatcher) {
        let storage = Arc::new(MemoryTenantStorage::new());
        let watcher = RangeWatcher::new(
            uuid,
            self.engine.clone(),
            self.registry.clone(),
            storage.clone(),
            Arc::new(self.partitions.clone()),
        );
        watcher.start().unwrap();
        (storage, watcher)
    }

    fn api_state(&self) -> ApiState {
        ApiState {
            store: self.state.clone(),
            nodes: self.nodes.clone(),
            partitions: self.partitions.clone(),
            resolver: self.resolver.clone(),
            registry: self.registry.clone(),
        }
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Partition directory ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn orders_scenario_publishes_after_last_ready() {
    let h = harness(&["A", "B"]);

    let ranges = h
        .partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    let boundaries: Vec<(i32, &str, bool)> = ranges
        .iter()
        .map(|r| (r.hash, r.node_uuid.as_str(), r.ready))
        .collect();
    assert_eq!(boundaries, vec![(i32::MIN, "A", false), (0, "B", false)]);
    assert!(!h.tenant_view_present("t1", "orders"));

    h.partitions.set_ready("A", "t1", "orders", true).unwrap();
    assert!(!h.tenant_view_present("t1", "orders"));

    h.partitions.set_ready("B", "t1", "orders", true).unwrap();
    let view = h
        .engine
        .read_tenant_resource_range("t1", "orders")
        .unwrap()
        .unwrap();
    assert_eq!(view.ranges.len(), 2);
    assert_eq!(view.ranges[&i32::MIN].node_uuid, "A");
    assert_eq!(view.ranges[&0].node_uuid, "B");
    assert!(
        h.partitions
            .list_tenant_resource("t1", "orders")
            .unwrap()
            .iter()
            .all(|r| r.status == RangeStatus::Active)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boundaries_cover_the_ring_after_rebalances() {
    let h = harness(&["a", "b", "c", "d", "e"]);
    h.partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    for _ in 0..3 {
        h.partitions.rebalance_tenant_resource("t1", "orders").unwrap();
    }

    let hashes: Vec<i32> = h
        .partitions
        .list_tenant_resource("t1", "orders")
        .unwrap()
        .iter()
        .map(|r| r.hash)
        .collect();
    assert_eq!(hashes.len(), 5);
    let segs = segments(&hashes);
    assert_eq!(segs.len(), 5);
    assert_eq!(segs.iter().map(|s| s.width).sum::<u64>(), RING_SIZE);
    for pair in segs.windows(2) {
        assert_eq!(pair[0].end_inclusive().wrapping_add(1), pair[1].start);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_create_writes_nothing() {
    let h = harness(&["a", "b"]);
    let puts = Arc::new(AtomicUsize::new(0));
    let counter = puts.clone();
    let _watch = h
        .registry
        .watch("node/", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let first = h
        .partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    wait_until("node view events", || puts.load(Ordering::SeqCst) == 2).await;

    let second = h
        .partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    assert_eq!(first, second);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(puts.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finalize_for_missing_range_clears_key() {
    let h = harness(&[]);
    h.store
        .put(&node_key("a", "t1", "orders"), r#"{"hash":0,"action":"DELETE"}"#)
        .unwrap();

    h.partitions.finalize_delete("a", "t1", "orders").unwrap();
    assert!(h.store.get(&node_key("a", "t1", "orders")).unwrap().is_none());
    h.partitions.finalize_delete("a", "t1", "orders").unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn republish_rebuilds_lost_views_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keygrid.redb");

    {
        let h = harness_with_state(StateStore::open(&path).unwrap(), &["a", "b"]);
        h.partitions
            .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
            .unwrap();
        h.partitions.set_ready("a", "t1", "orders", true).unwrap();
        h.partitions.set_ready("b", "t1", "orders", true).unwrap();
        h.partitions
            .create_tenant_resource("t1", "users", TableVersion::V1SingleEntry)
            .unwrap();
    }

    // Fresh configuration store: every published key is gone.
    let h = harness_with_state(StateStore::open(&path).unwrap(), &[]);
    assert!(h.store.is_empty());

    assert_eq!(h.partitions.republish_all().unwrap(), 2);
    assert!(h.tenant_view_present("t1", "orders"));
    assert!(!h.tenant_view_present("t1", "users"));
    assert_eq!(h.engine.read_node_resources("a").unwrap().len(), 2);
}

// ── Routing ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_replica_resolves_to_owner_of_entry_hash() {
    let h = harness(&["A", "B"]);
    h.partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    h.partitions.set_ready("A", "t1", "orders", true).unwrap();
    h.partitions.set_ready("B", "t1", "orders", true).unwrap();

    let resolver = h.resolver.clone().with_replication_factor(1);
    let placements = resolver.resolve("t1", "orders", "order-42").unwrap();
    let expected = if hash_key("order-42") >= 0 { "B" } else { "A" };
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].node.node_uuid, expected);

    assert_eq!(placements, resolver.resolve("t1", "orders", "order-42").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolve_follows_tenant_view_changes() {
    let h = harness(&["a", "b", "c"]);
    h.partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    h.partitions.set_ready("a", "t1", "orders", true).unwrap();
    h.partitions.set_ready("b", "t1", "orders", true).unwrap();

    let before = h.resolver.resolve("t1", "orders", "k").unwrap();
    assert!(before.iter().all(|p| p.node.node_uuid != "c"));

    let added = h.partitions.rebalance_tenant_resource("t1", "orders").unwrap();
    h.partitions.set_ready(&added.node_uuid, "t1", "orders", true).unwrap();

    // Some entry key must now route to the new node.
    let resolver = h.resolver.clone().with_replication_factor(1);
    wait_until("new mapping", || {
        resolver
            .cache()
            .get("t1", "orders")
            .map(|view| view.ranges.len() == 3)
            .unwrap_or(false)
    })
    .await;
    let routed_to_c = (0..200).any(|i| {
        resolver.resolve("t1", "orders", &format!("key-{i}")).unwrap()[0]
            .node
            .node_uuid
            == "c"
    });
    assert!(routed_to_c);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unpublished_resource_is_not_routable() {
    let h = harness(&["a", "b"]);
    h.partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    h.partitions.set_ready("a", "t1", "orders", true).unwrap();
    assert!(matches!(
        h.resolver.resolve("t1", "orders", "k"),
        Err(ProxyError::NotFound(_))
    ));
}

// ── Nodes end to end ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entries_flow_through_watching_nodes() {
    let h = harness(&["a", "b"]);
    let (storage_a, watcher_a) = h.start_node("a");
    let (storage_b, watcher_b) = h.start_node("b");
    let client = Arc::new(LocalNodeClient::new());
    client.register("a", storage_a.clone());
    client.register("b", storage_b.clone());
    let router = EntryRouter::new(h.resolver.clone(), client);

    h.partitions
        .create_tenant_resource("t1", "orders", TableVersion::V1SingleEntry)
        .unwrap();
    wait_until("routable", || h.tenant_view_present("t1", "orders")).await;

    let placements = router
        .put_entry("t1", "orders", "order-42", serde_json::json!({"qty": 2}))
        .unwrap();
    assert!(!placements.is_empty());
    let stored = router.get_entry("t1", "orders", "order-42").unwrap().unwrap();
    assert_eq!(stored.data["qty"], 2);

    h.partitions.delete_tenant_resource("t1", "orders").unwrap();
    wait_until("nodes cleaned up", || {
        storage_a.tables().unwrap().is_empty()
            && storage_b.tables().unwrap().is_empty()
            && h.partitions.list_tenant_resources().unwrap().is_empty()
    })
    .await;
    wait_until("route withdrawn", || {
        matches!(
            h.resolver.resolve("t1", "orders", "order-42"),
            Err(ProxyError::NotFound(_))
        )
    })
    .await;

    assert!(watcher_a.stop());
    assert!(watcher_b.stop());
}

// ── API ────────────────────────────────────────────────────────

async fn call(router: &axum::Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> StatusCode {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(req).await.unwrap().status()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_drives_full_lifecycle() {
    let h = harness(&[]);
    let router = build_router(h.api_state());
    let node = serde_json::json!({"host": "10.0.0.1", "port": 9000});

    for uuid in ["a", "b"] {
        assert_eq!(call(&router, "PUT", &format!("/api/v1/nodes/{uuid}"), Some(node.clone())).await, StatusCode::OK);
        assert_eq!(call(&router, "PUT", &format!("/api/v1/nodes/{uuid}/enable"), None).await, StatusCode::OK);
    }

    let resource = "/api/v1/tenants/t1/resources/orders";
    assert_eq!(call(&router, "PUT", resource, None).await, StatusCode::OK);
    assert_eq!(call(&router, "GET", "/api/v1/routes/t1/orders/order-42", None).await, StatusCode::NOT_FOUND);

    let ready = serde_json::json!({"ready": true});
    for uuid in ["a", "b"] {
        let uri = format!("/api/v1/nodes/{uuid}/tenants/t1/resources/orders/ready");
        assert_eq!(call(&router, "PUT", &uri, Some(ready.clone())).await, StatusCode::OK);
    }
    assert_eq!(call(&router, "GET", "/api/v1/routes/t1/orders/order-42", None).await, StatusCode::OK);

    assert_eq!(
        call(&router, "POST", &format!("{resource}/rebalance"), None).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    assert_eq!(call(&router, "DELETE", resource, None).await, StatusCode::OK);
    for uuid in ["a", "b"] {
        let uri = format!("/api/v1/nodes/{uuid}/tenants/t1/resources/orders");
        assert_eq!(call(&router, "DELETE", &uri, None).await, StatusCode::OK);
    }
    assert_eq!(call(&router, "GET", resource, None).await, StatusCode::NOT_FOUND);
    assert_eq!(call(&router, "GET", "/metrics", None).await, StatusCode::OK);
}
