//! Control-plane handlers: nodes, readiness, tenant resources, metrics.
//!
//! Each handler calls the node or partition manager and returns the
//! JSON envelope from [`crate::response`].

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::warn;

use keygrid_state::TableVersion;

use crate::ApiState;
use crate::response::{ApiResponse, control_error, error_response};

// ── Nodes ──────────────────────────────────────────────────────

/// Register request body.
#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub host: String,
    pub port: u16,
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.nodes.list() {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => control_error(&e),
    }
}

/// PUT /api/v1/nodes/{uuid}
pub async fn register_node(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
    Json(req): Json<RegisterNodeRequest>,
) -> impl IntoResponse {
    match state.nodes.register(&uuid, &req.host, req.port) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => control_error(&e),
    }
}

/// GET /api/v1/nodes/{uuid}
pub async fn get_node(State(state): State<ApiState>, Path(uuid): Path<String>) -> impl IntoResponse {
    match state.nodes.get(&uuid) {
        Ok(Some(node)) => ApiResponse::ok(node).into_response(),
        Ok(None) => error_response("node not found", StatusCode::NOT_FOUND),
        Err(e) => control_error(&e),
    }
}

/// PUT /api/v1/nodes/{uuid}/enable
pub async fn enable_node(State(state): State<ApiState>, Path(uuid): Path<String>) -> impl IntoResponse {
    match state.nodes.enable(&uuid) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => control_error(&e),
    }
}

/// PUT /api/v1/nodes/{uuid}/disable
pub async fn disable_node(State(state): State<ApiState>, Path(uuid): Path<String>) -> impl IntoResponse {
    match state.nodes.disable(&uuid) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => control_error(&e),
    }
}

/// PUT /api/v1/nodes/{uuid}/ban
pub async fn ban_node(State(state): State<ApiState>, Path(uuid): Path<String>) -> impl IntoResponse {
    match state.nodes.ban(&uuid) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => control_error(&e),
    }
}

/// GET /api/v1/nodes/{uuid}/ranges
pub async fn list_node_ranges(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    match state.partitions.list_node_ranges_for_node(&uuid) {
        Ok(ranges) => ApiResponse::ok(ranges).into_response(),
        Err(e) => control_error(&e),
    }
}

// ── Node callbacks ─────────────────────────────────────────────

/// Readiness report body.
#[derive(Debug, Deserialize)]
pub struct ReadyRequest {
    pub ready: bool,
}

/// PUT /api/v1/nodes/{uuid}/tenants/{tenant}/resources/{resource}/ready
pub async fn set_ready(
    State(state): State<ApiState>,
    Path((uuid, tenant, resource)): Path<(String, String, String)>,
    Json(req): Json<ReadyRequest>,
) -> impl IntoResponse {
    match state.partitions.set_ready(&uuid, &tenant, &resource, req.ready) {
        Ok(range) => ApiResponse::ok(range).into_response(),
        Err(e) => control_error(&e),
    }
}

/// DELETE /api/v1/nodes/{uuid}/tenants/{tenant}/resources/{resource}
pub async fn finalize_delete(
    State(state): State<ApiState>,
    Path((uuid, tenant, resource)): Path<(String, String, String)>,
) -> impl IntoResponse {
    match state.partitions.finalize_delete(&uuid, &tenant, &resource) {
        Ok(()) => ApiResponse::ok("finalized").into_response(),
        Err(e) => control_error(&e),
    }
}

// ── Tenant resources ───────────────────────────────────────────

/// GET /api/v1/tenants
pub async fn list_tenant_resources(State(state): State<ApiState>) -> impl IntoResponse {
    match state.partitions.list_tenant_resources() {
        Ok(ids) => {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            ApiResponse::ok(ids).into_response()
        }
        Err(e) => control_error(&e),
    }
}

/// PUT /api/v1/tenants/{tenant}/resources/{resource}
pub async fn create_tenant_resource(
    State(state): State<ApiState>,
    Path((tenant, resource)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .partitions
        .create_tenant_resource(&tenant, &resource, TableVersion::default())
    {
        Ok(ranges) => ApiResponse::ok(ranges).into_response(),
        Err(e) => control_error(&e),
    }
}

/// GET /api/v1/tenants/{tenant}/resources/{resource}
pub async fn get_tenant_resource(
    State(state): State<ApiState>,
    Path((tenant, resource)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.partitions.list_tenant_resource(&tenant, &resource) {
        Ok(ranges) => ApiResponse::ok(ranges).into_response(),
        Err(e) => control_error(&e),
    }
}

/// DELETE /api/v1/tenants/{tenant}/resources/{resource}
pub async fn delete_tenant_resource(
    State(state): State<ApiState>,
    Path((tenant, resource)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.partitions.delete_tenant_resource(&tenant, &resource) {
        Ok(ranges) => ApiResponse::ok(ranges).into_response(),
        Err(e) => control_error(&e),
    }
}

/// POST /api/v1/tenants/{tenant}/resources/{resource}/rebalance
pub async fn rebalance_tenant_resource(
    State(state): State<ApiState>,
    Path((tenant, resource)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.partitions.rebalance_tenant_resource(&tenant, &resource) {
        Ok(range) => (StatusCode::CREATED, ApiResponse::ok(range)).into_response(),
        Err(e) => control_error(&e),
    }
}

/// POST /api/v1/tenants/{tenant}/resources/{resource}/republish
pub async fn republish_tenant_resource(
    State(state): State<ApiState>,
    Path((tenant, resource)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.partitions.republish(&tenant, &resource) {
        Ok(()) => ApiResponse::ok("republished").into_response(),
        Err(e) => control_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let cluster = keygrid_metrics::collect_cluster(&state.store).unwrap_or_else(|e| {
        warn!(error = %e, "failed to collect cluster gauges");
        Default::default()
    });
    let body = keygrid_metrics::render_prometheus(
        &cluster,
        &state.registry.stats(),
        &state.resolver.cache().stats(),
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use keygrid_control::{NodeManager, PartitionManager};
    use keygrid_propagation::{MemoryConfigStore, PropagationEngine, WatchRegistry, WatchSettings};
    use keygrid_proxy::{NodeRangeResolver, TenantRangeCache};
    use keygrid_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let config = MemoryConfigStore::new();
        let engine = PropagationEngine::new(Arc::new(config.clone()));
        let registry = WatchRegistry::new(Arc::new(config), WatchSettings::default()).unwrap();
        ApiState {
            nodes: NodeManager::new(store.clone()),
            partitions: PartitionManager::new(store.clone(), engine.clone()),
            resolver: NodeRangeResolver::new(TenantRangeCache::new(engine, registry.clone())),
            registry,
            store,
        }
    }

    fn enabled_nodes(state: &ApiState, uuids: &[&str]) {
        for uuid in uuids {
            state.nodes.register(uuid, "10.0.0.1", 9000).unwrap();
            state.nodes.enable(uuid).unwrap();
        }
    }

    fn tr(tenant: &str, resource: &str) -> Path<(String, String)> {
        Path((tenant.to_string(), resource.to_string()))
    }

    #[tokio::test]
    async fn list_nodes_empty() {
        let resp = list_nodes(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_get_node() {
        let state = test_state();
        let req = RegisterNodeRequest {
            host: "10.0.0.9".to_string(),
            port: 9000,
        };
        let resp = register_node(State(state.clone()), Path("a".to_string()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_node(State(state), Path("a".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_node_is_not_found() {
        let resp = get_node(State(test_state()), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn enabling_banned_node_conflicts() {
        let state = test_state();
        enabled_nodes(&state, &["a"]);
        state.nodes.ban("a").unwrap();
        let resp = enable_node(State(state), Path("a".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_without_nodes_is_server_error() {
        let resp = create_tenant_resource(State(test_state()), tr("t1", "orders"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn create_then_list_tenant_resource() {
        let state = test_state();
        enabled_nodes(&state, &["a", "b"]);
        let resp = create_tenant_resource(State(state.clone()), tr("t1", "orders"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_tenant_resource(State(state.clone()), tr("t1", "orders"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_tenant_resource(State(state), tr("t1", "missing"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_identifier_is_bad_request() {
        let state = test_state();
        enabled_nodes(&state, &["a", "b"]);
        let resp = create_tenant_resource(State(state), tr("t1", ""))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn finalize_on_live_range_conflicts() {
        let state = test_state();
        enabled_nodes(&state, &["a", "b"]);
        state
            .partitions
            .create_tenant_resource("t1", "orders", TableVersion::default())
            .unwrap();
        let path = Path(("a".to_string(), "t1".to_string(), "orders".to_string()));
        let resp = finalize_delete(State(state), path).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn set_ready_for_unknown_range_is_not_found() {
        let path = Path(("a".to_string(), "t1".to_string(), "orders".to_string()));
        let resp = set_ready(State(test_state()), path, Json(ReadyRequest { ready: true }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
