//! keygrid-api: REST API for keygrid.
//!
//! Control-plane operations on nodes and tenant resources, the proxy's
//! placement lookup, and Prometheus metrics.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/nodes` | List nodes |
//! | PUT | `/api/v1/nodes/{uuid}` | Register a node |
//! | GET | `/api/v1/nodes/{uuid}` | Get a node and its status |
//! | PUT | `/api/v1/nodes/{uuid}/enable` | Enable a node |
//! | PUT | `/api/v1/nodes/{uuid}/disable` | Disable a node |
//! | PUT | `/api/v1/nodes/{uuid}/ban` | Ban a node |
//! | GET | `/api/v1/nodes/{uuid}/ranges` | Ranges assigned to a node |
//! | PUT | `/api/v1/nodes/{uuid}/tenants/{tenant}/resources/{resource}/ready` | Report readiness |
//! | DELETE | `/api/v1/nodes/{uuid}/tenants/{tenant}/resources/{resource}` | Finalize a delete |
//! | GET | `/api/v1/tenants` | List tenant resources |
//! | PUT | `/api/v1/tenants/{tenant}/resources/{resource}` | Create a tenant resource |
//! | GET | `/api/v1/tenants/{tenant}/resources/{resource}` | List its node ranges |
//! | DELETE | `/api/v1/tenants/{tenant}/resources/{resource}` | Delete a tenant resource |
//! | POST | `/api/v1/tenants/{tenant}/resources/{resource}/rebalance` | Add a node |
//! | POST | `/api/v1/tenants/{tenant}/resources/{resource}/republish` | Rebuild published views |
//! | GET | `/api/v1/routes/{tenant}/{resource}/{entry}` | Resolve placements |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod response;
pub mod route_handlers;

use axum::Router;
use axum::routing::{get, post, put};

use keygrid_control::{NodeManager, PartitionManager};
use keygrid_propagation::WatchRegistry;
use keygrid_proxy::NodeRangeResolver;
use keygrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub nodes: NodeManager,
    pub partitions: PartitionManager,
    pub resolver: NodeRangeResolver,
    pub registry: WatchRegistry,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/{uuid}", get(handlers::get_node).put(handlers::register_node))
        .route("/nodes/{uuid}/enable", put(handlers::enable_node))
        .route("/nodes/{uuid}/disable", put(handlers::disable_node))
        .route("/nodes/{uuid}/ban", put(handlers::ban_node))
        .route("/nodes/{uuid}/ranges", get(handlers::list_node_ranges))
        .route(
            "/nodes/{uuid}/tenants/{tenant}/resources/{resource}/ready",
            put(handlers::set_ready),
        )
        .route(
            "/nodes/{uuid}/tenants/{tenant}/resources/{resource}",
            axum::routing::delete(handlers::finalize_delete),
        )
        .route("/tenants", get(handlers::list_tenant_resources))
        .route(
            "/tenants/{tenant}/resources/{resource}",
            get(handlers::get_tenant_resource)
                .put(handlers::create_tenant_resource)
                .delete(handlers::delete_tenant_resource),
        )
        .route(
            "/tenants/{tenant}/resources/{resource}/rebalance",
            post(handlers::rebalance_tenant_resource),
        )
        .route(
            "/tenants/{tenant}/resources/{resource}/republish",
            post(handlers::republish_tenant_resource),
        )
        .route("/routes/{tenant}/{resource}/{entry}", get(route_handlers::resolve_entry))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
