//! Proxy handlers: which nodes serve an entry.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Serialize;

use keygrid_proxy::Placement;

use crate::ApiState;
use crate::response::{ApiResponse, proxy_error};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub tenant: String,
    pub resource: String,
    pub entry: String,
    pub replication_factor: usize,
    pub placements: Vec<Placement>,
}

/// GET /api/v1/routes/{tenant}/{resource}/{entry}
pub async fn resolve_entry(
    State(state): State<ApiState>,
    Path((tenant, resource, entry)): Path<(String, String, String)>,
) -> impl IntoResponse {
    match state.resolver.resolve(&tenant, &resource, &entry) {
        Ok(placements) => ApiResponse::ok(RouteResponse {
            replication_factor: state.resolver.replication_factor(),
            tenant,
            resource,
            entry,
            placements,
        })
        .into_response(),
        Err(e) => proxy_error(&e),
    }
}
