//! Response envelope and error-to-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use keygrid_control::ControlError;
use keygrid_propagation::PropagationError;
use keygrid_proxy::ProxyError;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub struct ApiResponse<T: serde::Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> Response {
    if status.is_server_error() {
        warn!(status = status.as_u16(), error = %msg, "request failed");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub fn propagation_status(e: &PropagationError) -> StatusCode {
    match e {
        PropagationError::Unavailable(_) | PropagationError::Watch(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn control_status(e: &ControlError) -> StatusCode {
    match e {
        ControlError::NotFound(_) => StatusCode::NOT_FOUND,
        ControlError::BannedNode(_) | ControlError::InvalidState(_) => StatusCode::CONFLICT,
        ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ControlError::NotEnoughNodes { .. } | ControlError::Ring(_) | ControlError::State(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ControlError::Propagation(e) => propagation_status(e),
    }
}

pub fn proxy_status(e: &ProxyError) -> StatusCode {
    match e {
        ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
        ProxyError::Node { .. } => StatusCode::BAD_GATEWAY,
        ProxyError::Unroutable { .. } | ProxyError::Ring(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ProxyError::Propagation(e) => propagation_status(e),
    }
}

pub fn control_error(e: &ControlError) -> Response {
    error_response(&e.to_string(), control_status(e))
}

pub fn proxy_error(e: &ProxyError) -> Response {
    error_response(&e.to_string(), proxy_status(e))
}
