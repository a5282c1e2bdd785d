//! REST API handlers for cells, tenants and the routing table.
//!
//! Each handler reads/writes via `StateStore` (directly or through the
//! lifecycle and route-sync layers) and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use cellgrid_rollout::{LifecycleError, LifecycleEvent};
use cellgrid_router::ActivationError;
use cellgrid_state::{SizeClass, StateError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
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

pub(crate) fn state_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn lifecycle_error(e: &LifecycleError) -> Response {
    match e {
        LifecycleError::InvalidRequest(_) | LifecycleError::InvalidEvent(_) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST)
        }
        LifecycleError::State(inner) => state_error(inner),
    }
}

fn activation_error(e: &ActivationError) -> Response {
    let status = match e {
        ActivationError::TenantNotFound(_) | ActivationError::CellNotFound(_) => StatusCode::NOT_FOUND,
        ActivationError::CellUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ActivationError::TenantNotReady { .. } | ActivationError::MissingCellUrl(_) => {
            StatusCode::CONFLICT
        }
        ActivationError::InvalidCellUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ActivationError::State(inner) => return state_error(inner),
    };
    error_response(&e.to_string(), status)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Cells ──────────────────────────────────────────────────────

/// Cell creation request body.
#[derive(Deserialize)]
pub struct CreateCellRequest {
    pub cell_name: String,
    pub size_class: SizeClass,
    pub wave_number: u32,
}

/// GET /api/v1/cells
pub async fn list_cells(State(state): State<ApiState>) -> Response {
    match state.store.list_cells() {
        Ok(cells) => ApiResponse::ok(cells).into_response(),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/cells
pub async fn create_cell(
    State(state): State<ApiState>,
    Json(req): Json<CreateCellRequest>,
) -> Response {
    match state
        .lifecycle
        .create_cell(&req.cell_name, req.size_class, req.wave_number)
    {
        Ok(cell) => {
            state.lifecycle.spawn_cell_creation(cell.clone());
            (StatusCode::ACCEPTED, ApiResponse::ok(cell)).into_response()
        }
        Err(e) => lifecycle_error(&e),
    }
}

/// GET /api/v1/cells/{id}
pub async fn get_cell(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_cell(&id) {
        Ok(Some(cell)) => ApiResponse::ok(cell).into_response(),
        Ok(None) => error_response("cell not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/cells/{id}/tenants
pub async fn list_cell_tenants(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_cell(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("cell not found", StatusCode::NOT_FOUND),
        Err(e) => return state_error(&e),
    }
    match state.store.list_tenants_for_cell(&id) {
        Ok(tenants) => ApiResponse::ok(tenants).into_response(),
        Err(e) => state_error(&e),
    }
}

/// Tenant assignment request body.
#[derive(Deserialize)]
pub struct AssignTenantRequest {
    pub tenant_name: String,
    pub tier: String,
    pub email: String,
}

/// POST /api/v1/cells/{id}/tenants
pub async fn assign_tenant(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AssignTenantRequest>,
) -> Response {
    match state
        .lifecycle
        .assign_tenant(&id, &req.tenant_name, &req.tier, &req.email)
    {
        Ok((cell, tenant)) => {
            state.lifecycle.spawn_tenant_creation(tenant.clone(), cell);
            (StatusCode::ACCEPTED, ApiResponse::ok(tenant)).into_response()
        }
        // Unavailable or full cells are a capacity condition, not a
        // client conflict.
        Err(LifecycleError::State(StateError::Conflict(msg))) => {
            warn!(cell = %id, reason = %msg, "tenant assignment refused");
            error_response(&msg, StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => lifecycle_error(&e),
    }
}

/// GET /api/v1/capacity
pub async fn capacity_report(State(state): State<ApiState>) -> Response {
    match state.lifecycle.capacity_report() {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

// ── Tenants ────────────────────────────────────────────────────

/// GET /api/v1/tenants
pub async fn list_tenants(State(state): State<ApiState>) -> Response {
    match state.store.list_tenants() {
        Ok(tenants) => ApiResponse::ok(tenants).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/tenants/{id}
pub async fn get_tenant(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_tenant(&id) {
        Ok(Some(tenant)) => ApiResponse::ok(tenant).into_response(),
        Ok(None) => error_response("tenant not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/tenants/{id}/activate
pub async fn activate_tenant(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.routes.activate(&id) {
        Ok(activation) => ApiResponse::ok(serde_json::json!({
            "tenant": activation.tenant,
            "cell_url": activation.cell_url,
        }))
        .into_response(),
        Err(e) => activation_error(&e),
    }
}

/// POST /api/v1/tenants/{id}/deactivate
pub async fn deactivate_tenant(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.routes.deactivate(&id) {
        Ok(tenant) => ApiResponse::ok(tenant).into_response(),
        Err(e) => activation_error(&e),
    }
}

// ── Events & routes ────────────────────────────────────────────

/// POST /api/v1/events
pub async fn ingest_event(
    State(state): State<ApiState>,
    Json(event): Json<LifecycleEvent>,
) -> Response {
    match state.lifecycle.apply(&event) {
        Ok(()) => ApiResponse::ok(event).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// GET /api/v1/routes
pub async fn route_snapshot(State(state): State<ApiState>) -> Response {
    match state.routes.snapshot() {
        Ok(routes) => ApiResponse::ok(routes).into_response(),
        Err(e) => state_error(&e),
    }
}
