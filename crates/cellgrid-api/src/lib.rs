//! cellgrid-api — REST API for cellgrid.
//!
//! Management surface for cells, tenants, the routing table and
//! staggered deployments. Mounts the tenant router's diagnostics edge
//! under `/edge/`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/cells` | List cells |
//! | POST | `/api/v1/cells` | Request a cell |
//! | GET | `/api/v1/cells/{id}` | Get cell details |
//! | GET | `/api/v1/cells/{id}/tenants` | List tenants in a cell |
//! | POST | `/api/v1/cells/{id}/tenants` | Assign a tenant to a cell |
//! | GET | `/api/v1/capacity` | Capacity report |
//! | GET | `/api/v1/tenants` | List tenants |
//! | GET | `/api/v1/tenants/{id}` | Get tenant details |
//! | POST | `/api/v1/tenants/{id}/activate` | Add the tenant to the routing table |
//! | POST | `/api/v1/tenants/{id}/deactivate` | Remove the tenant from the routing table |
//! | POST | `/api/v1/events` | Ingest a provisioning lifecycle event |
//! | GET | `/api/v1/routes` | Routing table snapshot |
//! | GET | `/api/v1/rollouts` | List deployment runs |
//! | POST | `/api/v1/rollouts` | Start a deployment run |
//! | GET | `/api/v1/rollouts/{id}` | Get run status |
//! | GET | `/api/v1/rollouts/{id}/report` | Run report |
//! | POST | `/api/v1/rollouts/{id}/approve` | Approve the gated wave |
//! | POST | `/api/v1/rollouts/{id}/reject` | Reject the gated wave |
//! | ANY | `/edge/{*path}` | Routing decision for a request |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod rollout_handlers;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cellgrid_rollout::{Lifecycle, Orchestrator, Scheduler};
use cellgrid_router::{RouteSync, TenantRouter};
use cellgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub routes: RouteSync,
    pub lifecycle: Arc<Lifecycle>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Scheduler,
}

/// Build the complete API router (REST + routing diagnostics + liveness).
pub fn build_router(state: ApiState, tenant_router: Arc<TenantRouter>) -> Router {
    let api_routes = Router::new()
        .route("/cells", get(handlers::list_cells).post(handlers::create_cell))
        .route("/cells/{id}", get(handlers::get_cell))
        .route(
            "/cells/{id}/tenants",
            get(handlers::list_cell_tenants).post(handlers::assign_tenant),
        )
        .route("/capacity", get(handlers::capacity_report))
        .route("/tenants", get(handlers::list_tenants))
        .route("/tenants/{id}", get(handlers::get_tenant))
        .route("/tenants/{id}/activate", post(handlers::activate_tenant))
        .route("/tenants/{id}/deactivate", post(handlers::deactivate_tenant))
        .route("/events", post(handlers::ingest_event))
        .route("/routes", get(handlers::route_snapshot))
        .route(
            "/rollouts",
            get(rollout_handlers::list_rollouts).post(rollout_handlers::start_rollout),
        )
        .route("/rollouts/{id}", get(rollout_handlers::get_rollout))
        .route("/rollouts/{id}/report", get(rollout_handlers::get_report))
        .route("/rollouts/{id}/approve", post(rollout_handlers::approve_rollout))
        .route("/rollouts/{id}/reject", post(rollout_handlers::reject_rollout))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/edge", cellgrid_router::middleware::decision_router(tenant_router))
        .route("/healthz", get(handlers::healthz))
}
