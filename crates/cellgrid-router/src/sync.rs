//! Mapping table synchronization — the write side of tenant routing.
//!
//! `RouteSync` is the only writer of the routing table. Activation binds
//! a tenant to its cell's URL, deactivation removes the binding. Neither
//! destroys the tenant record.

use std::collections::BTreeMap;

use cell_core::{CellEndpoint, CellStatus, EndpointError, TenantStatus};
use cellgrid_state::{StateError, StateStore, TenantRecord};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("tenant {0} not found")]
    TenantNotFound(String),
    #[error("cell {0} not found")]
    CellNotFound(String),
    #[error("cell {cell_id} is {status:?}, not available")]
    CellUnavailable { cell_id: String, status: CellStatus },
    #[error("tenant {tenant_id} is {status:?} and cannot be activated")]
    TenantNotReady {
        tenant_id: String,
        status: TenantStatus,
    },
    #[error("cell {0} has no endpoint yet")]
    MissingCellUrl(String),
    #[error(transparent)]
    InvalidCellUrl(#[from] EndpointError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub tenant: TenantRecord,
    pub cell_url: String,
}

#[derive(Clone)]
pub struct RouteSync {
    store: StateStore,
}

impl RouteSync {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Put a tenant into the routing table.
    pub fn activate(&self, tenant_id: &str) -> Result<Activation, ActivationError> {
        let tenant = self
            .store
            .get_tenant(tenant_id)?
            .ok_or_else(|| ActivationError::TenantNotFound(tenant_id.to_string()))?;
        if !matches!(tenant.status, TenantStatus::Active | TenantStatus::Inactive) {
            return Err(ActivationError::TenantNotReady {
                tenant_id: tenant_id.to_string(),
                status: tenant.status,
            });
        }

        let cell = self
            .store
            .get_cell(&tenant.cell_id)?
            .ok_or_else(|| ActivationError::CellNotFound(tenant.cell_id.clone()))?;
        if cell.status != CellStatus::Available {
            return Err(ActivationError::CellUnavailable {
                cell_id: cell.cell_id,
                status: cell.status,
            });
        }
        let raw_url = cell
            .cell_url
            .ok_or_else(|| ActivationError::MissingCellUrl(cell.cell_id.clone()))?;
        // Normalized so the router never sees a value it would refuse.
        let cell_url = CellEndpoint::parse(&raw_url)?.to_url();

        let tenant = self.store.bind_route(tenant_id, &cell_url)?;
        info!(tenant_id = %tenant_id, cell = %tenant.cell_id, %cell_url, "tenant activated");
        Ok(Activation { tenant, cell_url })
    }

    /// Remove a tenant from the routing table. Only an active tenant
    /// becomes inactive; provisioning and failed tenants keep their status.
    pub fn deactivate(&self, tenant_id: &str) -> Result<TenantRecord, ActivationError> {
        let (tenant, existed) = self.store.unbind_route(tenant_id).map_err(|e| match e {
            StateError::NotFound(_) => ActivationError::TenantNotFound(tenant_id.to_string()),
            other => ActivationError::State(other),
        })?;
        info!(tenant_id = %tenant_id, had_route = existed, "tenant deactivated");
        Ok(tenant)
    }

    /// The full mapping table, as served to edge nodes.
    pub fn snapshot(&self) -> Result<BTreeMap<String, String>, StateError> {
        self.store.list_routes()
    }
}
