//! Cell and tenant creation sub-workflows.
//!
//! `create_cell` and `assign_tenant` record the request, then hand the
//! slow part (provisioning) to a background task. Provisioning results
//! come back as [`LifecycleEvent`]s, either from that task or posted by
//! external tooling, and `apply` persists them.

use std::sync::Arc;
use std::time::Duration;

use cell_core::{CellEndpoint, ids};
use cellgrid_state::{
    CellRecord, CellStatus, SizeClass, StateError, StateStore, TenantAssignment, TenantRecord,
    TenantStatus,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actions::Provisioner;
use crate::plan::default_stack_name;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,7}$";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid lifecycle event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Result of a provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    CellCreated {
        cell_id: String,
        cell_url: String,
        #[serde(default)]
        stack_name: Option<String>,
    },
    CellCreationError {
        cell_id: String,
        #[serde(default)]
        message: Option<String>,
    },
    TenantCreated {
        cell_id: String,
        tenant_id: String,
    },
    TenantCreationError {
        cell_id: String,
        tenant_id: String,
        #[serde(default)]
        message: Option<String>,
    },
}

/// One row of the capacity report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCapacity {
    pub cell_id: String,
    pub cell_name: String,
    pub status: CellStatus,
    pub size_class: SizeClass,
    pub wave_number: u32,
    pub utilization: u32,
    pub max_capacity: u32,
    pub free_slots: u32,
}

pub fn is_valid_email(email: &str) -> bool {
    Regex::new(EMAIL_PATTERN)
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

pub struct Lifecycle {
    store: StateStore,
    provisioner: Arc<dyn Provisioner>,
    provision_timeout: Duration,
}

impl Lifecycle {
    pub fn new(store: StateStore, provisioner: Arc<dyn Provisioner>, provision_timeout: Duration) -> Self {
        Self {
            store,
            provisioner,
            provision_timeout,
        }
    }

    /// Record a new cell in `creating` status.
    pub fn create_cell(
        &self,
        cell_name: &str,
        size_class: SizeClass,
        wave_number: u32,
    ) -> LifecycleResult<CellRecord> {
        if cell_name.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest("cell name must not be empty".into()));
        }
        if wave_number < 1 {
            return Err(LifecycleError::InvalidRequest("wave number must be at least 1".into()));
        }
        let cell = CellRecord::new(
            &ids::cell_id(),
            cell_name.trim(),
            size_class,
            wave_number,
            cell_core::epoch_secs(),
        );
        self.store.put_cell(&cell)?;
        info!(
            cell = %cell.cell_id,
            name = %cell.cell_name,
            size = size_class.code(),
            wave = wave_number,
            "cell requested"
        );
        Ok(cell)
    }

    /// Place a new tenant in a cell. Fails with a state conflict when the
    /// cell is unavailable or full.
    pub fn assign_tenant(
        &self,
        cell_id: &str,
        tenant_name: &str,
        tier: &str,
        email: &str,
    ) -> LifecycleResult<(CellRecord, TenantRecord)> {
        if tenant_name.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest("tenant name must not be empty".into()));
        }
        if !is_valid_email(email) {
            return Err(LifecycleError::InvalidRequest(format!("invalid email address: {email}")));
        }
        let assignment = TenantAssignment {
            tenant_id: ids::tenant_id(),
            tenant_name: tenant_name.trim().to_string(),
            tier: tier.to_string(),
            email: email.to_string(),
        };
        let (cell, tenant) = self.store.assign_tenant(cell_id, &assignment)?;
        info!(
            cell = %cell_id,
            tenant_id = %tenant.tenant_id,
            priority = tenant.listener_priority,
            "tenant assigned"
        );
        Ok((cell, tenant))
    }

    /// Persist a provisioning result.
    ///
    /// A failed tenant keeps its slot in the cell: the record stays, in
    /// `error`, until an operator removes or retries it.
    pub fn apply(&self, event: &LifecycleEvent) -> LifecycleResult<()> {
        match event {
            LifecycleEvent::CellCreated {
                cell_id,
                cell_url,
                stack_name,
            } => {
                CellEndpoint::parse(cell_url)
                    .map_err(|e| LifecycleError::InvalidEvent(format!("cell {cell_id}: {e}")))?;
                let stack_name = stack_name.clone().unwrap_or_else(|| default_stack_name(cell_id));
                self.store.update_cell(cell_id, |cell| {
                    cell.status = CellStatus::Available;
                    cell.cell_url = Some(cell_url.clone());
                    cell.stack_name = Some(stack_name);
                    Ok(())
                })?;
                info!(cell = %cell_id, url = %cell_url, "cell available");
            }
            LifecycleEvent::CellCreationError { cell_id, message } => {
                self.store.update_cell(cell_id, |cell| {
                    cell.status = CellStatus::Error;
                    Ok(())
                })?;
                warn!(cell = %cell_id, message = message.as_deref().unwrap_or(""), "cell creation failed");
            }
            LifecycleEvent::TenantCreated { cell_id, tenant_id } => {
                self.update_tenant_in(cell_id, tenant_id, TenantStatus::Active)?;
                info!(cell = %cell_id, tenant_id = %tenant_id, "tenant provisioned");
            }
            LifecycleEvent::TenantCreationError {
                cell_id,
                tenant_id,
                message,
            } => {
                self.update_tenant_in(cell_id, tenant_id, TenantStatus::Error)?;
                warn!(
                    cell = %cell_id,
                    tenant_id = %tenant_id,
                    message = message.as_deref().unwrap_or(""),
                    "tenant creation failed"
                );
            }
        }
        Ok(())
    }

    fn update_tenant_in(&self, cell_id: &str, tenant_id: &str, status: TenantStatus) -> LifecycleResult<()> {
        let tenant = self
            .store
            .get_tenant(tenant_id)?
            .ok_or_else(|| StateError::NotFound(format!("tenant {tenant_id}")))?;
        if tenant.cell_id != cell_id {
            return Err(LifecycleError::InvalidEvent(format!(
                "tenant {tenant_id} belongs to cell {}, not {cell_id}",
                tenant.cell_id
            )));
        }
        self.store.update_tenant(tenant_id, |t| {
            t.status = status;
            Ok(())
        })?;
        Ok(())
    }

    /// Provision a requested cell in the background and apply the result.
    pub fn spawn_cell_creation(self: &Arc<Self>, cell: CellRecord) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let event = match tokio::time::timeout(
                this.provision_timeout,
                this.provisioner.provision_cell(&cell),
            )
            .await
            {
                Ok(Ok(provisioned)) => LifecycleEvent::CellCreated {
                    cell_id: cell.cell_id.clone(),
                    cell_url: provisioned.cell_url,
                    stack_name: Some(provisioned.stack_name),
                },
                Ok(Err(e)) => LifecycleEvent::CellCreationError {
                    cell_id: cell.cell_id.clone(),
                    message: Some(e.to_string()),
                },
                Err(_) => LifecycleEvent::CellCreationError {
                    cell_id: cell.cell_id.clone(),
                    message: Some("provisioning timed out".into()),
                },
            };
            this.apply_logged(&event);
        })
    }

    /// Provision an assigned tenant in the background and apply the result.
    pub fn spawn_tenant_creation(self: &Arc<Self>, tenant: TenantRecord, cell: CellRecord) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let message = match tokio::time::timeout(
                this.provision_timeout,
                this.provisioner.provision_tenant(&tenant, &cell),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("provisioning timed out".to_string()),
            };
            let event = match message {
                None => LifecycleEvent::TenantCreated {
                    cell_id: cell.cell_id.clone(),
                    tenant_id: tenant.tenant_id.clone(),
                },
                Some(message) => LifecycleEvent::TenantCreationError {
                    cell_id: cell.cell_id.clone(),
                    tenant_id: tenant.tenant_id.clone(),
                    message: Some(message),
                },
            };
            this.apply_logged(&event);
        })
    }

    fn apply_logged(&self, event: &LifecycleEvent) {
        if let Err(e) = self.apply(event) {
            warn!(error = %e, ?event, "failed to apply lifecycle event");
        }
    }

    /// Utilization of every cell, ordered by cell id.
    pub fn capacity_report(&self) -> LifecycleResult<Vec<CellCapacity>> {
        let mut report: Vec<CellCapacity> = self
            .store
            .list_cells()?
            .into_iter()
            .map(|cell| CellCapacity {
                free_slots: cell.free_slots(),
                cell_id: cell.cell_id,
                cell_name: cell.cell_name,
                status: cell.status,
                size_class: cell.size_class,
                wave_number: cell.wave_number,
                utilization: cell.tenant_count,
                max_capacity: cell.tenant_capacity,
            })
            .collect();
        report.sort_by(|a, b| a.cell_id.cmp(&b.cell_id));
        Ok(report)
    }
}
