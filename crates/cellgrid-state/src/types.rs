//! Domain types for the cellgrid state store.
//!
//! These types represent the persisted state of cells, tenants and
//! approval decisions. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

pub use cell_core::{CellStatus, SizeClass, TenantStatus};

/// Unique identifier for a cell.
pub type CellId = String;

/// Unique identifier for a tenant.
pub type TenantId = String;

// ── Cell ──────────────────────────────────────────────────────────

/// An independently deployable unit of backend infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellRecord {
    pub cell_id: CellId,
    pub cell_name: String,
    pub size_class: SizeClass,
    /// Deployment ordering group. Always ≥ 1.
    pub wave_number: u32,
    pub status: CellStatus,
    pub tenant_count: u32,
    pub tenant_capacity: u32,
    /// Endpoint of the cell, `https://<hostname>/<path>`. Set once the
    /// cell has been provisioned.
    pub cell_url: Option<String>,
    /// Name of the infrastructure stack backing the cell.
    pub stack_name: Option<String>,
    /// Listener priority handed to the most recent tenant.
    pub listener_priority_counter: u32,
    /// Artifact version most recently deployed to this cell.
    pub deployed_version: Option<String>,
    /// Unix timestamp (seconds) when this cell was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

impl CellRecord {
    /// Build a freshly requested cell in `creating` status.
    pub fn new(cell_id: &str, cell_name: &str, size_class: SizeClass, wave_number: u32, now: u64) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            cell_name: cell_name.to_string(),
            size_class,
            wave_number,
            status: CellStatus::Creating,
            tenant_count: 0,
            tenant_capacity: size_class.tenant_capacity(),
            cell_url: None,
            stack_name: None,
            listener_priority_counter: 0,
            deployed_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Free tenant slots.
    pub fn free_slots(&self) -> u32 {
        self.tenant_capacity.saturating_sub(self.tenant_count)
    }

    /// Whether another tenant may be assigned right now.
    pub fn accepts_tenants(&self) -> bool {
        self.status == CellStatus::Available && self.tenant_count < self.tenant_capacity
    }
}

// ── Tenant ────────────────────────────────────────────────────────

/// An end-customer account, assigned to exactly one cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub tenant_name: String,
    pub cell_id: CellId,
    pub tier: String,
    pub email: String,
    pub status: TenantStatus,
    /// Priority of the tenant's rule on the cell's load balancer listener.
    pub listener_priority: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Request to place a new tenant in a cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantAssignment {
    pub tenant_id: TenantId,
    pub tenant_name: String,
    pub tier: String,
    pub email: String,
}

// ── Approvals ─────────────────────────────────────────────────────

/// A decision posted at a deployment run's approval gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Proceed,
    Reject { reason: String },
}

/// Build the composite key for the approvals table.
pub fn approval_key(run_id: &str, wave_number: u32) -> String {
    format!("{run_id}:{wave_number}")
}
