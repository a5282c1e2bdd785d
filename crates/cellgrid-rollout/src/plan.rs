//! Deployment planning — the `PREPARING` step.
//!
//! Reads the fleet and groups deployable cells into waves. The plan is
//! a pure function of the fleet data: waves ascend by number, cells
//! within a wave are ordered by id and tenant rosters by tenant id, so
//! re-planning an unchanged fleet yields the identical plan.

use std::collections::BTreeMap;

use cellgrid_state::{CellRecord, CellStatus, SizeClass, StateError, StateStore, TenantRecord};
use serde::{Deserialize, Serialize};

/// Read access to the fleet for planning.
pub trait FleetSource {
    fn list_cells(&self) -> Result<Vec<CellRecord>, StateError>;
    fn tenants_in_cell(&self, cell_id: &str) -> Result<Vec<TenantRecord>, StateError>;
}

impl FleetSource for StateStore {
    fn list_cells(&self) -> Result<Vec<CellRecord>, StateError> {
        StateStore::list_cells(self)
    }

    fn tenants_in_cell(&self, cell_id: &str) -> Result<Vec<TenantRecord>, StateError> {
        self.list_tenants_for_cell(cell_id)
    }
}

/// One cell's deployment parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTarget {
    pub cell_id: String,
    pub stack_name: String,
    pub size_class: SizeClass,
    pub wave_number: u32,
    pub tenants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlan {
    pub wave_number: u32,
    pub cells: Vec<CellTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub waves: Vec<WavePlan>,
}

impl DeploymentPlan {
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.waves.iter().map(|w| w.cells.len()).sum()
    }
}

/// Default stack name for a cell that has not reported one.
pub fn default_stack_name(cell_id: &str) -> String {
    format!("Cell-{cell_id}")
}

/// A cell is deployable once it has been provisioned: it has an
/// endpoint and is no longer being created.
fn deployable(cell: &CellRecord) -> bool {
    cell.status != CellStatus::Creating && cell.cell_url.is_some()
}

pub fn plan(fleet: &impl FleetSource) -> Result<DeploymentPlan, StateError> {
    let mut cells = fleet.list_cells()?;
    cells.retain(deployable);
    cells.sort_by(|a, b| a.cell_id.cmp(&b.cell_id));

    let mut waves: BTreeMap<u32, Vec<CellTarget>> = BTreeMap::new();
    for cell in cells {
        let mut tenants: Vec<String> = fleet
            .tenants_in_cell(&cell.cell_id)?
            .into_iter()
            .map(|t| t.tenant_id)
            .collect();
        tenants.sort();

        let stack_name = cell
            .stack_name
            .clone()
            .unwrap_or_else(|| default_stack_name(&cell.cell_id));
        waves.entry(cell.wave_number).or_default().push(CellTarget {
            cell_id: cell.cell_id,
            stack_name,
            size_class: cell.size_class,
            wave_number: cell.wave_number,
            tenants,
        });
    }

    Ok(DeploymentPlan {
        waves: waves
            .into_iter()
            .map(|(wave_number, cells)| WavePlan { wave_number, cells })
            .collect(),
    })
}
