//! Shared fixtures for handler tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cellgrid_rollout::actions::{ActionResult, ProvisionedCell};
use cellgrid_rollout::{
    ArtifactBuilder, CellDeployer, CellTarget, Lifecycle, Orchestrator, Provisioner,
    RolloutSettings, spawn_worker,
};
use cellgrid_router::RouteSync;
use cellgrid_state::{CellRecord, StateStore, TenantRecord};
use tokio::sync::watch;

use crate::ApiState;

struct EchoBuilder;

#[async_trait]
impl ArtifactBuilder for EchoBuilder {
    async fn build(&self, _run_id: &str, source_version: &str) -> ActionResult<String> {
        Ok(format!("art-{source_version}"))
    }
}

struct NoopDeployer;

#[async_trait]
impl CellDeployer for NoopDeployer {
    async fn deploy(&self, _target: &CellTarget, _artifact_version: &str) -> ActionResult<()> {
        Ok(())
    }
}

struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision_cell(&self, cell: &CellRecord) -> ActionResult<ProvisionedCell> {
        Ok(ProvisionedCell {
            cell_url: format!("https://{}.example.com", cell.cell_id),
            stack_name: format!("Cell-{}", cell.cell_id),
        })
    }

    async fn provision_tenant(&self, _tenant: &TenantRecord, _cell: &CellRecord) -> ActionResult<()> {
        Ok(())
    }
}

/// In-memory API state. The scheduler worker is stopped straight away,
/// so tests drive runs explicitly.
pub(crate) fn test_state() -> ApiState {
    let store = StateStore::open_in_memory().unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(EchoBuilder),
        Arc::new(NoopDeployer),
        RolloutSettings {
            deploy_timeout: Duration::from_secs(5),
            ..RolloutSettings::default()
        },
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (scheduler, _worker) = spawn_worker(Arc::clone(&orchestrator), shutdown_rx);
    ApiState {
        routes: RouteSync::new(store.clone()),
        lifecycle: Arc::new(Lifecycle::new(
            store.clone(),
            Arc::new(NoopProvisioner),
            Duration::from_secs(5),
        )),
        orchestrator,
        scheduler,
        store,
    }
}
