//! `celld serve` — wires the subsystems together and serves the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cell_core::CellgridConfig;
use cellgrid_api::ApiState;
use cellgrid_rollout::{
    CommandBuilder, CommandDeployer, CommandProvisioner, Lifecycle, Orchestrator,
    RolloutSettings, spawn_worker,
};
use cellgrid_router::{RouteSync, StateMappingStore, TenantRouter};
use cellgrid_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// State store file name inside the data directory.
pub const DB_FILE: &str = "cellgrid.redb";

pub struct Assembled {
    pub state: ApiState,
    pub tenant_router: Arc<TenantRouter>,
    pub worker: JoinHandle<()>,
}

/// Build every subsystem over one store and start the scheduler worker.
/// Must run inside a tokio runtime.
pub fn assemble(
    config: &CellgridConfig,
    store: StateStore,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Assembled> {
    let rollout = &config.rollout;

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(CommandBuilder::new(rollout.build_command.clone())),
        Arc::new(CommandDeployer::new(rollout.deploy_command.clone())),
        RolloutSettings::from(rollout),
    ));
    let (scheduler, worker) = spawn_worker(Arc::clone(&orchestrator), shutdown);
    info!(
        max_concurrency = rollout.max_concurrency,
        policy = ?rollout.failure_policy,
        "deployment orchestrator initialized"
    );

    let lifecycle = Arc::new(Lifecycle::new(
        store.clone(),
        Arc::new(CommandProvisioner::new(
            rollout.provision_cell_command.clone(),
            rollout.provision_tenant_command.clone(),
        )),
        Duration::from_secs(rollout.deploy_timeout_secs),
    ));

    let tenant_router = Arc::new(TenantRouter::new(
        Arc::new(StateMappingStore::new(store.clone())),
        config.router.clone(),
    )?);
    info!(
        claim = %config.router.tenant_claim,
        header = %config.router.tenant_header,
        "tenant router initialized"
    );

    let state = ApiState {
        routes: RouteSync::new(store.clone()),
        lifecycle,
        orchestrator,
        scheduler,
        store,
    };
    Ok(Assembled {
        state,
        tenant_router,
        worker,
    })
}

pub async fn run_serve(config: CellgridConfig) -> anyhow::Result<()> {
    info!("cellgrid daemon starting");

    std::fs::create_dir_all(&config.state.data_dir)?;
    let db_path = config.state.data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let Assembled {
        state,
        tenant_router,
        worker,
    } = assemble(&config, store, shutdown_rx)?;

    let router = cellgrid_api::build_router(state, tenant_router);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = worker.await;
    info!("cellgrid daemon stopped");
    Ok(())
}
