//! Durable deployment driver and its scheduler worker.
//!
//! Runs live in the state store. `Orchestrator::drive` loads a run,
//! advances it as far as it can go (build, plan, deploy waves, consume
//! approvals) and persists after every transition and every cell
//! outcome. It stops when the run is terminal or suspended at an
//! approval gate. A per-run lock keeps two tasks from driving the same run.
//!
//! The scheduler worker wakes runs on demand (run started, approval
//! posted) and on a periodic tick, which also expires stale approval
//! gates and resumes runs interrupted by a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cell_core::config::RolloutConfig;
use cell_core::{CellStatus, epoch_secs};
use cellgrid_state::{ApprovalDecision, CellRecord, StateStore};
use tokio::sync::{OwnedMutexGuard, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::actions::{ArtifactBuilder, CellDeployer};
use crate::controller::{
    CellOutcome, DeploymentRun, RolloutError, RolloutResult, RunReport, RunState,
};
use crate::plan::{self, CellTarget};
use crate::strategy::FailurePolicy;

/// Tuning for the driver.
#[derive(Debug, Clone)]
pub struct RolloutSettings {
    pub max_concurrency: usize,
    pub build_timeout: Duration,
    pub deploy_timeout: Duration,
    pub approval_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub poll_interval: Duration,
}

impl From<&RolloutConfig> for RolloutSettings {
    fn from(cfg: &RolloutConfig) -> Self {
        Self {
            max_concurrency: cfg.max_concurrency.max(1),
            build_timeout: Duration::from_secs(cfg.build_timeout_secs),
            deploy_timeout: Duration::from_secs(cfg.deploy_timeout_secs),
            approval_timeout: cfg.approval_timeout_secs.map(Duration::from_secs),
            failure_policy: cfg.failure_policy.clone(),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
        }
    }
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self::from(&RolloutConfig::default())
    }
}

pub struct Orchestrator {
    store: StateStore,
    builder: Arc<dyn ArtifactBuilder>,
    deployer: Arc<dyn CellDeployer>,
    settings: RolloutSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        builder: Arc<dyn ArtifactBuilder>,
        deployer: Arc<dyn CellDeployer>,
        mut settings: RolloutSettings,
    ) -> Self {
        settings.max_concurrency = settings.max_concurrency.max(1);
        settings.poll_interval = settings.poll_interval.max(Duration::from_millis(1));
        Self {
            store,
            builder,
            deployer,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    fn run_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(run_id.to_string()).or_default())
    }

    /// Forget a finished run's lock and any decisions it never consumed.
    fn retire(&self, run_id: &str) {
        if let Err(e) = self.store.clear_approvals(run_id) {
            warn!(run = %run_id, error = %e, "failed to clear stale approvals");
        }
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(run_id);
    }

    fn persist(&self, run: &mut DeploymentRun) -> RolloutResult<()> {
        run.updated_at = epoch_secs();
        self.store.put_run(&run.run_id, run)?;
        Ok(())
    }

    fn load(&self, run_id: &str) -> RolloutResult<DeploymentRun> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| RolloutError::RunNotFound(run_id.to_string()))
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_run(&self, run_id: &str) -> RolloutResult<DeploymentRun> {
        self.load(run_id)
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> RolloutResult<Vec<DeploymentRun>> {
        let mut runs: Vec<DeploymentRun> = self.store.list_runs()?;
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    pub fn report(&self, run_id: &str) -> RolloutResult<RunReport> {
        Ok(self.load(run_id)?.report())
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Record a new run in `SOURCE_FETCHED`. The caller wakes the
    /// scheduler to get it moving.
    pub fn start_run(&self, source_version: &str) -> RolloutResult<DeploymentRun> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut run = DeploymentRun::new(
            &run_id,
            source_version,
            self.settings.failure_policy.clone(),
            epoch_secs(),
        );
        self.persist(&mut run)?;
        info!(run = %run_id, %source_version, "deployment run started");
        Ok(run)
    }

    /// Queue a decision for the run's open gate. `wave_number` defaults
    /// to the gate that is currently open.
    pub fn post_decision(
        &self,
        run_id: &str,
        wave_number: Option<u32>,
        decision: ApprovalDecision,
    ) -> RolloutResult<u32> {
        let run = self.load(run_id)?;
        let awaiting = run.awaiting_wave();
        let wave_number = match (wave_number, awaiting) {
            (Some(requested), Some(open)) if requested == open => open,
            (None, Some(open)) => open,
            (requested, awaiting) => {
                return Err(RolloutError::WaveMismatch {
                    run_id: run_id.to_string(),
                    awaiting,
                    requested: requested.unwrap_or_default(),
                });
            }
        };
        self.store.put_approval(run_id, wave_number, &decision)?;
        info!(run = %run_id, wave = wave_number, ?decision, "approval decision queued");
        Ok(wave_number)
    }

    // ── Driving ────────────────────────────────────────────────────

    /// Advance a run until it is terminal or suspended.
    pub async fn drive(&self, run_id: &str) -> RolloutResult<DeploymentRun> {
        let guard = self.run_lock(run_id).lock_owned().await;
        self.drive_locked(run_id, guard).await
    }

    /// Like [`drive`](Self::drive), but returns `None` immediately if
    /// another task is already driving the run.
    pub async fn try_drive(&self, run_id: &str) -> RolloutResult<Option<DeploymentRun>> {
        let Ok(guard) = self.run_lock(run_id).try_lock_owned() else {
            debug!(run = %run_id, "run busy, skipping");
            return Ok(None);
        };
        self.drive_locked(run_id, guard).await.map(Some)
    }

    async fn drive_locked(
        &self,
        run_id: &str,
        _guard: OwnedMutexGuard<()>,
    ) -> RolloutResult<DeploymentRun> {
        let mut run = self.load(run_id)?;
        loop {
            match run.state.clone() {
                RunState::SourceFetched => {
                    let result = match tokio::time::timeout(
                        self.settings.build_timeout,
                        self.builder.build(&run.run_id, &run.source_version),
                    )
                    .await
                    {
                        Ok(Ok(version)) => Ok(version),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!(
                            "build timed out after {}s",
                            self.settings.build_timeout.as_secs()
                        )),
                    };
                    run.record_build(result)?;
                }
                RunState::Built => run.begin_preparing()?,
                RunState::Preparing => match plan::plan(&self.store) {
                    Ok(plan) => run.apply_plan(plan)?,
                    Err(e) => run.fail_planning(e.to_string())?,
                },
                RunState::WaveInProgress { .. } => {
                    self.deploy_wave(&mut run).await?;
                    run.close_wave(epoch_secs())?;
                }
                RunState::WaveAwaitingApproval { wave_number, .. } => {
                    match self.store.take_approval(&run.run_id, wave_number)? {
                        Some(ApprovalDecision::Proceed) => run.approve(wave_number)?,
                        Some(ApprovalDecision::Reject { reason }) => {
                            run.reject(wave_number, reason)?
                        }
                        None => {
                            let expired = self.settings.approval_timeout.is_some_and(|timeout| {
                                run.expire_approval(epoch_secs(), timeout.as_secs())
                            });
                            if !expired {
                                return Ok(run);
                            }
                        }
                    }
                }
                RunState::WaveApproved { .. } => run.advance()?,
                RunState::Complete | RunState::Failed { .. } => {
                    self.retire(&run.run_id);
                    return Ok(run);
                }
            }
            self.persist(&mut run)?;
        }
    }

    /// Deploy every pending cell of the current wave, bounded by
    /// `max_concurrency`. Each outcome is persisted as it arrives.
    async fn deploy_wave(&self, run: &mut DeploymentRun) -> RolloutResult<()> {
        let pending = run.pending_cells();
        let Some(artifact) = run.artifact_version.clone() else {
            return Err(RolloutError::Worker(format!(
                "run {} has no artifact version",
                run.run_id
            )));
        };
        let wave_number = run.cursor.as_ref().map(|c| c.wave_number).unwrap_or_default();
        info!(
            run = %run.run_id,
            wave = wave_number,
            cells = pending.len(),
            artifact = %artifact,
            "deploying wave"
        );

        for target in &pending {
            self.mark_cell(&target.cell_id, |cell| cell.status = CellStatus::Deploying);
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut set = JoinSet::new();
        for target in pending {
            let semaphore = Arc::clone(&semaphore);
            let deployer = Arc::clone(&self.deployer);
            let artifact = artifact.clone();
            let timeout = self.settings.deploy_timeout;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = deploy_cell(deployer, &target, &artifact, timeout).await;
                (target.cell_id, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (cell_id, outcome) = joined.map_err(|e| RolloutError::Worker(e.to_string()))?;
            match &outcome {
                CellOutcome::Succeeded => {
                    let version = artifact.clone();
                    self.mark_cell(&cell_id, move |cell| {
                        cell.status = CellStatus::Available;
                        cell.deployed_version = Some(version);
                    });
                }
                CellOutcome::Failed { reason } => {
                    warn!(run = %run.run_id, cell = %cell_id, %reason, "cell deployment failed");
                    self.mark_cell(&cell_id, |cell| cell.status = CellStatus::Error);
                }
                CellOutcome::Pending => {}
            }
            run.record_cell_outcome(&cell_id, outcome)?;
            self.persist(run)?;
        }
        Ok(())
    }

    /// Best-effort cell status write. The run record is authoritative
    /// for deployment outcomes, so a failed write is only logged.
    fn mark_cell(&self, cell_id: &str, apply: impl FnOnce(&mut CellRecord)) {
        let result = self.store.update_cell(cell_id, |cell| {
            apply(cell);
            Ok(())
        });
        if let Err(e) = result {
            warn!(cell = %cell_id, error = %e, "failed to update cell status");
        }
    }

    /// Unfinished runs. Suspended runs are included so queued
    /// decisions and approval timeouts are picked up by the sweep.
    fn unfinished_runs(&self) -> RolloutResult<Vec<String>> {
        Ok(self
            .store
            .list_runs::<DeploymentRun>()?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.run_id)
            .collect())
    }
}

async fn deploy_cell(
    deployer: Arc<dyn CellDeployer>,
    target: &CellTarget,
    artifact: &str,
    timeout: Duration,
) -> CellOutcome {
    let task = {
        let target = target.clone();
        let artifact = artifact.to_string();
        tokio::spawn(async move { deployer.deploy(&target, &artifact).await })
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => CellOutcome::Succeeded,
        Ok(Ok(Err(e))) => CellOutcome::Failed {
            reason: e.to_string(),
        },
        Ok(Err(join)) => CellOutcome::Failed {
            reason: format!("deploy task aborted: {join}"),
        },
        Err(_) => {
            abort.abort();
            CellOutcome::Failed {
                reason: format!("deploy timed out after {}s", timeout.as_secs()),
            }
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

/// Handle for waking the scheduler worker.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<String>,
}

impl Scheduler {
    /// Ask the worker to drive a run.
    pub fn wake(&self, run_id: &str) {
        if self.tx.send(run_id.to_string()).is_err() {
            warn!(run = %run_id, "scheduler worker is gone, wake dropped");
        }
    }
}

/// Spawn the scheduler worker. The first tick fires immediately, which
/// resumes runs left unfinished by a previous process.
pub fn spawn_worker(
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> (Scheduler, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(orchestrator.settings.poll_interval);
        info!(
            interval_secs = orchestrator.settings.poll_interval.as_secs(),
            "rollout scheduler started"
        );
        loop {
            tokio::select! {
                Some(run_id) = rx.recv() => {
                    spawn_drive(&orchestrator, run_id, false);
                }
                _ = ticker.tick() => {
                    match orchestrator.unfinished_runs() {
                        Ok(ids) => {
                            for run_id in ids {
                                spawn_drive(&orchestrator, run_id, true);
                            }
                        }
                        Err(e) => error!(error = %e, "failed to list deployment runs"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("rollout scheduler shutting down");
                    break;
                }
            }
        }
    });
    (Scheduler { tx }, handle)
}

fn spawn_drive(orchestrator: &Arc<Orchestrator>, run_id: String, skip_if_busy: bool) {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        let result = if skip_if_busy {
            orchestrator.try_drive(&run_id).await.map(|r| r.map(|run| run.state))
        } else {
            orchestrator.drive(&run_id).await.map(|run| Some(run.state))
        };
        match result {
            Ok(Some(state)) => debug!(run = %run_id, state = state.label(), "run driven"),
            Ok(None) => {}
            Err(e) => error!(run = %run_id, error = %e, "failed to drive deployment run"),
        }
    });
}
