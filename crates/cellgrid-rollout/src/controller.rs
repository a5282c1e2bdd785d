//! Deployment run controller — the per-run state machine.
//!
//! ```text
//! SOURCE_FETCHED → BUILT → PREPARING
//!     → { WAVE_IN_PROGRESS → WAVE_AWAITING_APPROVAL → WAVE_APPROVED }*
//!     → COMPLETE
//! ```
//!
//! `FAILED` is reachable from the build, planning, wave and approval
//! stages. The run carries its own wave cursor (index, total, per-cell
//! status), so a persisted run can be resumed by any worker after any
//! suspension.
//!
//! `DeploymentRun` does no I/O. The orchestrator performs builds and
//! deploys and feeds their results back through the transition methods.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use cellgrid_state::StateError;

use crate::plan::{CellTarget, DeploymentPlan};
use crate::strategy::{FailurePolicy, WaveTally, WaveVerdict, evaluate};

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("run {run_id}: cannot {action} while {state}")]
    InvalidTransition {
        run_id: String,
        state: &'static str,
        action: &'static str,
    },
    #[error("run {run_id}: cell {cell_id} is not pending in the current wave")]
    UnknownCell { run_id: String, cell_id: String },
    #[error("run {run_id}: awaiting approval for wave {awaiting:?}, not wave {requested}")]
    WaveMismatch {
        run_id: String,
        awaiting: Option<u32>,
        requested: u32,
    },
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("wave worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    State(#[from] StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    BuildFailed { message: String },
    PlanningFailed { message: String },
    WaveFailed { wave_number: u32, failed_cells: Vec<String> },
    ApprovalRejected { wave_number: u32, reason: String },
    ApprovalTimeout { wave_number: u32, waited_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    SourceFetched,
    Built,
    Preparing,
    WaveInProgress { wave_number: u32 },
    /// `since` is the Unix time the gate opened.
    WaveAwaitingApproval { wave_number: u32, since: u64 },
    WaveApproved { wave_number: u32 },
    Complete,
    Failed { reason: FailureReason },
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            RunState::SourceFetched => "SOURCE_FETCHED",
            RunState::Built => "BUILT",
            RunState::Preparing => "PREPARING",
            RunState::WaveInProgress { .. } => "WAVE_IN_PROGRESS",
            RunState::WaveAwaitingApproval { .. } => "WAVE_AWAITING_APPROVAL",
            RunState::WaveApproved { .. } => "WAVE_APPROVED",
            RunState::Complete => "COMPLETE",
            RunState::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CellOutcome {
    Pending,
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellProgress {
    pub cell_id: String,
    #[serde(flatten)]
    pub outcome: CellOutcome,
}

/// Iteration state of the wave being deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveCursor {
    /// Position of the wave in the plan.
    pub wave_index: usize,
    pub wave_number: u32,
    /// Number of cells with a recorded outcome.
    pub index: usize,
    pub total: usize,
    pub statuses: Vec<CellProgress>,
}

impl WaveCursor {
    fn new(wave_index: usize, plan: &DeploymentPlan) -> Self {
        let wave = &plan.waves[wave_index];
        Self {
            wave_index,
            wave_number: wave.wave_number,
            index: 0,
            total: wave.cells.len(),
            statuses: wave
                .cells
                .iter()
                .map(|c| CellProgress {
                    cell_id: c.cell_id.clone(),
                    outcome: CellOutcome::Pending,
                })
                .collect(),
        }
    }

    fn is_done(&self) -> bool {
        self.index >= self.total
    }

    fn tally(&self) -> WaveTally {
        self.statuses
            .iter()
            .fold(WaveTally::default(), |mut t, p| {
                match p.outcome {
                    CellOutcome::Succeeded => t.succeeded += 1,
                    CellOutcome::Failed { .. } => t.failed += 1,
                    CellOutcome::Pending => {}
                }
                t
            })
    }
}

/// Final outcome of a finished wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveOutcome {
    pub wave_number: u32,
    pub cells: Vec<CellProgress>,
}

/// A persisted deployment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub run_id: String,
    pub source_version: String,
    pub artifact_version: Option<String>,
    pub failure_policy: FailurePolicy,
    #[serde(flatten)]
    pub state: RunState,
    pub plan: Option<DeploymentPlan>,
    pub cursor: Option<WaveCursor>,
    pub completed_waves: Vec<WaveOutcome>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DeploymentRun {
    pub fn new(run_id: &str, source_version: &str, failure_policy: FailurePolicy, now: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            source_version: source_version.to_string(),
            artifact_version: None,
            failure_policy,
            state: RunState::SourceFetched,
            plan: None,
            cursor: None,
            completed_waves: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Waiting on an external approval signal.
    pub fn is_suspended(&self) -> bool {
        matches!(self.state, RunState::WaveAwaitingApproval { .. })
    }

    /// Wave number whose gate is open, if any.
    pub fn awaiting_wave(&self) -> Option<u32> {
        match self.state {
            RunState::WaveAwaitingApproval { wave_number, .. } => Some(wave_number),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> RolloutError {
        RolloutError::InvalidTransition {
            run_id: self.run_id.clone(),
            state: self.state.label(),
            action,
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        warn!(run = %self.run_id, from = self.state.label(), ?reason, "deployment run failed");
        self.state = RunState::Failed { reason };
    }

    /// Record the shared build's result. A failed build ends the run.
    pub fn record_build(&mut self, result: Result<String, String>) -> RolloutResult<()> {
        if self.state != RunState::SourceFetched {
            return Err(self.invalid("record build"));
        }
        match result {
            Ok(version) => {
                info!(run = %self.run_id, artifact = %version, "artifact built");
                self.artifact_version = Some(version);
                self.state = RunState::Built;
            }
            Err(message) => self.fail(FailureReason::BuildFailed { message }),
        }
        Ok(())
    }

    pub fn begin_preparing(&mut self) -> RolloutResult<()> {
        if self.state != RunState::Built {
            return Err(self.invalid("begin preparing"));
        }
        self.state = RunState::Preparing;
        Ok(())
    }

    /// Adopt the deployment plan and open the first wave. An empty plan
    /// completes the run immediately.
    pub fn apply_plan(&mut self, plan: DeploymentPlan) -> RolloutResult<()> {
        if self.state != RunState::Preparing {
            return Err(self.invalid("apply plan"));
        }
        info!(
            run = %self.run_id,
            waves = plan.waves.len(),
            cells = plan.cell_count(),
            "deployment plan ready"
        );
        if plan.is_empty() {
            self.plan = Some(plan);
            self.state = RunState::Complete;
            return Ok(());
        }
        let cursor = WaveCursor::new(0, &plan);
        self.state = RunState::WaveInProgress {
            wave_number: cursor.wave_number,
        };
        self.cursor = Some(cursor);
        self.plan = Some(plan);
        Ok(())
    }

    pub fn fail_planning(&mut self, message: String) -> RolloutResult<()> {
        if self.state != RunState::Preparing {
            return Err(self.invalid("fail planning"));
        }
        self.fail(FailureReason::PlanningFailed { message });
        Ok(())
    }

    /// Cells of the current wave that have no outcome yet.
    pub fn pending_cells(&self) -> Vec<CellTarget> {
        let (Some(plan), Some(cursor)) = (&self.plan, &self.cursor) else {
            return Vec::new();
        };
        if !matches!(self.state, RunState::WaveInProgress { .. }) {
            return Vec::new();
        }
        plan.waves[cursor.wave_index]
            .cells
            .iter()
            .filter(|c| {
                cursor
                    .statuses
                    .iter()
                    .any(|p| p.cell_id == c.cell_id && p.outcome == CellOutcome::Pending)
            })
            .cloned()
            .collect()
    }

    /// Record one cell's deployment result. Sibling cells are unaffected.
    pub fn record_cell_outcome(&mut self, cell_id: &str, outcome: CellOutcome) -> RolloutResult<()> {
        if !matches!(self.state, RunState::WaveInProgress { .. }) {
            return Err(self.invalid("record cell outcome"));
        }
        let run_id = self.run_id.clone();
        let unknown = || RolloutError::UnknownCell {
            run_id: run_id.clone(),
            cell_id: cell_id.to_string(),
        };
        if outcome == CellOutcome::Pending {
            return Err(unknown());
        }
        let cursor = self.cursor.as_mut().ok_or_else(unknown)?;
        let slot = cursor
            .statuses
            .iter_mut()
            .find(|p| p.cell_id == cell_id && p.outcome == CellOutcome::Pending)
            .ok_or_else(unknown)?;
        debug!(run = %run_id, cell = %cell_id, ?outcome, "cell outcome recorded");
        slot.outcome = outcome;
        cursor.index += 1;
        Ok(())
    }

    /// Close the current wave once every cell has reported.
    ///
    /// The failure policy decides whether the run fails. Otherwise the
    /// run waits at the approval gate. A final wave with no failures
    /// completes the run; one with failures is gated like any other, so
    /// approving it completes the run and rejecting it fails the run.
    pub fn close_wave(&mut self, now: u64) -> RolloutResult<()> {
        if !matches!(self.state, RunState::WaveInProgress { .. }) {
            return Err(self.invalid("close wave"));
        }
        let (Some(plan), Some(cursor)) = (&self.plan, &self.cursor) else {
            return Err(self.invalid("close wave"));
        };
        if !cursor.is_done() {
            return Err(self.invalid("close an unfinished wave"));
        }

        let wave_number = cursor.wave_number;
        let is_last = cursor.wave_index + 1 >= plan.waves.len();
        let tally = cursor.tally();
        let verdict = evaluate(&self.failure_policy, tally);
        let failed_cells: Vec<String> = cursor
            .statuses
            .iter()
            .filter(|p| matches!(p.outcome, CellOutcome::Failed { .. }))
            .map(|p| p.cell_id.clone())
            .collect();

        self.completed_waves.push(WaveOutcome {
            wave_number,
            cells: cursor.statuses.clone(),
        });
        info!(
            run = %self.run_id,
            wave = wave_number,
            succeeded = tally.succeeded,
            failed = tally.failed,
            "wave finished"
        );

        match verdict {
            WaveVerdict::Abort => self.fail(FailureReason::WaveFailed {
                wave_number,
                failed_cells,
            }),
            WaveVerdict::Proceed if is_last && tally.failed == 0 => {
                info!(run = %self.run_id, "deployment run complete");
                self.state = RunState::Complete;
            }
            WaveVerdict::Proceed => {
                self.state = RunState::WaveAwaitingApproval {
                    wave_number,
                    since: now,
                };
            }
        }
        Ok(())
    }

    fn check_gate(&self, wave_number: u32) -> RolloutResult<()> {
        match self.awaiting_wave() {
            Some(w) if w == wave_number => Ok(()),
            awaiting => Err(RolloutError::WaveMismatch {
                run_id: self.run_id.clone(),
                awaiting,
                requested: wave_number,
            }),
        }
    }

    pub fn approve(&mut self, wave_number: u32) -> RolloutResult<()> {
        self.check_gate(wave_number)?;
        info!(run = %self.run_id, wave = wave_number, "wave approved");
        self.state = RunState::WaveApproved { wave_number };
        Ok(())
    }

    pub fn reject(&mut self, wave_number: u32, reason: String) -> RolloutResult<()> {
        self.check_gate(wave_number)?;
        self.fail(FailureReason::ApprovalRejected {
            wave_number,
            reason,
        });
        Ok(())
    }

    /// Fail a gate that has been open for at least `timeout_secs`.
    /// Returns whether the run expired.
    pub fn expire_approval(&mut self, now: u64, timeout_secs: u64) -> bool {
        let RunState::WaveAwaitingApproval { wave_number, since } = self.state else {
            return false;
        };
        let waited_secs = now.saturating_sub(since);
        if waited_secs < timeout_secs {
            return false;
        }
        self.fail(FailureReason::ApprovalTimeout {
            wave_number,
            waited_secs,
        });
        true
    }

    /// Move past an approved gate into the next wave.
    pub fn advance(&mut self) -> RolloutResult<()> {
        if !matches!(self.state, RunState::WaveApproved { .. }) {
            return Err(self.invalid("advance"));
        }
        let (Some(plan), Some(cursor)) = (&self.plan, &self.cursor) else {
            return Err(self.invalid("advance"));
        };
        let next = cursor.wave_index + 1;
        if next >= plan.waves.len() {
            self.state = RunState::Complete;
            return Ok(());
        }
        let cursor = WaveCursor::new(next, plan);
        debug!(run = %self.run_id, wave = cursor.wave_number, "advancing to next wave");
        self.state = RunState::WaveInProgress {
            wave_number: cursor.wave_number,
        };
        self.cursor = Some(cursor);
        Ok(())
    }

    pub fn report(&self) -> RunReport {
        let waves = match &self.plan {
            Some(plan) => plan
                .waves
                .iter()
                .map(|wave| {
                    let finished = self
                        .completed_waves
                        .iter()
                        .find(|w| w.wave_number == wave.wave_number)
                        .map(|w| w.cells.clone());
                    let current = self
                        .cursor
                        .as_ref()
                        .filter(|c| c.wave_number == wave.wave_number)
                        .map(|c| c.statuses.clone());
                    let cells = finished.or(current).unwrap_or_else(|| {
                        wave.cells
                            .iter()
                            .map(|c| CellProgress {
                                cell_id: c.cell_id.clone(),
                                outcome: CellOutcome::Pending,
                            })
                            .collect()
                    });
                    WaveOutcome {
                        wave_number: wave.wave_number,
                        cells,
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let (final_state, failure) = match &self.state {
            RunState::Complete => (FinalState::Complete, None),
            RunState::Failed { reason } => (FinalState::Failed, Some(reason.clone())),
            _ => (FinalState::InProgress, None),
        };

        RunReport {
            run_id: self.run_id.clone(),
            source_version: self.source_version.clone(),
            artifact_version: self.artifact_version.clone(),
            waves,
            final_state,
            failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalState {
    InProgress,
    Complete,
    Failed,
}

/// Artifact version and per-cell outcomes of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub source_version: String,
    pub artifact_version: Option<String>,
    pub waves: Vec<WaveOutcome>,
    pub final_state: FinalState,
    pub failure: Option<FailureReason>,
}
