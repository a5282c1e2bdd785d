//! cellgrid staggered deployments — one artifact, rolled out wave by wave.
//!
//! A run builds the artifact once, plans the fleet into ascending waves,
//! deploys each wave's cells in parallel with per-cell fault isolation
//! and stops at an approval gate between waves.
//!
//! # Components
//!
//! - **`controller`** — `DeploymentRun`, the persisted per-run state machine
//! - **`strategy`** — failure policies and wave verdicts
//! - **`plan`** — the deterministic `PREPARING` step
//! - **`actions`** — build/deploy/provision traits and command-backed implementations
//! - **`orchestrator`** — durable driver, per-run locking and the scheduler worker
//! - **`lifecycle`** — cell creation and tenant assignment sub-workflows

pub mod actions;
pub mod controller;
pub mod lifecycle;
pub mod orchestrator;
pub mod plan;
pub mod strategy;

pub use actions::{
    ActionError, ArtifactBuilder, CellDeployer, CommandBuilder, CommandDeployer,
    CommandProvisioner, ProvisionedCell, Provisioner,
};
pub use controller::{
    CellOutcome, DeploymentRun, FailureReason, FinalState, RolloutError, RolloutResult,
    RunReport, RunState,
};
pub use lifecycle::{CellCapacity, Lifecycle, LifecycleError, LifecycleEvent};
pub use orchestrator::{Orchestrator, RolloutSettings, Scheduler, spawn_worker};
pub use plan::{CellTarget, DeploymentPlan, WavePlan};
pub use strategy::{FailurePolicy, WaveTally, WaveVerdict};
