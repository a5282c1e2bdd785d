//! External actions — the build, deploy and provisioning steps.
//!
//! The orchestrator only sees the traits. The command-backed
//! implementations run an operator-configured argv with the step's
//! parameters in the environment; infrastructure tooling lives behind
//! those commands.

use std::process::Stdio;

use async_trait::async_trait;
use cellgrid_state::{CellRecord, TenantRecord};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::plan::CellTarget;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no command configured for {0}")]
    EmptyCommand(&'static str),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    ExitCode {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{0} printed no output")]
    NoOutput(String),

    #[error("{0}")]
    Other(String),
}

pub type ActionResult<T> = Result<T, ActionError>;

/// Produces the single artifact shared by every cell of a run.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build `source_version`, returning the artifact version.
    async fn build(&self, run_id: &str, source_version: &str) -> ActionResult<String>;
}

/// Applies an artifact version to one cell.
#[async_trait]
pub trait CellDeployer: Send + Sync {
    async fn deploy(&self, target: &CellTarget, artifact_version: &str) -> ActionResult<()>;
}

/// What provisioning a new cell produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCell {
    pub cell_url: String,
    pub stack_name: String,
}

/// Creates cell infrastructure and per-tenant resources.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision_cell(&self, cell: &CellRecord) -> ActionResult<ProvisionedCell>;
    async fn provision_tenant(&self, tenant: &TenantRecord, cell: &CellRecord) -> ActionResult<()>;
}

// ── Command-backed implementations ────────────────────────────────

async fn run_command(
    step: &'static str,
    argv: &[String],
    envs: Vec<(&'static str, String)>,
) -> ActionResult<String> {
    let (program, args) = argv.split_first().ok_or(ActionError::EmptyCommand(step))?;
    debug!(%program, step, "running action command");

    let output = Command::new(program)
        .args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ActionError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ActionError::ExitCode {
            program: program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn last_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}

/// Runs the configured build command. The last non-empty stdout line is
/// the artifact version.
pub struct CommandBuilder {
    argv: Vec<String>,
}

impl CommandBuilder {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl ArtifactBuilder for CommandBuilder {
    async fn build(&self, run_id: &str, source_version: &str) -> ActionResult<String> {
        let stdout = run_command(
            "build",
            &self.argv,
            vec![
                ("RUN_ID", run_id.to_string()),
                ("SOURCE_VERSION", source_version.to_string()),
            ],
        )
        .await?;
        last_line(&stdout).ok_or_else(|| ActionError::NoOutput("build command".to_string()))
    }
}

pub struct CommandDeployer {
    argv: Vec<String>,
}

impl CommandDeployer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl CellDeployer for CommandDeployer {
    async fn deploy(&self, target: &CellTarget, artifact_version: &str) -> ActionResult<()> {
        let tenants = serde_json::to_string(&target.tenants).map_err(|e| ActionError::Other(e.to_string()))?;
        run_command(
            "deploy",
            &self.argv,
            vec![
                ("CELL_ID", target.cell_id.clone()),
                ("CELL_STACK_NAME", target.stack_name.clone()),
                ("CELL_SIZE", target.size_class.code().to_string()),
                ("WAVE_NUMBER", target.wave_number.to_string()),
                ("ARTIFACT_VERSION", artifact_version.to_string()),
                ("TENANTS_IN_CELL", tenants),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Runs the configured provisioning commands. The cell command's last
/// non-empty stdout line is the new cell's URL.
pub struct CommandProvisioner {
    cell_argv: Vec<String>,
    tenant_argv: Vec<String>,
}

impl CommandProvisioner {
    pub fn new(cell_argv: Vec<String>, tenant_argv: Vec<String>) -> Self {
        Self {
            cell_argv,
            tenant_argv,
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision_cell(&self, cell: &CellRecord) -> ActionResult<ProvisionedCell> {
        let profile = cell.size_class.instance_profile();
        let stack_name = crate::plan::default_stack_name(&cell.cell_id);
        let stdout = run_command(
            "provision cell",
            &self.cell_argv,
            vec![
                ("CELL_ID", cell.cell_id.clone()),
                ("CELL_NAME", cell.cell_name.clone()),
                ("CELL_STACK_NAME", stack_name.clone()),
                ("CELL_SIZE", cell.size_class.code().to_string()),
                ("WAVE_NUMBER", cell.wave_number.to_string()),
                ("COMPUTE_INSTANCE_TYPE", profile.compute.to_string()),
                ("DATABASE_INSTANCE_TYPE", profile.database.to_string()),
            ],
        )
        .await?;
        let cell_url = last_line(&stdout)
            .ok_or_else(|| ActionError::NoOutput("provision cell command".to_string()))?;
        Ok(ProvisionedCell {
            cell_url,
            stack_name,
        })
    }

    async fn provision_tenant(&self, tenant: &TenantRecord, cell: &CellRecord) -> ActionResult<()> {
        run_command(
            "provision tenant",
            &self.tenant_argv,
            vec![
                ("TENANT_ID", tenant.tenant_id.clone()),
                ("TENANT_NAME", tenant.tenant_name.clone()),
                ("TENANT_TIER", tenant.tier.clone()),
                ("TENANT_EMAIL", tenant.email.clone()),
                ("LISTENER_PRIORITY", tenant.listener_priority.to_string()),
                ("CELL_ID", cell.cell_id.clone()),
                ("CELL_SIZE", cell.size_class.code().to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}
