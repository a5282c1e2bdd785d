//! cellgrid.toml configuration parser.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{FailurePolicy, TlsProtocol};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CellgridConfig {
    pub api: ApiConfig,
    pub state: StateConfig,
    pub log: LogConfig,
    pub router: RouterConfig,
    pub rollout: RolloutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/cellgrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Tenant router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Emit one structured log line per routed request.
    pub logging_enabled: bool,
    /// Token claim holding the tenant identifier.
    pub tenant_claim: String,
    /// Header injected into routed requests for the cell's load balancer.
    pub tenant_header: String,
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub origin_port: u16,
    pub tls_floor: TlsProtocol,
    /// How long a mapping snapshot loaded from file is trusted before reload.
    pub mapping_cache_ttl_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            tenant_claim: "custom:tenantId".to_string(),
            tenant_header: "tenantid".to_string(),
            read_timeout_secs: 30,
            connect_timeout_secs: 5,
            origin_port: 443,
            tls_floor: TlsProtocol::Tls1_2,
            mapping_cache_ttl_secs: 120,
        }
    }
}

/// Staggered deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Cells deployed concurrently within a wave.
    pub max_concurrency: usize,
    pub build_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    /// Fail a run that waits longer than this at an approval gate.
    /// Unset means wait indefinitely.
    pub approval_timeout_secs: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Scheduler tick for approval timeouts and run recovery.
    pub poll_interval_secs: u64,
    pub build_command: Vec<String>,
    pub deploy_command: Vec<String>,
    pub provision_cell_command: Vec<String>,
    pub provision_tenant_command: Vec<String>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            build_timeout_secs: 900,
            deploy_timeout_secs: 1800,
            approval_timeout_secs: None,
            failure_policy: FailurePolicy::default(),
            poll_interval_secs: 5,
            build_command: vec!["./scripts/build-cell.sh".to_string()],
            deploy_command: vec!["./scripts/deploy-cell.sh".to_string()],
            provision_cell_command: vec!["./scripts/provision-cell.sh".to_string()],
            provision_tenant_command: vec!["./scripts/provision-tenant.sh".to_string()],
        }
    }
}

impl CellgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CellgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: CellgridConfig = toml::from_str("").unwrap();
        assert_eq!(config.api.port, 8080);
        assert!(config.router.logging_enabled);
        assert_eq!(config.router.tenant_claim, "custom:tenantId");
        assert_eq!(config.rollout.failure_policy, FailurePolicy::PauseForApproval);
        assert!(config.rollout.approval_timeout_secs.is_none());
    }

    #[test]
    fn parses_overrides() {
        let toml_str = r#"
[router]
logging_enabled = false
tls_floor = "TLSv1.3"

[rollout]
max_concurrency = 8
approval_timeout_secs = 3600
failure_policy = { kind = "threshold", min_success_percent = 80 }
deploy_command = ["cdk", "deploy"]
"#;
        let config: CellgridConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.router.logging_enabled);
        assert_eq!(config.router.tls_floor, TlsProtocol::Tls1_3);
        assert_eq!(config.router.read_timeout_secs, 30);
        assert_eq!(config.rollout.max_concurrency, 8);
        assert_eq!(config.rollout.approval_timeout_secs, Some(3600));
        assert_eq!(
            config.rollout.failure_policy,
            FailurePolicy::Threshold { min_success_percent: 80 }
        );
        assert_eq!(config.rollout.deploy_command, vec!["cdk", "deploy"]);
    }

    #[test]
    fn roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellgrid.toml");
        let config = CellgridConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = CellgridConfig::from_file(&path).unwrap();
        assert_eq!(loaded.api.port, config.api.port);
        assert_eq!(loaded.router.tenant_header, "tenantid");
    }
}
