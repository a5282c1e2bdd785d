//! Shared types used across cellgrid crates.

use serde::{Deserialize, Serialize};

/// Size class of a cell. Determines instance sizing and how many
/// tenants the cell may host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    #[serde(rename = "S", alias = "small")]
    Small,
    #[serde(rename = "M", alias = "medium")]
    Medium,
    #[serde(rename = "L", alias = "large")]
    Large,
}

impl SizeClass {
    /// Maximum number of tenants a cell of this class may host.
    ///
    /// Larger classes give each tenant more headroom, so they host fewer.
    pub fn tenant_capacity(&self) -> u32 {
        match self {
            SizeClass::Small => 20,
            SizeClass::Medium => 10,
            SizeClass::Large => 5,
        }
    }

    /// Instance sizing for the cell's compute and database tiers.
    pub fn instance_profile(&self) -> InstanceProfile {
        match self {
            SizeClass::Small => InstanceProfile {
                compute: "t3.medium",
                database: "t3.medium",
            },
            SizeClass::Medium => InstanceProfile {
                compute: "t3.large",
                database: "t3.large",
            },
            SizeClass::Large => InstanceProfile {
                compute: "t3.xlarge",
                database: "t3.large",
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SizeClass::Small => "S",
            SizeClass::Medium => "M",
            SizeClass::Large => "L",
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Instance types backing a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceProfile {
    pub compute: &'static str,
    pub database: &'static str,
}

/// Lifecycle status of a cell. Cells are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Creating,
    Available,
    Deploying,
    Error,
}

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Provisioning,
    Active,
    Inactive,
    Error,
}

/// What to do when cells in a wave fail to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record failures and stop at the approval gate; the approver decides.
    #[default]
    PauseForApproval,
    /// Any failed cell fails the whole run.
    AbortOnFailure,
    /// Fail the run when fewer than `min_success_percent` of the wave succeeded.
    Threshold { min_success_percent: u8 },
}

/// Minimum TLS protocol version for the router's outbound hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsProtocol {
    #[serde(rename = "TLSv1")]
    Tls1_0,
    #[serde(rename = "TLSv1.1")]
    Tls1_1,
    #[serde(rename = "TLSv1.2")]
    Tls1_2,
    #[serde(rename = "TLSv1.3")]
    Tls1_3,
}

impl TlsProtocol {
    pub fn label(&self) -> &'static str {
        match self {
            TlsProtocol::Tls1_0 => "TLSv1",
            TlsProtocol::Tls1_1 => "TLSv1.1",
            TlsProtocol::Tls1_2 => "TLSv1.2",
            TlsProtocol::Tls1_3 => "TLSv1.3",
        }
    }
}
