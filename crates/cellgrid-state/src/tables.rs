//! redb table definitions for the cellgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the routing table whose values are plain URL strings.

use redb::TableDefinition;

/// Cell records keyed by `{cell_id}`.
pub const CELLS: TableDefinition<&str, &[u8]> = TableDefinition::new("cells");

/// Tenant records keyed by `{tenant_id}`.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Tenant → cell URL mapping read by the router, keyed by `{tenant_id}`.
pub const ROUTES: TableDefinition<&str, &str> = TableDefinition::new("routes");

/// Persisted deployment runs keyed by `{run_id}`.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Posted approval decisions keyed by `{run_id}:{wave_number}`.
pub const APPROVALS: TableDefinition<&str, &[u8]> = TableDefinition::new("approvals");

/// Shape shared by every JSON-valued table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
