//! StateStore — redb-backed state persistence for cellgrid.
//!
//! Provides typed operations over cells, tenants, the tenant → cell
//! mapping table, deployment runs and the approval queue. JSON values go
//! into redb's `&[u8]` columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use cell_core::epoch_secs;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode_from<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CELLS).map_err(map_err!(Table))?;
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(ROUTES).map_err(map_err!(Table))?;
        txn.open_table(RUNS).map_err(map_err!(Table))?;
        txn.open_table(APPROVALS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── JSON table helpers ─────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        decode_from(&table, key)
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Cells ──────────────────────────────────────────────────────

    /// Insert or replace a cell record.
    pub fn put_cell(&self, cell: &CellRecord) -> StateResult<()> {
        self.put_json(CELLS, &cell.cell_id, cell)?;
        debug!(cell = %cell.cell_id, status = ?cell.status, "cell stored");
        Ok(())
    }

    pub fn get_cell(&self, cell_id: &str) -> StateResult<Option<CellRecord>> {
        self.get_json(CELLS, cell_id)
    }

    /// List all cells, ordered by cell id.
    pub fn list_cells(&self) -> StateResult<Vec<CellRecord>> {
        self.list_json(CELLS)
    }

    /// Read-modify-write a single cell inside one write transaction.
    ///
    /// The closure may veto the update by returning an error, in which
    /// case nothing is written. `updated_at` is refreshed on success.
    pub fn update_cell<F>(&self, cell_id: &str, apply: F) -> StateResult<CellRecord>
    where
        F: FnOnce(&mut CellRecord) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(CELLS).map_err(map_err!(Table))?;
            let mut cell: CellRecord = decode_from(&table, cell_id)?
                .ok_or_else(|| StateError::NotFound(format!("cell {cell_id}")))?;
            apply(&mut cell)?;
            cell.updated_at = epoch_secs();
            let bytes = serde_json::to_vec(&cell).map_err(map_err!(Serialize))?;
            table
                .insert(cell_id, bytes.as_slice())
                .map_err(map_err!(Write))?;
            cell
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Tenants ────────────────────────────────────────────────────

    pub fn put_tenant(&self, tenant: &TenantRecord) -> StateResult<()> {
        self.put_json(TENANTS, &tenant.tenant_id, tenant)
    }

    pub fn get_tenant(&self, tenant_id: &str) -> StateResult<Option<TenantRecord>> {
        self.get_json(TENANTS, tenant_id)
    }

    pub fn list_tenants(&self) -> StateResult<Vec<TenantRecord>> {
        self.list_json(TENANTS)
    }

    /// Tenants assigned to one cell, ordered by tenant id.
    pub fn list_tenants_for_cell(&self, cell_id: &str) -> StateResult<Vec<TenantRecord>> {
        Ok(self
            .list_tenants()?
            .into_iter()
            .filter(|t| t.cell_id == cell_id)
            .collect())
    }

    /// Read-modify-write a single tenant inside one write transaction.
    pub fn update_tenant<F>(&self, tenant_id: &str, apply: F) -> StateResult<TenantRecord>
    where
        F: FnOnce(&mut TenantRecord) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let mut tenant: TenantRecord = decode_from(&table, tenant_id)?
                .ok_or_else(|| StateError::NotFound(format!("tenant {tenant_id}")))?;
            apply(&mut tenant)?;
            tenant.updated_at = epoch_secs();
            let bytes = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
            table
                .insert(tenant_id, bytes.as_slice())
                .map_err(map_err!(Write))?;
            tenant
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Place a tenant in a cell.
    ///
    /// The capacity check, the tenant count increment, the listener
    /// priority bump and the tenant insert commit together, so two
    /// concurrent assignments can never overfill a cell.
    pub fn assign_tenant(
        &self,
        cell_id: &str,
        assignment: &TenantAssignment,
    ) -> StateResult<(CellRecord, TenantRecord)> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut cells = txn.open_table(CELLS).map_err(map_err!(Table))?;
            let mut tenants = txn.open_table(TENANTS).map_err(map_err!(Table))?;

            let mut cell: CellRecord = decode_from(&cells, cell_id)?
                .ok_or_else(|| StateError::NotFound(format!("cell {cell_id}")))?;
            if cell.status != CellStatus::Available {
                return Err(StateError::Conflict(format!(
                    "cell {cell_id} is {:?}, not available",
                    cell.status
                )));
            }
            if cell.tenant_count >= cell.tenant_capacity {
                return Err(StateError::Conflict(format!(
                    "cell {cell_id} is full ({}/{})",
                    cell.tenant_count, cell.tenant_capacity
                )));
            }
            if decode_from::<TenantRecord>(&tenants, &assignment.tenant_id)?.is_some() {
                return Err(StateError::Conflict(format!(
                    "tenant {} already exists",
                    assignment.tenant_id
                )));
            }

            cell.tenant_count += 1;
            cell.listener_priority_counter += 10;
            cell.updated_at = now;

            let tenant = TenantRecord {
                tenant_id: assignment.tenant_id.clone(),
                tenant_name: assignment.tenant_name.clone(),
                cell_id: cell_id.to_string(),
                tier: assignment.tier.clone(),
                email: assignment.email.clone(),
                status: TenantStatus::Provisioning,
                listener_priority: cell.listener_priority_counter,
                created_at: now,
                updated_at: now,
            };

            let cell_bytes = serde_json::to_vec(&cell).map_err(map_err!(Serialize))?;
            let tenant_bytes = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
            cells
                .insert(cell_id, cell_bytes.as_slice())
                .map_err(map_err!(Write))?;
            tenants
                .insert(tenant.tenant_id.as_str(), tenant_bytes.as_slice())
                .map_err(map_err!(Write))?;
            (cell, tenant)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            cell = %cell_id,
            tenant_id = %result.1.tenant_id,
            tenant_count = result.0.tenant_count,
            "tenant assigned"
        );
        Ok(result)
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Look up the cell URL a tenant is routed to.
    pub fn get_route(&self, tenant_id: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        Ok(table
            .get(tenant_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }

    /// Full mapping table, ordered by tenant id.
    pub fn list_routes(&self) -> StateResult<BTreeMap<String, String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        let mut routes = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            routes.insert(key.value().to_string(), value.value().to_string());
        }
        Ok(routes)
    }

    /// Write a tenant's route and mark the tenant active, atomically.
    pub fn bind_route(&self, tenant_id: &str, cell_url: &str) -> StateResult<TenantRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let tenant = {
            let mut tenants = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let mut routes = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            let mut tenant: TenantRecord = decode_from(&tenants, tenant_id)?
                .ok_or_else(|| StateError::NotFound(format!("tenant {tenant_id}")))?;
            tenant.status = TenantStatus::Active;
            tenant.updated_at = epoch_secs();
            let bytes = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
            tenants
                .insert(tenant_id, bytes.as_slice())
                .map_err(map_err!(Write))?;
            routes.insert(tenant_id, cell_url).map_err(map_err!(Write))?;
            tenant
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tenant_id = %tenant_id, %cell_url, "route bound");
        Ok(tenant)
    }

    /// Remove a tenant's route, atomically marking an active tenant
    /// inactive. Tenants still provisioning or in error keep their status.
    /// The boolean reports whether a route existed.
    pub fn unbind_route(&self, tenant_id: &str) -> StateResult<(TenantRecord, bool)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (tenant, existed) = {
            let mut tenants = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let mut routes = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            let mut tenant: TenantRecord = decode_from(&tenants, tenant_id)?
                .ok_or_else(|| StateError::NotFound(format!("tenant {tenant_id}")))?;
            let existed = routes.remove(tenant_id).map_err(map_err!(Write))?.is_some();
            if tenant.status == TenantStatus::Active {
                tenant.status = TenantStatus::Inactive;
                tenant.updated_at = epoch_secs();
                let bytes = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
                tenants
                    .insert(tenant_id, bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            (tenant, existed)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tenant_id = %tenant_id, existed, "route unbound");
        Ok((tenant, existed))
    }

    // ── Deployment runs ────────────────────────────────────────────

    /// Persist a deployment run under its id.
    pub fn put_run<T: Serialize>(&self, run_id: &str, run: &T) -> StateResult<()> {
        self.put_json(RUNS, run_id, run)
    }

    pub fn get_run<T: DeserializeOwned>(&self, run_id: &str) -> StateResult<Option<T>> {
        self.get_json(RUNS, run_id)
    }

    pub fn list_runs<T: DeserializeOwned>(&self) -> StateResult<Vec<T>> {
        self.list_json(RUNS)
    }

    // ── Approval queue ─────────────────────────────────────────────

    /// Post a decision for a run's wave. A later post replaces an
    /// unconsumed earlier one.
    pub fn put_approval(
        &self,
        run_id: &str,
        wave_number: u32,
        decision: &ApprovalDecision,
    ) -> StateResult<()> {
        let key = approval_key(run_id, wave_number);
        self.put_json(APPROVALS, &key, decision)?;
        debug!(%key, ?decision, "approval posted");
        Ok(())
    }

    /// Consume the decision posted for a run's wave, if any.
    pub fn take_approval(
        &self,
        run_id: &str,
        wave_number: u32,
    ) -> StateResult<Option<ApprovalDecision>> {
        let key = approval_key(run_id, wave_number);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let decision = {
            let mut table = txn.open_table(APPROVALS).map_err(map_err!(Table))?;
            match table.remove(key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => Some(
                    serde_json::from_slice::<ApprovalDecision>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(decision)
    }

    /// Drop every unconsumed decision for a run. Returns how many were
    /// removed.
    pub fn clear_approvals(&self, run_id: &str) -> StateResult<usize> {
        let prefix = format!("{run_id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(APPROVALS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    keys.push(key.value().to_string());
                }
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            keys.len()
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if removed > 0 {
            debug!(run = %run_id, removed, "stale approvals cleared");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn available_cell(id: &str, size: SizeClass, wave: u32) -> CellRecord {
        let mut cell = CellRecord::new(id, &format!("{id}-name"), size, wave, 1000);
        cell.status = CellStatus::Available;
        cell.cell_url = Some(format!("https://{id}.example.com/app"));
        cell
    }

    fn assignment(id: &str) -> TenantAssignment {
        TenantAssignment {
            tenant_id: id.to_string(),
            tenant_name: format!("{id} corp"),
            tier: "basic".to_string(),
            email: format!("ops@{id}.example.com"),
        }
    }

    // ── Cells ──────────────────────────────────────────────────────

    #[test]
    fn cell_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let cell = available_cell("cabc123", SizeClass::Medium, 1);
        store.put_cell(&cell).unwrap();

        assert_eq!(store.get_cell("cabc123").unwrap(), Some(cell));
        assert_eq!(store.get_cell("missing").unwrap(), None);
    }

    #[test]
    fn cells_list_in_id_order() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["cz00001", "ca00001", "cm00001"] {
            store.put_cell(&available_cell(id, SizeClass::Small, 1)).unwrap();
        }
        let ids: Vec<_> = store
            .list_cells()
            .unwrap()
            .into_iter()
            .map(|c| c.cell_id)
            .collect();
        assert_eq!(ids, vec!["ca00001", "cm00001", "cz00001"]);
    }

    #[test]
    fn update_cell_applies_closure() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Small, 1)).unwrap();

        let updated = store
            .update_cell("c1", |cell| {
                cell.status = CellStatus::Deploying;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.status, CellStatus::Deploying);
        assert!(updated.updated_at > 1000);
        assert_eq!(store.get_cell("c1").unwrap().unwrap().status, CellStatus::Deploying);
    }

    #[test]
    fn update_cell_veto_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Small, 1)).unwrap();

        let result = store.update_cell("c1", |cell| {
            cell.status = CellStatus::Error;
            Err(StateError::Conflict("nope".into()))
        });
        assert!(matches!(result, Err(StateError::Conflict(_))));
        assert_eq!(store.get_cell("c1").unwrap().unwrap().status, CellStatus::Available);
    }

    #[test]
    fn update_missing_cell_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.update_cell("ghost", |_| Ok(()));
        assert!(matches!(result, Err(StateError::NotFound(_))));
    }

    // ── Tenant assignment ──────────────────────────────────────────

    #[test]
    fn assign_advances_count_and_priority() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Large, 1)).unwrap();

        let (_, first) = store.assign_tenant("c1", &assignment("t1")).unwrap();
        let (cell, second) = store.assign_tenant("c1", &assignment("t2")).unwrap();

        assert_eq!(first.listener_priority, 10);
        assert_eq!(second.listener_priority, 20);
        assert_eq!(second.status, TenantStatus::Provisioning);
        assert_eq!(cell.tenant_count, 2);
        assert_eq!(store.list_tenants_for_cell("c1").unwrap().len(), 2);
    }

    #[test]
    fn assign_rejects_full_cell() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Large, 1)).unwrap();
        for i in 0..5 {
            store.assign_tenant("c1", &assignment(&format!("t{i}"))).unwrap();
        }

        let result = store.assign_tenant("c1", &assignment("t9"));
        assert!(matches!(result, Err(StateError::Conflict(_))));
        assert_eq!(store.get_cell("c1").unwrap().unwrap().tenant_count, 5);
        assert!(store.get_tenant("t9").unwrap().is_none());
    }

    #[test]
    fn assign_rejects_unavailable_cell() {
        let store = StateStore::open_in_memory().unwrap();
        let cell = CellRecord::new("c1", "creating", SizeClass::Small, 1, 1000);
        store.put_cell(&cell).unwrap();

        let result = store.assign_tenant("c1", &assignment("t1"));
        assert!(matches!(result, Err(StateError::Conflict(_))));
    }

    #[test]
    fn assign_rejects_duplicate_tenant() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Small, 1)).unwrap();
        store.assign_tenant("c1", &assignment("t1")).unwrap();

        let result = store.assign_tenant("c1", &assignment("t1"));
        assert!(matches!(result, Err(StateError::Conflict(_))));
        assert_eq!(store.get_cell("c1").unwrap().unwrap().tenant_count, 1);
    }

    #[test]
    fn concurrent_assignments_never_overfill() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Large, 1)).unwrap();

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.assign_tenant("c1", &assignment(&format!("t{i:02}"))))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(accepted, 5);

        let cell = store.get_cell("c1").unwrap().unwrap();
        assert_eq!(cell.tenant_count, 5);
        assert_eq!(store.list_tenants().unwrap().len(), 5);
    }

    // ── Routes ─────────────────────────────────────────────────────

    #[test]
    fn bind_and_unbind_route() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Small, 1)).unwrap();
        store.assign_tenant("c1", &assignment("t1")).unwrap();

        let tenant = store.bind_route("t1", "https://c1.example.com/app").unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(
            store.get_route("t1").unwrap().as_deref(),
            Some("https://c1.example.com/app")
        );
        assert_eq!(store.list_routes().unwrap().len(), 1);

        let (tenant, existed) = store.unbind_route("t1").unwrap();
        assert!(existed);
        assert_eq!(tenant.status, TenantStatus::Inactive);
        assert_eq!(store.get_route("t1").unwrap(), None);

        let (_, existed) = store.unbind_route("t1").unwrap();
        assert!(!existed);
    }

    #[test]
    fn unbind_keeps_unfinished_tenant_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cell(&available_cell("c1", SizeClass::Small, 1)).unwrap();
        store.assign_tenant("c1", &assignment("t1")).unwrap();
        store
            .update_tenant("t1", |t| {
                t.status = TenantStatus::Error;
                Ok(())
            })
            .unwrap();

        let (tenant, existed) = store.unbind_route("t1").unwrap();
        assert!(!existed);
        assert_eq!(tenant.status, TenantStatus::Error);
        assert_eq!(
            store.get_tenant("t1").unwrap().unwrap().status,
            TenantStatus::Error
        );
    }

    #[test]
    fn bind_route_for_unknown_tenant_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.bind_route("ghost", "https://c1.example.com");
        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert!(store.list_routes().unwrap().is_empty());
    }

    // ── Runs and approvals ─────────────────────────────────────────

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct FakeRun {
        id: String,
        wave: u32,
    }

    #[test]
    fn runs_are_stored_opaquely() {
        let store = StateStore::open_in_memory().unwrap();
        let run = FakeRun { id: "r1".into(), wave: 2 };
        store.put_run("r1", &run).unwrap();

        assert_eq!(store.get_run::<FakeRun>("r1").unwrap(), Some(run));
        assert_eq!(store.list_runs::<FakeRun>().unwrap().len(), 1);
        assert!(store.get_run::<FakeRun>("r2").unwrap().is_none());
    }

    #[test]
    fn approvals_are_consumed_once() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_approval("r1", 1, &ApprovalDecision::Proceed).unwrap();

        assert_eq!(store.take_approval("r1", 2).unwrap(), None);
        assert_eq!(
            store.take_approval("r1", 1).unwrap(),
            Some(ApprovalDecision::Proceed)
        );
        assert_eq!(store.take_approval("r1", 1).unwrap(), None);
    }

    #[test]
    fn clearing_approvals_is_scoped_to_the_run() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_approval("r1", 1, &ApprovalDecision::Proceed).unwrap();
        store.put_approval("r1", 2, &ApprovalDecision::Proceed).unwrap();
        store.put_approval("r10", 1, &ApprovalDecision::Proceed).unwrap();

        assert_eq!(store.clear_approvals("r1").unwrap(), 2);
        assert_eq!(store.take_approval("r1", 1).unwrap(), None);
        assert_eq!(
            store.take_approval("r10", 1).unwrap(),
            Some(ApprovalDecision::Proceed)
        );
        assert_eq!(store.clear_approvals("r1").unwrap(), 0);
    }

    #[test]
    fn later_approval_replaces_earlier() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_approval("r1", 1, &ApprovalDecision::Proceed).unwrap();
        let reject = ApprovalDecision::Reject {
            reason: "canary alarms".into(),
        };
        store.put_approval("r1", 1, &reject).unwrap();
        assert_eq!(store.take_approval("r1", 1).unwrap(), Some(reject));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cellgrid.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_cell(&available_cell("c1", SizeClass::Small, 3)).unwrap();
            store.put_approval("r1", 1, &ApprovalDecision::Proceed).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_cell("c1").unwrap().unwrap().wave_number, 3);
        assert_eq!(
            store.take_approval("r1", 1).unwrap(),
            Some(ApprovalDecision::Proceed)
        );
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_cells().unwrap().is_empty());
        assert!(store.list_tenants().unwrap().is_empty());
        assert!(store.list_routes().unwrap().is_empty());
        assert!(store.list_runs::<FakeRun>().unwrap().is_empty());
        assert!(store.get_route("nope").unwrap().is_none());
    }
}
