//! Tenant → cell mapping stores.
//!
//! The router only needs `get(tenant_id) -> Option<url>`. Three stores
//! implement it:
//!
//! - [`StateMappingStore`] reads the routing table of the local state store.
//! - [`StaticMappingStore`] holds a fixed in-memory map (tests, diagnostics).
//! - [`CachedMappingStore`] serves a snapshot loaded from a
//!   [`MappingSource`], reloads it after a TTL and keeps serving the last
//!   good snapshot if a reload fails.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cellgrid_state::StateStore;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("state store lookup failed: {0}")]
    Store(String),
    #[error("mapping source unavailable: {0}")]
    Source(String),
    #[error("mapping snapshot is malformed: {0}")]
    Format(String),
}

/// Read side of the mapping table consulted on every routed request.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<String>, MappingError>;
}

// ── State-backed ──────────────────────────────────────────────────

pub struct StateMappingStore {
    store: StateStore,
}

impl StateMappingStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MappingStore for StateMappingStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<String>, MappingError> {
        self.store
            .get_route(tenant_id)
            .map_err(|e| MappingError::Store(e.to_string()))
    }
}

// ── Static ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StaticMappingStore {
    routes: RwLock<HashMap<String, String>>,
}

impl StaticMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: &str, cell_url: &str) {
        if let Ok(mut routes) = self.routes.write() {
            routes.insert(tenant_id.to_string(), cell_url.to_string());
        }
    }

    pub fn remove(&self, tenant_id: &str) {
        if let Ok(mut routes) = self.routes.write() {
            routes.remove(tenant_id);
        }
    }
}

impl FromIterator<(String, String)> for StaticMappingStore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            routes: RwLock::new(iter.into_iter().collect()),
        }
    }
}

#[async_trait]
impl MappingStore for StaticMappingStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<String>, MappingError> {
        let routes = self
            .routes
            .read()
            .map_err(|_| MappingError::Store("static mapping lock poisoned".to_string()))?;
        Ok(routes.get(tenant_id).cloned())
    }
}

// ── Cached snapshot ───────────────────────────────────────────────

/// Loads a complete mapping snapshot.
#[async_trait]
pub trait MappingSource: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, String>, MappingError>;
}

/// A JSON object file, `{"<tenant_id>": "https://<host>/<path>", ...}`,
/// or a saved `GET /api/v1/routes` response.
pub struct FileMappingSource {
    path: PathBuf,
}

impl FileMappingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MappingSource for FileMappingSource {
    async fn load(&self) -> Result<HashMap<String, String>, MappingError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| MappingError::Source(format!("{}: {e}", self.path.display())))?;
        let file: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| MappingError::Format(format!("{}: {e}", self.path.display())))?;
        Ok(match file {
            SnapshotFile::Bare(routes) | SnapshotFile::Envelope { data: routes } => routes,
        })
    }
}

/// Accepts the bare map or the API response envelope around it.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Envelope { data: HashMap<String, String> },
    Bare(HashMap<String, String>),
}

struct Snapshot {
    routes: Arc<HashMap<String, String>>,
    checked_at: Instant,
}

pub struct CachedMappingStore<S> {
    source: S,
    ttl: Duration,
    snapshot: tokio::sync::RwLock<Option<Snapshot>>,
}

impl<S: MappingSource> CachedMappingStore<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: tokio::sync::RwLock::new(None),
        }
    }

    async fn current(&self) -> Result<Arc<HashMap<String, String>>, MappingError> {
        {
            let guard = self.snapshot.read().await;
            if let Some(snap) = guard.as_ref() {
                if snap.checked_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&snap.routes));
                }
            }
        }

        let mut guard = self.snapshot.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(snap) = guard.as_ref() {
            if snap.checked_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&snap.routes));
            }
        }

        match self.source.load().await {
            Ok(routes) => {
                debug!(entries = routes.len(), "mapping snapshot reloaded");
                let routes = Arc::new(routes);
                *guard = Some(Snapshot {
                    routes: Arc::clone(&routes),
                    checked_at: Instant::now(),
                });
                Ok(routes)
            }
            Err(e) => match guard.as_mut() {
                Some(snap) => {
                    warn!(error = %e, "mapping reload failed, serving last known good snapshot");
                    snap.checked_at = Instant::now();
                    Ok(Arc::clone(&snap.routes))
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl<S: MappingSource> MappingStore for CachedMappingStore<S> {
    async fn get(&self, tenant_id: &str) -> Result<Option<String>, MappingError> {
        Ok(self.current().await?.get(tenant_id).cloned())
    }
}
