//! `celld route` — a single routing decision, for operators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cell_core::config::RouterConfig;
use cellgrid_router::{
    CachedMappingStore, FileMappingSource, MappingStore, RouteOutcome, RoutedOrigin,
    StateMappingStore, TenantRouter,
};
use cellgrid_state::StateStore;
use serde_json::json;

/// Where the mapping table is read from.
pub enum Source {
    File(PathBuf),
    Store(PathBuf),
}

fn mapping_store(config: &RouterConfig, source: Source) -> anyhow::Result<Arc<dyn MappingStore>> {
    Ok(match source {
        Source::File(path) => Arc::new(CachedMappingStore::new(
            FileMappingSource::new(path),
            Duration::from_secs(config.mapping_cache_ttl_secs),
        )),
        Source::Store(dir) => {
            let store = StateStore::open(&dir.join(crate::serve::DB_FILE))?;
            Arc::new(StateMappingStore::new(store))
        }
    })
}

pub async fn decide(
    config: &RouterConfig,
    source: Source,
    authorization: &str,
    path: &str,
) -> anyhow::Result<serde_json::Value> {
    let router = TenantRouter::new(mapping_store(config, source)?, config.clone())?;
    let request = http::Request::builder()
        .uri(path)
        .header(http::header::AUTHORIZATION, authorization)
        .body(())?;

    Ok(match router.route(request).await {
        RouteOutcome::Routed(request) => json!({
            "decision": "routed",
            "uri": request.uri().to_string(),
            "origin": request.extensions().get::<RoutedOrigin>(),
            "tenant_header": request
                .headers()
                .get(config.tenant_header.as_str())
                .and_then(|v| v.to_str().ok()),
        }),
        RouteOutcome::Rejected(rejection) => json!({
            "decision": "rejected",
            "kind": rejection.kind,
            "status": rejection.status.as_u16(),
            "body": rejection.body,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "Bearer header.eyJjdXN0b206dGVuYW50SWQiOiJ0MSJ9.sig";

    fn snapshot(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("routes.json");
        std::fs::write(&path, r#"{"t1":"https://cell-a.example.com/app/"}"#).unwrap();
        path
    }

    #[tokio::test]
    async fn routes_from_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let decision = decide(
            &RouterConfig::default(),
            Source::File(snapshot(&dir)),
            TOKEN,
            "/orders?page=2",
        )
        .await
        .unwrap();
        assert_eq!(decision["decision"], "routed");
        assert_eq!(decision["uri"], "https://cell-a.example.com/app/orders?page=2");
        assert_eq!(decision["origin"]["hostname"], "cell-a.example.com");
        assert_eq!(decision["tenant_header"], "t1");
    }

    #[tokio::test]
    async fn reports_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let decision = decide(
            &RouterConfig::default(),
            Source::File(snapshot(&dir)),
            "Bearer not-a-jwt",
            "/",
        )
        .await
        .unwrap();
        assert_eq!(decision["decision"], "rejected");
        assert_eq!(decision["kind"], "auth_rejected");
        assert_eq!(decision["status"], 401);
    }

    #[tokio::test]
    async fn empty_store_is_not_routable() {
        let dir = tempfile::tempdir().unwrap();
        let decision = decide(
            &RouterConfig::default(),
            Source::Store(dir.path().to_path_buf()),
            TOKEN,
            "/",
        )
        .await
        .unwrap();
        assert_eq!(decision["kind"], "routing_not_found");
        assert_eq!(decision["status"], 400);
    }
}
