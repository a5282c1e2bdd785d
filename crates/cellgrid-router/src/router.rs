//! Tenant routing — rewrites a request to the cell serving its tenant.
//!
//! `TenantRouter::route` runs on the request's critical path:
//!
//! 1. read the `Authorization` header (missing or empty → 401)
//! 2. extract the tenant claim from the token payload (malformed → 401)
//! 3. look the tenant up in the mapping store (absent → 400; store
//!    failure or malformed stored URL → 400, logged separately)
//! 4. rewrite the request URI and `host` to the cell, inject the tenant
//!    header and attach the outbound transport settings
//!
//! Nothing escapes `route`: every failure becomes one of the two fixed
//! rejections, so the router always fails closed.

use std::sync::Arc;
use std::time::Duration;

use cell_core::config::RouterConfig;
use cell_core::{CellEndpoint, TlsProtocol};
use http::header::{AUTHORIZATION, HOST, InvalidHeaderName};
use http::{HeaderName, HeaderValue, Request, StatusCode, Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mapping::MappingStore;
use crate::token::extract_claim;

pub const UNAUTHORIZED_BODY: &str = "Not authorized";
pub const NOT_ROUTABLE_BODY: &str = "Valid TenantId and Authorization headers are required";

/// Characters left alone when logging the request path.
const PATH_LOG_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Origin path as written to the routing log, encoded like a URI component.
fn encode_for_log(path: &str) -> String {
    utf8_percent_encode(path, PATH_LOG_SET).to_string()
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Missing, malformed or claim-less token.
    AuthRejected,
    /// Tenant has no mapping entry.
    RoutingNotFound,
    /// Lookup failed. Answers like `RoutingNotFound`, logged at warn.
    StoreUnavailable,
}

/// A fixed rejection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub status: StatusCode,
    pub body: &'static str,
}

impl Rejection {
    pub fn new(kind: RejectionKind) -> Self {
        match kind {
            RejectionKind::AuthRejected => Self {
                kind,
                status: StatusCode::UNAUTHORIZED,
                body: UNAUTHORIZED_BODY,
            },
            RejectionKind::RoutingNotFound | RejectionKind::StoreUnavailable => Self {
                kind,
                status: StatusCode::BAD_REQUEST,
                body: NOT_ROUTABLE_BODY,
            },
        }
    }
}

/// Outbound hop parameters for a routed request, attached as a request
/// extension for whatever forwards the request to the cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedOrigin {
    pub tenant_id: String,
    pub hostname: String,
    pub port: u16,
    /// Origin path prefix, without a trailing slash.
    pub path: String,
    pub protocol: &'static str,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub tls_floor: TlsProtocol,
}

#[derive(Debug)]
pub enum RouteOutcome<B> {
    Routed(Request<B>),
    Rejected(Rejection),
}

impl<B> RouteOutcome<B> {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            RouteOutcome::Routed(_) => None,
            RouteOutcome::Rejected(r) => Some(*r),
        }
    }
}

pub struct TenantRouter {
    store: Arc<dyn MappingStore>,
    config: RouterConfig,
    tenant_header: HeaderName,
}

impl TenantRouter {
    pub fn new(store: Arc<dyn MappingStore>, config: RouterConfig) -> Result<Self, InvalidHeaderName> {
        let tenant_header = HeaderName::from_bytes(config.tenant_header.as_bytes())?;
        Ok(Self {
            store,
            config,
            tenant_header,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Decide where a request goes, rewriting it in place on success.
    pub async fn route<B>(&self, mut request: Request<B>) -> RouteOutcome<B> {
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if authorization.is_empty() {
            debug!("rejecting request without authorization");
            return RouteOutcome::Rejected(Rejection::new(RejectionKind::AuthRejected));
        }

        let tenant_id = match extract_claim(authorization, &self.config.tenant_claim) {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "rejecting malformed token");
                return RouteOutcome::Rejected(Rejection::new(RejectionKind::AuthRejected));
            }
        };
        let Ok(tenant_value) = HeaderValue::from_str(&tenant_id) else {
            debug!("rejecting tenant claim that is not a valid header value");
            return RouteOutcome::Rejected(Rejection::new(RejectionKind::AuthRejected));
        };

        let cell_url = match self.store.get(&tenant_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!(tenant_id = %tenant_id, "no cell mapping for tenant");
                return RouteOutcome::Rejected(Rejection::new(RejectionKind::RoutingNotFound));
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "mapping store unavailable");
                return RouteOutcome::Rejected(Rejection::new(RejectionKind::StoreUnavailable));
            }
        };

        let endpoint = match CellEndpoint::parse(&cell_url) {
            Ok(ep) => ep,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "malformed cell mapping value");
                return RouteOutcome::Rejected(Rejection::new(RejectionKind::StoreUnavailable));
            }
        };

        let port = endpoint.port.unwrap_or(self.config.origin_port);
        let authority = if port == 443 {
            endpoint.hostname.clone()
        } else {
            format!("{}:{}", endpoint.hostname, port)
        };
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let rewritten = format!("https://{authority}{}{path_and_query}", endpoint.path);
        let (Ok(uri), Ok(host)) = (rewritten.parse::<Uri>(), HeaderValue::from_str(&authority)) else {
            warn!(tenant_id = %tenant_id, %cell_url, "cell mapping does not form a valid origin");
            return RouteOutcome::Rejected(Rejection::new(RejectionKind::StoreUnavailable));
        };

        if self.config.logging_enabled {
            info!(
                tenant_id = %tenant_id,
                method = %request.method(),
                cell_endpoint = %cell_url,
                hostname = %endpoint.hostname,
                encoded_path = %encode_for_log(&endpoint.path),
                "routing request to cell"
            );
        }

        *request.uri_mut() = uri;
        let headers = request.headers_mut();
        headers.insert(HOST, host);
        headers.insert(self.tenant_header.clone(), tenant_value);
        request.extensions_mut().insert(RoutedOrigin {
            tenant_id,
            hostname: endpoint.hostname,
            port,
            path: endpoint.path,
            protocol: "https",
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
            connect_timeout: Duration::from_secs(self.config.connect_timeout_secs),
            tls_floor: self.config.tls_floor,
        });

        RouteOutcome::Routed(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingError, StaticMappingStore};
    use async_trait::async_trait;

    const TOKEN: &str = "header.eyJjdXN0b206dGVuYW50SWQiOiJ0MSJ9.sig";

    struct BrokenStore;

    #[async_trait]
    impl MappingStore for BrokenStore {
        async fn get(&self, _tenant_id: &str) -> Result<Option<String>, MappingError> {
            Err(MappingError::Store("connection refused".into()))
        }
    }

    fn router_with(routes: &[(&str, &str)]) -> TenantRouter {
        let store: StaticMappingStore = routes
            .iter()
            .map(|(t, u)| (t.to_string(), u.to_string()))
            .collect();
        TenantRouter::new(Arc::new(store), RouterConfig::default()).unwrap()
    }

    fn request(uri: &str, authorization: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(auth) = authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(()).unwrap()
    }

    #[tokio::test]
    async fn routes_known_tenant_to_its_cell() {
        let router = router_with(&[("t1", "https://cell-a.example.com/app")]);
        let outcome = router.route(request("/orders?page=2", Some(TOKEN))).await;

        let RouteOutcome::Routed(req) = outcome else {
            panic!("expected routed request");
        };
        assert_eq!(req.headers()["tenantid"], "t1");
        assert_eq!(req.headers()[HOST], "cell-a.example.com");
        assert_eq!(
            req.uri().to_string(),
            "https://cell-a.example.com/app/orders?page=2"
        );

        let origin = req.extensions().get::<RoutedOrigin>().unwrap();
        assert_eq!(origin.hostname, "cell-a.example.com");
        assert_eq!(origin.path, "/app");
        assert_eq!(origin.port, 443);
        assert_eq!(origin.protocol, "https");
        assert_eq!(origin.read_timeout, Duration::from_secs(30));
        assert_eq!(origin.connect_timeout, Duration::from_secs(5));
        assert_eq!(origin.tls_floor, TlsProtocol::Tls1_2);
    }

    #[tokio::test]
    async fn unknown_tenant_gets_fixed_400() {
        let router = router_with(&[]);
        let rejection = router.route(request("/", Some(TOKEN))).await.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::RoutingNotFound);
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            rejection.body,
            "Valid TenantId and Authorization headers are required"
        );
    }

    #[tokio::test]
    async fn missing_or_empty_authorization_is_401() {
        let router = router_with(&[("t1", "https://cell-a.example.com/app")]);
        for auth in [None, Some(""), Some("   ")] {
            let rejection = router.route(request("/", auth)).await.rejection().unwrap();
            assert_eq!(rejection.kind, RejectionKind::AuthRejected);
            assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
            assert_eq!(rejection.body, "Not authorized");
        }
    }

    #[tokio::test]
    async fn malformed_tokens_fail_closed() {
        let router = router_with(&[("t1", "https://cell-a.example.com/app")]);
        for auth in ["not-a-token", "a.b", "h.%%%.s", "h.bm90IGpzb24=.s", "h.eyJzdWIiOiJ4In0=.s"] {
            let rejection = router.route(request("/", Some(auth))).await.rejection().unwrap();
            assert_eq!(rejection.status, StatusCode::UNAUTHORIZED, "token {auth}");
        }
    }

    #[tokio::test]
    async fn store_failure_fails_closed_as_400() {
        let router = TenantRouter::new(Arc::new(BrokenStore), RouterConfig::default()).unwrap();
        let rejection = router.route(request("/", Some(TOKEN))).await.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StoreUnavailable);
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert_eq!(rejection.body, NOT_ROUTABLE_BODY);
    }

    #[tokio::test]
    async fn malformed_mapping_value_fails_closed() {
        let router = router_with(&[("t1", "cell-a.example.com/app")]);
        let rejection = router.route(request("/", Some(TOKEN))).await.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StoreUnavailable);
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn explicit_port_and_bare_host() {
        let router = router_with(&[("t1", "https://cell-b.example.com:8443")]);
        let RouteOutcome::Routed(req) = router.route(request("/health", Some(TOKEN))).await else {
            panic!("expected routed request");
        };
        assert_eq!(req.uri().to_string(), "https://cell-b.example.com:8443/health");
        assert_eq!(req.headers()[HOST], "cell-b.example.com:8443");
        assert_eq!(req.extensions().get::<RoutedOrigin>().unwrap().path, "");
    }

    #[tokio::test]
    async fn custom_tenant_header() {
        let config = RouterConfig {
            tenant_header: "x-tenant-id".to_string(),
            logging_enabled: false,
            ..RouterConfig::default()
        };
        let store: StaticMappingStore = [("t1".to_string(), "https://c.example.com/p".to_string())]
            .into_iter()
            .collect();
        let router = TenantRouter::new(Arc::new(store), config).unwrap();
        let RouteOutcome::Routed(req) = router.route(request("/", Some(TOKEN))).await else {
            panic!("expected routed request");
        };
        assert_eq!(req.headers()["x-tenant-id"], "t1");
    }

    #[test]
    fn origin_path_is_component_encoded_for_logs() {
        assert_eq!(encode_for_log("/app/v1"), "%2Fapp%2Fv1");
        assert_eq!(encode_for_log("/a b(1)"), "%2Fa%20b(1)");
        assert_eq!(encode_for_log(""), "");
    }

    #[test]
    fn invalid_header_name_is_refused() {
        let config = RouterConfig {
            tenant_header: "bad header".to_string(),
            ..RouterConfig::default()
        };
        assert!(TenantRouter::new(Arc::new(StaticMappingStore::new()), config).is_err());
    }
}
