//! axum integration for the tenant router.
//!
//! [`tenant_routing`] is a `from_fn_with_state` middleware: routed
//! requests continue down the stack rewritten, rejections short-circuit
//! with the fixed JSON body.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use crate::router::{Rejection, RouteOutcome, RoutedOrigin, TenantRouter};

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub async fn tenant_routing(
    State(router): State<Arc<TenantRouter>>,
    request: Request,
    next: Next,
) -> Response {
    match router.route(request).await {
        RouteOutcome::Routed(request) => next.run(request).await,
        RouteOutcome::Rejected(rejection) => rejection.into_response(),
    }
}

/// Report the routing decision instead of forwarding.
async fn describe_route(request: Request) -> Response {
    match request.extensions().get::<RoutedOrigin>() {
        Some(origin) => Json(serde_json::json!({
            "uri": request.uri().to_string(),
            "origin": origin,
        }))
        .into_response(),
        None => http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// A router that runs every request through [`tenant_routing`] and
/// answers with the resolved origin. Mounted by the daemon as a
/// diagnostics edge for operators.
pub fn decision_router(router: Arc<TenantRouter>) -> axum::Router {
    axum::Router::new()
        .route("/", any(describe_route))
        .route("/{*path}", any(describe_route))
        .layer(middleware::from_fn_with_state(router, tenant_routing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::StaticMappingStore;
    use axum::body::Body;
    use cell_core::config::RouterConfig;
    use http::StatusCode;
    use tower::ServiceExt;

    const TOKEN: &str = "Bearer header.eyJjdXN0b206dGVuYW50SWQiOiJ0MSJ9.sig";

    fn app() -> axum::Router {
        let store: StaticMappingStore = [("t1".to_string(), "https://cell-a.example.com/app".to_string())]
            .into_iter()
            .collect();
        let router = TenantRouter::new(Arc::new(store), RouterConfig::default()).unwrap();
        decision_router(Arc::new(router))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn routed_request_reaches_handler() {
        let req = Request::builder()
            .uri("/orders/7")
            .header("authorization", TOKEN)
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["uri"], "https://cell-a.example.com/app/orders/7");
        assert_eq!(json["origin"]["tenant_id"], "t1");
        assert_eq!(json["origin"]["hostname"], "cell-a.example.com");
    }

    #[tokio::test]
    async fn rejection_is_json_string_body() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()["content-type"], "application/json");
        assert_eq!(body_json(resp).await, serde_json::json!("Not authorized"));
    }

    #[tokio::test]
    async fn unmapped_tenant_is_400() {
        let req = Request::builder()
            .uri("/")
            .header("authorization", "h.eyJjdXN0b206dGVuYW50SWQiOiJ0ZW5hbnQtNDIiLCJlbWFpbCI6ImFAYi5jIn0.s")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!("Valid TenantId and Authorization headers are required")
        );
    }
}
