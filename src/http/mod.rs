pub mod context;
pub mod dispatch;
pub mod handler;
pub mod handlers;
pub mod state;

pub use context::{RequestContext, StatusProbe};
pub use handler::{Handler, HandlerRequest, HandlerResult};

use axum::{Router, http::StatusCode};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Slack between the handler deadline inside the chain and the outer backstop.
const TIMEOUT_BACKSTOP_GRACE: Duration = Duration::from_secs(1);

/// Every request goes to the single dispatch fallback; routing and policies
/// live in the gateway's own table and chain, not in axum's router.
///
/// The request timeout is enforced by [`dispatch::RouteDispatch`], so its 408
/// is logged and carries CORS headers. The `TimeoutLayer` only catches a
/// chain that stalls outside the handler; that 408 bypasses the policies.
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = state.config.request_timeout() + TIMEOUT_BACKSTOP_GRACE;

    Router::new()
        .fallback(dispatch::dispatch)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UnconfiguredProvider;
    use crate::config::Config;
    use axum::{
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{Request, header},
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn app(peer: &str) -> (Router, Arc<AppState>) {
        let state = crate::build_state(Config::default(), Arc::new(UnconfiguredProvider)).unwrap();
        let peer: SocketAddr = peer.parse().unwrap();
        let router = create_router(state.clone()).layer(MockConnectInfo(peer));
        (router, state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping_through_full_chain() {
        let (app, state) = app("127.0.0.1:50000");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(body_json(response).await["message"], "ok");
        assert_eq!(state.access_log.total_entries(), 1);
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let (app, state) = app("127.0.0.1:50000");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stock/search?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
        assert_eq!(response.headers()[header::ALLOW], "GET");
        assert_eq!(state.access_log.total_entries(), 2);
    }

    #[tokio::test]
    async fn test_disallowed_client_gets_403() {
        let (app, state) = app("203.0.113.7:41000");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 403);
        assert_eq!(body_json(response).await["status"], 403);
        assert_eq!(state.metrics.http_access_denied_total.get(), 1);
    }

    #[tokio::test]
    async fn test_preflight_never_reaches_allow_list() {
        let (app, state) = app("203.0.113.7:41000");

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/stock/search")
                    .header("origin", "https://quotes.example")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 204);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://quotes.example"
        );
        assert_eq!(state.metrics.http_access_denied_total.get(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_503() {
        let (app, _) = app("127.0.0.1:50000");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/user/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _) = app("[::1]:50000");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("http_inflight_requests"));
    }
}
