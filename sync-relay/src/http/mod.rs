//! HTTP endpoints for sync-relay.
//!
//! Provides the WebSocket relay endpoint, health checks and metrics.

pub mod health;
mod metrics;

use crate::server::SyncRelay;
use crate::session::ws_handler;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<SyncRelay>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health::health_handler));
    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_relay(config: Config) -> Arc<SyncRelay> {
        Arc::new(SyncRelay::new(config))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_relay(Config::default()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_router(test_relay(Config::default()));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_relay(config));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_endpoint_requires_upgrade() {
        let app = build_router(test_relay(Config::default()));

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
