//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use wasmfn_common::config_file::CorsConfig;

use crate::handler::{health_check, ingress, readiness_check};
use crate::state::AppState;

/// Build the main application router.
///
/// Routes:
/// - `ANY /live/{endpointID}/...` - Invoke the endpoint's active deployment
/// - `ANY /preview/{deploymentID}/...` - Invoke a specific deployment
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration, cors: &CorsConfig) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    // Ingress paths carry arbitrary trailing segments, so the handler parses
    // them itself and reports malformed paths and IDs as 400.
    Router::new()
        .merge(health_routes)
        .fallback(ingress)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors_layer(cors))
        .with_state(state)
}

/// Build the CORS layer. `"*"` allows any value.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(config.origin.trim()) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                warn!(origin = %config.origin, "Invalid CORS origin, allowing none");
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };

    let methods = if config.allowed_methods.trim() == "*" {
        AllowMethods::any()
    } else {
        AllowMethods::list(
            split_list(&config.allowed_methods).filter_map(|m| Method::from_bytes(m.as_bytes()).ok()),
        )
    };

    let headers = if config.allowed_headers.trim() == "*" {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            split_list(&config.allowed_headers).filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;
    use wasmfn_common::{MemoryMetricStore, MemoryStore, RuntimeConfig};

    fn setup_router() -> Router {
        let mut config = RuntimeConfig::default();
        config.engine.pooling_allocator = false;
        let state = AppState::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryMetricStore::new()),
        )
        .unwrap();
        build_router(state, Duration::from_secs(30), &CorsConfig::default())
    }

    async fn get_status(uri: &str) -> StatusCode {
        setup_router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(get_status("/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let response = setup_router()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["active_runtimes"], 0);
    }

    #[tokio::test]
    async fn test_malformed_id() {
        assert_eq!(get_status("/live/not-a-uuid/x").await, StatusCode::BAD_REQUEST);
        assert_eq!(get_status("/preview/").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(get_status(&format!("/live/{id}/")).await, StatusCode::NOT_FOUND);
        assert_eq!(
            get_status(&format!("/preview/{id}/x")).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_unrouted_path() {
        assert_eq!(get_status("/functions/hello").await, StatusCode::BAD_REQUEST);
        assert_eq!(get_status("/favicon.ico").await, StatusCode::BAD_REQUEST);
        assert_eq!(get_status("/").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_exact_origin() {
        let cors = CorsConfig {
            origin: "https://localhost".into(),
            allowed_methods: "GET, POST".into(),
            allowed_headers: "Content-Type".into(),
        };
        let app = Router::new()
            .route("/health", get(health_check))
            .layer(cors_layer(&cors));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://localhost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://localhost"
        );
    }
}
