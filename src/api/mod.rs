//! Dashbridge HTTP Gateway
//!
//! HTTP layer in front of the relay, built with Axum.
//!
//! # Endpoints
//!
//! ## Bridge
//! - `GET /api/mqtt/*` - WebSocket relay to the MQTT broker
//!
//! ## Time-series database
//! - `GET /api/influxdb/test*` - Smoke test
//! - `ANY /api/influxdb/*` - Reverse proxy with CORS headers
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! Everything else is served from the static assets directory when one is
//! configured. With `auth.enabled`, every `/api` route sits behind the
//! authentication gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use dashbridge::api::{serve, AppState};
//! use dashbridge::broker::MqttConnector;
//! use dashbridge::config::Config;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let connector = Arc::new(MqttConnector::new(config.broker.settings()?));
//!     let shutdown = CancellationToken::new();
//!
//!     let state = AppState::new(config, connector, shutdown.clone())?;
//!     serve(state, shutdown).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::RouteHandler;
pub use state::AppState;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::auth::require_auth;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    let mut api_routes = Router::new();
    for handler in routes::api_handlers() {
        api_routes = api_routes.nest(handler.prefix(), handler.routes());
    }
    let api_routes = api_routes.layer(middleware::from_fn_with_state(
        Arc::clone(&shared_state.auth),
        require_auth,
    ));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health))
        .layer(CorsLayer::permissive());

    let mut router = Router::new()
        .nest("/api", api_routes)
        .nest("/health", health_routes);

    if let Some(dir) = &shared_state.config.server.static_assets {
        tracing::info!(path = %dir, "Serving static assets");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::new())
        .with_state(shared_state)
}

/// Start the server and run until a shutdown signal arrives.
///
/// Cancels `shutdown` once the signal is received so that every live relay
/// session tears down before the listener is dropped.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<(), ApiError> {
    let addr = state.config.server.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Dashbridge listening on {}", addr);

    let token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    shutdown.cancel();
    tracing::info!("Dashbridge shut down gracefully");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::{Config, UserCredentials};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app(config: Config) -> Router {
        let state = AppState::new(
            config,
            Arc::new(MemoryBroker::new()),
            CancellationToken::new(),
        )
        .unwrap();
        build_router(state)
    }

    fn protected_config() -> Config {
        let mut config = Config::default();
        config.auth.enabled = true;
        config.auth.tokens = vec!["s3cret".to_string()];
        config.auth.users = vec![UserCredentials {
            name: "admin".to_string(),
            password: "admin".to_string(),
        }];
        config
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let response = get(create_test_app(Config::default()), "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let response = get(create_test_app(Config::default()), "/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let response = get(create_test_app(Config::default()), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["broker"], "memory://local");
        assert_eq!(body["active_sessions"], 0);
        assert_eq!(body["influx"], "not_configured");
    }

    #[tokio::test]
    async fn test_influx_smoke_route() {
        for uri in ["/api/influxdb/test", "/api/influxdb/testing/123"] {
            let response = get(create_test_app(Config::default()), uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&bytes[..], b"test\n");
        }
    }

    #[tokio::test]
    async fn test_influx_without_upstream_is_unavailable() {
        let response = get(create_test_app(Config::default()), "/api/influxdb/api/v2/query").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_influx_preflight() {
        let response = create_test_app(Config::default())
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/influxdb/api/v2/query")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_mqtt_requires_upgrade() {
        // Routed to the upgrade handler, which rejects a plain GET that
        // lacks `Connection: upgrade`.
        for uri in ["/api/mqtt", "/api/mqtt/sensors/temp"] {
            let response = get(create_test_app(Config::default()), uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        let response = get(create_test_app(Config::default()), "/api/mqttx").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_rejects_anonymous() {
        let response = get(create_test_app(protected_config()), "/api/influxdb/test").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=\"restricted\", charset=\"UTF-8\""
        );
    }

    #[tokio::test]
    async fn test_auth_accepts_token_and_basic() {
        let response = get(create_test_app(protected_config()), "/api/influxdb/test?token=s3cret").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = create_test_app(protected_config())
            .oneshot(
                Request::builder()
                    .uri("/api/influxdb/test")
                    .header(header::AUTHORIZATION, "Basic YWRtaW46YWRtaW4=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_rejects_malformed_basic() {
        let response = create_test_app(protected_config())
            .oneshot(
                Request::builder()
                    .uri("/api/influxdb/test")
                    .header(header::AUTHORIZATION, "Basic bm9jb2xvbg==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_is_not_gated() {
        let response = get(create_test_app(protected_config()), "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_without_assets_is_not_found() {
        let response = get(create_test_app(Config::default()), "/index.html").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
