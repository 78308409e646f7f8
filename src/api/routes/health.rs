//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (ready to accept relay sessions)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Kubernetes liveness probe.
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Kubernetes readiness probe.
/// Returns 503 while the relay session limit is reached or shutdown has
/// begun.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if accepting_sessions(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
///
/// Full health status with component details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let accepting = accepting_sessions(&state).await;
    let influx_configured = state.influx.is_configured();

    let status = if accepting && influx_configured {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        broker: state.relay.broker(),
        influx: if influx_configured {
            "configured"
        } else {
            "not_configured"
        }
        .to_string(),
        active_sessions: state.session_count().await,
        max_sessions: state.relay.registry().max_sessions(),
        auth_enabled: state.auth.is_enabled(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn accepting_sessions(state: &AppState) -> bool {
    !state.relay.shutdown_token().is_cancelled() && !state.relay.registry().at_capacity().await
}
