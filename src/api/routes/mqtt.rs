//! MQTT Bridge Routes
//!
//! - GET /api/mqtt/* - WebSocket upgrade into a relay session
//!
//! Every text or binary frame the client sends names a topic to stream
//! (`unsubscribe:<topic>` releases one); broker messages on those topics
//! come back as frames.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;

use super::RouteHandler;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::relay::RelayError;
use crate::transport::WebSocketTransport;

pub struct MqttRoutes;

impl RouteHandler for MqttRoutes {
    fn prefix(&self) -> &'static str {
        "/mqtt"
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/", get(mqtt_upgrade))
            .route("/*path", get(mqtt_upgrade))
    }
}

/// GET /api/mqtt/*
///
/// Refuses the upgrade with 503 when the session limit is reached;
/// otherwise hands the socket to the relay coordinator.
pub async fn mqtt_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    if state.relay.registry().at_capacity().await {
        return Err(RelayError::TooManySessions(state.relay.registry().max_sessions()).into());
    }

    let relay = Arc::clone(&state.relay);
    Ok(ws.on_upgrade(move |socket| async move {
        match relay.handle_connection(WebSocketTransport::new(socket)).await {
            Ok(report) => {
                tracing::debug!(session_id = %report.session_id, "WebSocket bridge finished");
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket bridge could not start");
            }
        }
    }))
}
