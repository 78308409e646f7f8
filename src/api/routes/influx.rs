//! Time-Series Database Routes
//!
//! - GET /api/influxdb/test* - Smoke test, answers `test\n`
//! - ANY /api/influxdb/* - Reverse proxy to the configured database

use axum::{
    extract::{Request, State},
    http::Method,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;

use super::RouteHandler;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// Path prefix of the smoke-test route, matched like `test*`
const SMOKE_TEST_PREFIX: &str = "/test";

pub struct InfluxRoutes;

impl RouteHandler for InfluxRoutes {
    fn prefix(&self) -> &'static str {
        "/influxdb"
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/", any(influx_proxy))
            .route("/*path", any(influx_proxy))
    }
}

/// ANY /api/influxdb/*
///
/// The request URI arrives with the mount prefix already removed.
pub async fn influx_proxy(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ApiResult<Response> {
    if *request.method() == Method::GET && request.uri().path().starts_with(SMOKE_TEST_PREFIX) {
        return Ok("test\n".into_response());
    }

    Ok(state.influx.forward(request).await?)
}
