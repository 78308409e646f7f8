//! API Routes
//!
//! Route handlers organized by functionality. Each `/api` handler group
//! implements [`RouteHandler`] and mounts itself under its own prefix.

pub mod health;
pub mod influx;
pub mod mqtt;

use axum::Router;
use std::sync::Arc;

use crate::api::state::AppState;

/// A group of routes mounted under `/api`
pub trait RouteHandler: Send + Sync {
    /// Mount point below `/api`, e.g. `/mqtt`
    fn prefix(&self) -> &'static str;

    /// Routes relative to [`prefix`](Self::prefix)
    fn routes(&self) -> Router<Arc<AppState>>;
}

/// Every `/api` handler group
pub fn api_handlers() -> Vec<Box<dyn RouteHandler>> {
    vec![Box::new(influx::InfluxRoutes), Box::new(mqtt::MqttRoutes)]
}
