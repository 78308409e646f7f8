//! Data Transfer Objects
//!
//! Response types for the API endpoints.

use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded
    pub status: String,
    /// Broker address relay sessions connect to
    pub broker: String,
    /// Time-series proxy status: configured, not_configured
    pub influx: String,
    /// Live relay sessions
    pub active_sessions: usize,
    /// Relay session limit
    pub max_sessions: usize,
    /// Whether `/api` requires credentials
    pub auth_enabled: bool,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
