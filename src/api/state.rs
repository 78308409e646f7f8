//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthGate;
use crate::broker::BrokerConnector;
use crate::config::Config;
use crate::proxy::{ProxyError, ProxyOptions, ReverseProxy};
use crate::relay::RelayCoordinator;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup
    pub config: Arc<Config>,
    /// Relay coordinator for `/api/mqtt` sessions
    pub relay: Arc<RelayCoordinator>,
    /// Time-series database proxy for `/api/influxdb`
    pub influx: Arc<ReverseProxy>,
    /// Authentication gate for `/api`
    pub auth: Arc<AuthGate>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Build the state from a loaded configuration.
    ///
    /// Cancelling `shutdown` tears down every live relay session.
    pub fn new(
        config: Config,
        connector: Arc<dyn BrokerConnector>,
        shutdown: CancellationToken,
    ) -> Result<Self, ProxyError> {
        let relay = RelayCoordinator::new(config.relay.to_relay_config(), connector, shutdown);
        let influx = ReverseProxy::new(ProxyOptions::from(&config.influx))?;
        let auth = AuthGate::new(&config.auth);

        Ok(Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            influx: Arc::new(influx),
            auth: Arc::new(auth),
            start_time: Instant::now(),
        })
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get live relay session count
    pub async fn session_count(&self) -> usize {
        self.relay.registry().count().await
    }
}
