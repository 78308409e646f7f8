//! # Dashbridge
//!
//! Backend for a home dashboard: streams MQTT topics to browsers over
//! WebSocket and proxies the time-series database the dashboard charts
//! from.
//!
//! ## Features
//!
//! - **Dynamic subscriptions**: each WebSocket client picks, and changes,
//!   the topics it wants over the life of one connection
//! - **Bounded delivery**: slow clients lose messages instead of stalling
//!   the broker connection
//! - **Clean teardown**: every broker subscription is released exactly once
//! - **Gateway**: CORS reverse proxy, Basic/token auth, static assets
//!
//! ## Modules
//!
//! - [`relay`]: Relay coordinator, sessions and the delivery path
//! - [`broker`]: Broker client trait, MQTT and in-memory adapters
//! - [`transport`]: Client-facing message streams (WebSocket, in-memory)
//! - [`api`]: HTTP gateway with Axum
//! - [`auth`]: Authentication gate for `/api`
//! - [`proxy`]: Reverse proxy with CORS headers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dashbridge::broker::MemoryBroker;
//! use dashbridge::relay::{RelayConfig, RelayCoordinator};
//! use dashbridge::transport::ChannelTransport;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     let relay = RelayCoordinator::new(
//!         RelayConfig::default(),
//!         Arc::new(broker.clone()),
//!         CancellationToken::new(),
//!     );
//!
//!     let (transport, mut client) = ChannelTransport::pair();
//!     let session = tokio::spawn(async move { relay.handle_connection(transport).await });
//!
//!     client.send("sensors/temp");
//!     // ... once subscribed:
//!     broker.publish("sensors/temp", "21.5").await;
//!     println!("{:?}", client.recv().await);
//!
//!     client.hang_up();
//!     let report = session.await??;
//!     println!("forwarded {} messages", report.forwarded);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod relay;
pub mod transport;

// Re-export top-level types for convenience
pub use relay::{
    RelayConfig, RelayCoordinator, RelayError, RelayResult, Session, SessionReport, SessionState,
};

pub use broker::{
    BrokerClient, BrokerConnector, BrokerError, Delivery, MemoryBroker, MessageHandler,
    MqttConnector, MqttSettings,
};

pub use transport::{
    ChannelTransport, MessageSink, MessageSource, TransportError, TransportSession,
    WebSocketTransport,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use auth::{AuthError, AuthGate};

pub use proxy::{ProxyError, ProxyOptions, ReverseProxy};

pub use config::{Config, ConfigError, LoggingConfig};
