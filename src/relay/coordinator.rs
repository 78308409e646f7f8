//! Relay Coordinator
//!
//! Entry point called once per accepted client connection. Opens the
//! session's own broker connection, runs the receive loop and tears
//! everything down when the client goes away, a write fails or the server
//! shuts down.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerConnector;
use crate::transport::{MessageSource, TransportSession};

use super::error::RelayError;
use super::registry::SessionRegistry;
use super::session::{Session, SessionReport};

/// Tuning for relay sessions
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of each session's delivery channel
    pub delivery_capacity: usize,
    /// How long a broker callback may wait for room; zero drops at once
    pub enqueue_timeout: Duration,
    /// Upper bound on waiting for the forwarding task during teardown
    pub teardown_timeout: Duration,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delivery_capacity: 64,
            enqueue_timeout: Duration::ZERO,
            teardown_timeout: Duration::from_secs(2),
            max_sessions: 256,
        }
    }
}

/// Why a session's receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection
    ClientClosed,
    /// Reading from the client failed
    ReadFailed(String),
    /// Teardown was requested elsewhere: a write failure or server shutdown
    Cancelled,
}

/// Bridges client connections to the broker, one session per connection
pub struct RelayCoordinator {
    config: RelayConfig,
    connector: Arc<dyn BrokerConnector>,
    registry: SessionRegistry,
    shutdown: CancellationToken,
}

impl RelayCoordinator {
    /// Create a coordinator. Cancelling `shutdown` tears down every live
    /// session.
    pub fn new(
        config: RelayConfig,
        connector: Arc<dyn BrokerConnector>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = SessionRegistry::new(config.max_sessions);
        Self {
            config,
            connector,
            registry,
            shutdown,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Broker address sessions connect to
    pub fn broker(&self) -> String {
        self.connector.describe()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one bridged session to completion.
    ///
    /// Returns `BrokerUnavailable` without reading from the client when the
    /// broker cannot be reached, and `TooManySessions` when the session
    /// limit is reached. Everything that happens after setup is handled
    /// inside the session and summarised in the report.
    pub async fn handle_connection<T>(&self, transport: T) -> Result<SessionReport, RelayError>
    where
        T: TransportSession,
    {
        let (source, mut sink) = transport.split();

        let session_id = match self.registry.register().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Refusing relay session");
                sink.close().await;
                return Err(e);
            }
        };

        let broker = self.connector.open(&session_id);
        if let Err(e) = broker.connect().await {
            tracing::error!(
                session_id = %session_id,
                broker = %self.connector.describe(),
                error = %e,
                "Broker connect failed"
            );
            broker.disconnect().await;
            sink.close().await;
            self.registry.unregister(&session_id).await;
            return Err(RelayError::BrokerUnavailable(e.to_string()));
        }

        let session = Session::start(
            session_id.clone(),
            broker,
            sink,
            self.shutdown.child_token(),
            &self.config,
        );
        tracing::info!(
            session_id = %session_id,
            broker = %self.connector.describe(),
            "Relay session opened"
        );

        let end = self.run(&session, source).await;
        let report = session.report().await;
        let duration_secs = self
            .registry
            .unregister(&session_id)
            .await
            .map(|info| (chrono::Utc::now() - info.opened_at).num_seconds())
            .unwrap_or_default();

        tracing::info!(
            session_id = %session_id,
            end = ?end,
            duration_secs,
            topics = report.topics_subscribed,
            forwarded = report.forwarded,
            dropped = report.dropped,
            broker_degraded = report.broker_degraded,
            "Relay session closed"
        );
        Ok(report)
    }

    /// The session's receive loop. Every inbound message is a control
    /// message; the loop ends on end-of-stream, a read error or
    /// cancellation, and always closes the session before returning.
    pub async fn run(&self, session: &Session, mut source: Box<dyn MessageSource>) -> SessionEnd {
        let cancel = session.cancellation().clone();

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                next = source.receive() => next,
            };

            match next.map_err(RelayError::from) {
                Ok(payload) => session.handle_control(&payload).await,
                Err(RelayError::TransportClosed) => break SessionEnd::ClientClosed,
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "Transport read failed");
                    break SessionEnd::ReadFailed(e.to_string());
                }
            }
        };

        session.close().await;
        end
    }
}
