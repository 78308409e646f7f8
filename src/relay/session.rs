//! Relay session
//!
//! State for one bridged client connection: its broker connection, its
//! topic → subscription table and its single delivery channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerClient, MessageHandler};
use crate::transport::MessageSink;

use super::control::ControlMessage;
use super::delivery::{spawn_forwarder, DeliverySink, DeliveryStats, ForwarderExit};
use super::error::RelayError;
use super::subscriptions::{Subscription, SubscriptionTable};
use super::RelayConfig;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Active,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    /// Distinct topics subscribed at any point during the session
    pub topics_subscribed: usize,
    pub forwarded: u64,
    pub dropped: u64,
    /// The broker connection was lost before the session ended
    pub broker_degraded: bool,
}

/// One bridged client connection
pub struct Session {
    id: String,
    broker: Box<dyn BrokerClient>,
    subscriptions: Mutex<SubscriptionTable>,
    sink: Arc<DeliverySink>,
    stats: Arc<DeliveryStats>,
    cancel: CancellationToken,
    state: AtomicU8,
    forwarder: Mutex<Option<JoinHandle<ForwarderExit>>>,
    teardown: OnceCell<()>,
    teardown_timeout: Duration,
    broker_degraded: AtomicU8,
}

impl Session {
    /// Start a session over a connected broker client.
    ///
    /// Creates the delivery channel and spawns the forwarding task that
    /// owns `transport`.
    pub fn start(
        id: String,
        broker: Box<dyn BrokerClient>,
        transport: Box<dyn MessageSink>,
        cancel: CancellationToken,
        config: &RelayConfig,
    ) -> Self {
        let (sink, rx, stats) = DeliverySink::channel(
            id.clone(),
            config.delivery_capacity,
            config.enqueue_timeout,
            cancel.clone(),
        );
        let forwarder = spawn_forwarder(
            id.clone(),
            rx,
            transport,
            cancel.clone(),
            Arc::clone(&stats),
        );

        Self {
            id,
            broker,
            subscriptions: Mutex::new(SubscriptionTable::new()),
            sink: Arc::new(sink),
            stats,
            cancel,
            state: AtomicU8::new(0),
            forwarder: Mutex::new(Some(forwarder)),
            teardown: OnceCell::new(),
            teardown_timeout: config.teardown_timeout,
            broker_degraded: AtomicU8::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Token cancelled when teardown begins
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn active_topics(&self) -> Vec<String> {
        self.subscriptions.lock().await.topics()
    }

    /// Apply one client control message. Failures are per-topic and leave
    /// the rest of the session running.
    pub async fn handle_control(&self, payload: &[u8]) {
        let result = match ControlMessage::parse(payload) {
            Ok(ControlMessage::Subscribe(topic)) => self.select_topic(&topic).await.map(|_| ()),
            Ok(ControlMessage::Unsubscribe(topic)) => self.release_topic(&topic).await.map(|_| ()),
            Ok(ControlMessage::Empty) => {
                tracing::debug!(session_id = %self.id, "Ignoring empty control message");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(session_id = %self.id, error = %e, "Control message ignored");
        }
    }

    /// Subscribe to `topic` unless it is already live.
    ///
    /// Returns true when a new broker subscription was created.
    pub async fn select_topic(&self, topic: &str) -> Result<bool, RelayError> {
        let mut subscriptions = self.subscriptions.lock().await;
        // Checked under the lock so nothing is added after teardown drains.
        if self.cancel.is_cancelled() {
            return Err(RelayError::TransportClosed);
        }
        if subscriptions.contains(topic) {
            tracing::debug!(session_id = %self.id, topic = %topic, "Already subscribed");
            return Ok(false);
        }

        let handler: Arc<dyn MessageHandler> = self.sink.clone();
        let broker_id = match self.broker.subscribe(topic, handler).await {
            Ok(id) => id,
            Err(e) => {
                if !self.broker.is_connected() {
                    self.broker_degraded.store(1, Ordering::Release);
                }
                return Err(RelayError::subscribe_failed(topic, e));
            }
        };

        subscriptions.insert(Subscription::new(topic, broker_id));
        tracing::info!(
            session_id = %self.id,
            topic = %topic,
            active = subscriptions.len(),
            "Subscribed client"
        );
        Ok(true)
    }

    /// Release `topic`. Returns false when it was not live.
    pub async fn release_topic(&self, topic: &str) -> Result<bool, RelayError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.remove(topic).is_none() {
            tracing::debug!(session_id = %self.id, topic = %topic, "Not subscribed, nothing to release");
            return Ok(false);
        }

        if let Err(e) = self.broker.unsubscribe(topic).await {
            tracing::warn!(session_id = %self.id, topic = %topic, error = %e, "Broker unsubscribe failed");
        }
        tracing::info!(
            session_id = %self.id,
            topic = %topic,
            active = subscriptions.len(),
            "Unsubscribed client"
        );
        Ok(true)
    }

    /// Tear the session down. Idempotent; concurrent callers wait for the
    /// single teardown to finish.
    pub async fn close(&self) {
        self.teardown.get_or_init(|| self.run_teardown()).await;
    }

    async fn run_teardown(&self) {
        self.state.store(1, Ordering::Release);
        self.cancel.cancel();

        if !self.broker.is_connected() {
            self.broker_degraded.store(1, Ordering::Release);
        }

        let released = self.subscriptions.lock().await.drain();
        for subscription in &released {
            if let Err(e) = self.broker.unsubscribe(&subscription.topic).await {
                tracing::warn!(
                    session_id = %self.id,
                    topic = %subscription.topic,
                    error = %e,
                    "Broker unsubscribe failed during teardown"
                );
            }
        }
        self.broker.disconnect().await;

        let forwarder = self.forwarder.lock().await.take();
        if let Some(mut handle) = forwarder {
            if tokio::time::timeout(self.teardown_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(session_id = %self.id, "Forwarder did not stop in time, aborting");
                handle.abort();
            }
        }

        self.state.store(2, Ordering::Release);
        tracing::debug!(
            session_id = %self.id,
            released = released.len(),
            "Session torn down"
        );
    }

    pub async fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.id.clone(),
            topics_subscribed: self.subscriptions.lock().await.distinct_seen(),
            forwarded: self.stats.forwarded(),
            dropped: self.stats.dropped(),
            broker_degraded: self.broker_degraded.load(Ordering::Acquire) == 1,
        }
    }
}
