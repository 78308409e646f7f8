//! Broker Client
//!
//! Adapters around the backend publish/subscribe broker.
//!
//! ## Architecture
//!
//! - **BrokerClient**: one connection to the broker, exposing
//!   subscribe / unsubscribe / publish with callback delivery
//! - **BrokerConnector**: opens a fresh `BrokerClient` per relay session;
//!   connections are never shared between sessions
//! - **MqttBroker**: MQTT implementation backed by `rumqttc`
//! - **MemoryBroker**: in-process broker for tests and local development
//!
//! ## Delivery ordering
//!
//! Handlers are invoked from the adapter's own task. After `unsubscribe`
//! returns, the handler registered for that topic is never invoked again.

mod dispatch;
mod memory;
mod mqtt;
mod topic;

pub use memory::{MemoryBroker, MemoryBrokerClient};
pub use mqtt::{BrokerAddress, MqttBroker, MqttConnector, MqttSettings, MQTT_MAX_PACKET_BYTES};
pub use topic::{topic_matches, validate_topic_filter, TopicError, MAX_TOPIC_LEN};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// One message pushed by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Concrete topic the message was published on
    pub topic: String,
    /// Raw message payload
    pub payload: Bytes,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Broker-side handle for one registered topic filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked once per inbound broker message on a subscribed topic.
///
/// Implementations must return promptly: the adapter's delivery task is
/// shared by every topic of the connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, delivery: Delivery);
}

/// One connection to the backend broker
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish the connection.
    ///
    /// Fails with [`BrokerError::Unavailable`] when the broker cannot be
    /// reached within the configured attempt window. Never retries.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Register `handler` for every message matching `topic`.
    ///
    /// Returns once the broker has accepted the subscription; a refusal is
    /// [`BrokerError::Rejected`] and leaves no route behind.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BrokerError>;

    /// Stop deliveries for `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Close the connection. Idempotent, and safe when `connect` never succeeded.
    async fn disconnect(&self);

    /// Whether the connection is currently usable
    fn is_connected(&self) -> bool;
}

/// Factory for per-session broker connections
pub trait BrokerConnector: Send + Sync {
    /// Create an unconnected client for the given session.
    fn open(&self, session_id: &str) -> Box<dyn BrokerClient>;

    /// Human-readable broker address for logs and health output
    fn describe(&self) -> String;
}

/// Errors raised by broker adapters
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Invalid topic filter: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),

    #[error("Broker request failed: {0}")]
    Request(String),

    #[error("Subscription rejected by broker: {0}")]
    Rejected(String),
}
