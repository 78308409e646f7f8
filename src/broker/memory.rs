//! In-process broker
//!
//! A `MemoryBroker` hub hands out independent `MemoryBrokerClient`
//! connections and fans published messages out to every connected client.
//! It records subscribe/unsubscribe calls so tests can assert on the exact
//! broker traffic a relay session produced.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::dispatch::HandlerTable;
use super::topic::validate_topic_filter;
use super::{BrokerClient, BrokerConnector, BrokerError, Delivery, MessageHandler, SubscriptionId};

#[derive(Default)]
struct CallCounts {
    connects: AtomicU64,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    disconnects: AtomicU64,
}

struct HubInner {
    clients: RwLock<Vec<Arc<ClientShared>>>,
    refuse_connections: AtomicBool,
    denied: RwLock<HashSet<String>>,
    counts: CallCounts,
}

struct ClientShared {
    table: HandlerTable,
    connected: AtomicBool,
}

/// In-process publish/subscribe hub
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<HubInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: RwLock::new(Vec::new()),
                refuse_connections: AtomicBool::new(false),
                denied: RwLock::new(HashSet::new()),
                counts: CallCounts::default(),
            }),
        }
    }

    /// Make every subsequent `connect` fail with `Unavailable`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Refuse subscriptions to exactly `filter`, as a broker ACL would.
    pub async fn deny(&self, filter: &str) {
        self.inner.denied.write().await.insert(filter.to_string());
    }

    pub async fn allow(&self, filter: &str) {
        self.inner.denied.write().await.remove(filter);
    }

    /// Open a new, unconnected client.
    pub fn client(&self) -> MemoryBrokerClient {
        MemoryBrokerClient {
            hub: Arc::clone(&self.inner),
            shared: Arc::new(ClientShared {
                table: HandlerTable::new(),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver a message to every connected client with a matching filter.
    ///
    /// Returns the number of handlers invoked.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let delivery = Delivery::new(topic, payload);
        let clients: Vec<Arc<ClientShared>> = self.inner.clients.read().await.clone();

        let mut invoked = 0;
        for client in clients {
            if client.connected.load(Ordering::Acquire) {
                invoked += client.table.dispatch(&delivery).await;
            }
        }
        invoked
    }

    /// Simulate the broker dropping every connection.
    pub async fn drop_connections(&self) {
        let mut clients = self.inner.clients.write().await;
        for client in clients.drain(..) {
            client.connected.store(false, Ordering::Release);
        }
    }

    /// Live topic filters across all connected clients
    pub async fn active_subscriptions(&self) -> Vec<String> {
        let clients: Vec<Arc<ClientShared>> = self.inner.clients.read().await.clone();
        let mut filters = Vec::new();
        for client in clients {
            filters.extend(client.table.filters().await);
        }
        filters.sort();
        filters
    }

    pub async fn connected_clients(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    pub fn connect_calls(&self) -> u64 {
        self.inner.counts.connects.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.inner.counts.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> u64 {
        self.inner.counts.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u64 {
        self.inner.counts.disconnects.load(Ordering::SeqCst)
    }
}

impl BrokerConnector for MemoryBroker {
    fn open(&self, _session_id: &str) -> Box<dyn BrokerClient> {
        Box::new(self.client())
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}

/// One connection to a [`MemoryBroker`]
pub struct MemoryBrokerClient {
    hub: Arc<HubInner>,
    shared: Arc<ClientShared>,
}

#[async_trait]
impl BrokerClient for MemoryBrokerClient {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.hub.counts.connects.fetch_add(1, Ordering::SeqCst);
        if self.hub.refuse_connections.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        if !self.shared.connected.swap(true, Ordering::AcqRel) {
            self.hub.clients.write().await.push(Arc::clone(&self.shared));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BrokerError> {
        validate_topic_filter(topic)?;
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if self.hub.denied.read().await.contains(topic) {
            return Err(BrokerError::Rejected(topic.to_string()));
        }
        self.hub.counts.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.table.insert(topic, handler).await)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.hub.counts.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.shared.table.remove(topic).await;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        MemoryBroker {
            inner: Arc::clone(&self.hub),
        }
        .publish(topic, payload)
        .await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.hub.counts.disconnects.fetch_add(1, Ordering::SeqCst);
        self.shared.table.clear().await;
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            self.hub
                .clients
                .write()
                .await
                .retain(|client| !Arc::ptr_eq(client, &self.shared));
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Delivery>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn on_message(&self, delivery: Delivery) {
            let _ = self.0.send(delivery);
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = MemoryBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("sensors/temp", Arc::new(Forward(tx)))
            .await
            .unwrap();

        assert_eq!(broker.publish("sensors/temp", "21.5").await, 1);
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.topic, "sensors/temp");
        assert_eq!(delivery.payload, Bytes::from_static(b"21.5"));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);

        let client = broker.client();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert_eq!(broker.connected_clients().await, 0);

        // Disconnect after a failed connect is harmless.
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_dropped_connection_stops_delivery() {
        let broker = MemoryBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("sensors/#", Arc::new(Forward(tx)))
            .await
            .unwrap();

        broker.drop_connections().await;
        assert!(!client.is_connected());
        assert_eq!(broker.publish("sensors/temp", "1").await, 0);
        assert!(rx.try_recv().is_err());

        let err = client
            .subscribe("power/#", Arc::new(Forward(mpsc::unbounded_channel().0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let broker = MemoryBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();
        assert_eq!(broker.connected_clients().await, 1);

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(broker.connected_clients().await, 0);
        assert_eq!(broker.disconnect_calls(), 2);
    }
}
