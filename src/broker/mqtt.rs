//! MQTT broker adapter
//!
//! Wraps a `rumqttc` client and its event loop. The event loop runs on a
//! dedicated task that routes inbound publishes through the handler table.
//! A connection error after the initial CONNACK degrades the client: it
//! stops polling, reports itself disconnected and does not reconnect.
//!
//! `subscribe` waits for the broker's SUBACK. Requests reach the event loop
//! in the order they were queued, so each outgoing SUBSCRIBE is paired with
//! the oldest waiting request and then tracked by packet id until its
//! acknowledgement arrives.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    SubAck, SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::dispatch::HandlerTable;
use super::topic::validate_topic_filter;
use super::{BrokerClient, BrokerConnector, BrokerError, Delivery, MessageHandler, SubscriptionId};

/// Default MQTT port when the address omits one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Largest packet MQTT can frame: 268,435,455 bytes of remaining length
/// plus the fixed header
pub const MQTT_MAX_PACKET_BYTES: usize = 268_435_460;

/// How long `disconnect` waits for the DISCONNECT packet to be flushed
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

type SubAckSender = oneshot::Sender<Result<(), BrokerError>>;

/// Subscribe requests waiting for their SUBACK
#[derive(Default)]
struct PendingAcks {
    /// Queued on the client, packet id not assigned yet; oldest first
    queued: VecDeque<(String, SubAckSender)>,
    /// Written to the broker, keyed by packet id
    inflight: HashMap<u16, (String, SubAckSender)>,
}

impl PendingAcks {
    fn sent(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn acknowledged(&mut self, ack: &SubAck) {
        let Some((topic, waiter)) = self.inflight.remove(&ack.pkid) else {
            return;
        };
        let outcome = if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(BrokerError::Rejected(topic))
        } else {
            Ok(())
        };
        // The subscriber may have given up waiting.
        let _ = waiter.send(outcome);
    }
}

/// Host and port of the MQTT broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse `tcp://host:port`, `mqtt://host:port`, `host:port` or `host`.
    pub fn parse(url: &str) -> Result<Self, BrokerError> {
        let url = url.trim();
        let rest = match url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(BrokerError::InvalidAddress(format!(
                    "unsupported scheme '{}' in '{}'",
                    scheme, url
                )))
            }
            None => url,
        };
        let rest = rest.trim_end_matches('/');

        if rest.is_empty() {
            return Err(BrokerError::InvalidAddress(format!("missing host in '{}'", url)));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    BrokerError::InvalidAddress(format!("invalid port '{}' in '{}'", port, url))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() || host.contains('/') {
            return Err(BrokerError::InvalidAddress(format!("invalid host in '{}'", url)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Connection settings shared by every per-session MQTT client
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub address: BrokerAddress,
    /// Client ids are `<prefix>-<session suffix>`
    pub client_id_prefix: String,
    /// Upper bound on waiting for CONNACK
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Capacity of the rumqttc request channel
    pub channel_capacity: usize,
    /// Packet size limit in both directions
    pub max_packet_bytes: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttSettings {
    pub fn new(address: BrokerAddress) -> Self {
        Self {
            address,
            client_id_prefix: "dashbridge".to_string(),
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            channel_capacity: 64,
            max_packet_bytes: 1024 * 1024,
            username: None,
            password: None,
        }
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, &self.address.host, self.address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(self.max_packet_bytes, self.max_packet_bytes);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// Opens one `MqttBroker` per relay session
pub struct MqttConnector {
    settings: MqttSettings,
}

impl MqttConnector {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }
}

impl BrokerConnector for MqttConnector {
    fn open(&self, session_id: &str) -> Box<dyn BrokerClient> {
        let suffix: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        let client_id = format!("{}-{}", self.settings.client_id_prefix, suffix);
        Box::new(MqttBroker::new(self.settings.clone(), client_id))
    }

    fn describe(&self) -> String {
        self.settings.address.to_string()
    }
}

/// A single MQTT connection
pub struct MqttBroker {
    settings: MqttSettings,
    client_id: String,
    client: RwLock<Option<AsyncClient>>,
    table: Arc<HandlerTable>,
    connected: Arc<AtomicBool>,
    disconnecting: Arc<AtomicBool>,
    pending: Arc<Mutex<PendingAcks>>,
    /// Held while queueing a SUBSCRIBE so queue order matches send order
    subscribe_order: Mutex<()>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    pub fn new(settings: MqttSettings, client_id: String) -> Self {
        Self {
            settings,
            client_id,
            client: RwLock::new(None),
            table: Arc::new(HandlerTable::new()),
            connected: Arc::new(AtomicBool::new(false)),
            disconnecting: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(PendingAcks::default())),
            subscribe_order: Mutex::new(()),
            event_task: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn client(&self) -> Result<AsyncClient, BrokerError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::NotConnected);
        }
        self.client
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    /// Send SUBSCRIBE and wait for the broker's answer.
    async fn request_subscription(&self, client: &AsyncClient, topic: &str) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();
        {
            let _order = self.subscribe_order.lock().await;
            self.pending.lock().await.queued.push_back((topic.to_string(), tx));
            if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
                // Never reached the event loop, so it is still the newest entry.
                self.pending.lock().await.queued.pop_back();
                return Err(BrokerError::Request(e.to_string()));
            }
        }

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Event loop stopped before the SUBACK arrived.
            Ok(Err(_)) => Err(BrokerError::NotConnected),
            Err(_) => {
                let _ = client.try_unsubscribe(topic);
                Err(BrokerError::Request(format!(
                    "no SUBACK for '{}' within {}ms",
                    topic,
                    timeout.as_millis()
                )))
            }
        }
    }
}

/// Poll until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(BrokerError::Unavailable(format!(
                    "connection rejected: {:?}",
                    ack.code
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(BrokerError::Unavailable(e.to_string())),
        }
    }
}

/// Drive the event loop after CONNACK, routing publishes to handlers.
async fn run_event_loop(
    client_id: String,
    mut eventloop: EventLoop,
    table: Arc<HandlerTable>,
    pending: Arc<Mutex<PendingAcks>>,
    connected: Arc<AtomicBool>,
    disconnecting: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let delivery = Delivery::new(publish.topic.clone(), publish.payload.clone());
                let handled = table.dispatch(&delivery).await;
                tracing::trace!(
                    client_id = %client_id,
                    topic = %delivery.topic,
                    handlers = handled,
                    "Broker message dispatched"
                );
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => pending.lock().await.sent(pkid),
            Ok(Event::Incoming(Incoming::SubAck(ack))) => pending.lock().await.acknowledged(&ack),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if !disconnecting.load(Ordering::Acquire) {
                    tracing::warn!(
                        client_id = %client_id,
                        error = %e,
                        "Broker connection lost, no further deliveries for this session"
                    );
                }
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);

    // Dropping the waiters fails their subscribe calls.
    let mut pending = pending.lock().await;
    pending.queued.clear();
    pending.inflight.clear();
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let options = self.settings.options(&self.client_id);
        let (client, mut eventloop) = AsyncClient::new(options, self.settings.channel_capacity);

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BrokerError::Unavailable(format!(
                    "no CONNACK from {} within {}ms",
                    self.settings.address,
                    timeout.as_millis()
                )))
            }
        }

        *self.client.write().await = Some(client);
        self.connected.store(true, Ordering::Release);

        let handle = tokio::spawn(run_event_loop(
            self.client_id.clone(),
            eventloop,
            Arc::clone(&self.table),
            Arc::clone(&self.pending),
            Arc::clone(&self.connected),
            Arc::clone(&self.disconnecting),
        ));
        *self.event_task.lock().await = Some(handle);

        tracing::debug!(
            client_id = %self.client_id,
            broker = %self.settings.address,
            "Connected to broker"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BrokerError> {
        validate_topic_filter(topic)?;
        let client = self.client().await?;

        // Route first so messages arriving right after SUBACK are not lost.
        let id = self.table.insert(topic, handler).await;
        if let Err(e) = self.request_subscription(&client, topic).await {
            self.table.remove(topic).await;
            tracing::warn!(client_id = %self.client_id, topic = %topic, error = %e, "Subscribe failed");
            return Err(e);
        }

        Ok(id)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        // Removing the route waits for any in-flight dispatch to finish.
        self.table.remove(topic).await;

        match self.client().await {
            Ok(client) => client
                .unsubscribe(topic)
                .await
                .map_err(|e| BrokerError::Request(e.to_string())),
            // Nothing to tell a broker we are no longer talking to.
            Err(BrokerError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        let client = self.client().await?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn disconnect(&self) {
        if self.disconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        self.table.clear().await;

        let client = self.client.write().await.take();
        if let Some(client) = client {
            if self.connected.load(Ordering::Acquire) {
                let _ = client.disconnect().await;
            }
        }
        self.connected.store(false, Ordering::Release);

        let handle = self.event_task.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        tracing::debug!(client_id = %self.client_id, "Disconnected from broker");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
