//! Delivery path
//!
//! Broker callbacks push into one bounded channel per session; a single
//! forwarding task drains it and is the only writer on the transport.
//!
//! Delivery is best-effort, at most once. When the channel is full the new
//! delivery is dropped rather than blocking the broker's delivery task,
//! which is shared by every topic of the connection. With a non-zero
//! enqueue timeout the callback waits at most that long for room.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Delivery, MessageHandler};
use crate::transport::MessageSink;

use super::error::RelayError;

/// Delivery counters for one session
#[derive(Debug, Default)]
pub struct DeliveryStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The single forwarding callback shared by every subscription of a session
pub struct DeliverySink {
    session_id: String,
    tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
    enqueue_timeout: Duration,
    stats: Arc<DeliveryStats>,
}

impl DeliverySink {
    /// Create the sink and the receiving end for the forwarding task.
    pub fn channel(
        session_id: impl Into<String>,
        capacity: usize,
        enqueue_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Delivery>, Arc<DeliveryStats>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(DeliveryStats::default());
        let sink = Self {
            session_id: session_id.into(),
            tx,
            cancel,
            enqueue_timeout,
            stats: Arc::clone(&stats),
        };
        (sink, rx, stats)
    }

    /// Queue a delivery for the client.
    ///
    /// Never waits longer than the configured enqueue timeout. Deliveries
    /// arriving after teardown has begun are discarded.
    pub async fn enqueue(&self, delivery: Delivery) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::DeliveryDropped {
                topic: delivery.topic,
            });
        }

        let delivery = match self.tx.try_send(delivery) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(delivery)) => {
                return Err(RelayError::DeliveryDropped {
                    topic: delivery.topic,
                })
            }
            Err(TrySendError::Full(delivery)) => delivery,
        };

        let topic = delivery.topic.clone();
        if !self.enqueue_timeout.is_zero()
            && self
                .tx
                .send_timeout(delivery, self.enqueue_timeout)
                .await
                .is_ok()
        {
            return Ok(());
        }

        self.record_drop(&topic);
        Err(RelayError::DeliveryDropped { topic })
    }

    fn record_drop(&self, topic: &str) {
        let previous = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            tracing::warn!(
                session_id = %self.session_id,
                topic = %topic,
                "Client is not keeping up, dropping deliveries"
            );
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                topic = %topic,
                dropped = previous + 1,
                "Delivery dropped"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for DeliverySink {
    async fn on_message(&self, delivery: Delivery) {
        if let Err(e) = self.enqueue(delivery).await {
            tracing::trace!(session_id = %self.session_id, error = %e, "Delivery not queued");
        }
    }
}

/// Why the forwarding task stopped
#[derive(Debug)]
pub enum ForwarderExit {
    Cancelled,
    ChannelClosed,
    WriteFailed(RelayError),
}

/// Spawn the session's forwarding task.
///
/// The task owns the transport's sending half and closes it on exit. A
/// write failure cancels the session.
pub fn spawn_forwarder(
    session_id: String,
    mut rx: mpsc::Receiver<Delivery>,
    mut sink: Box<dyn MessageSink>,
    cancel: CancellationToken,
    stats: Arc<DeliveryStats>,
) -> JoinHandle<ForwarderExit> {
    tokio::spawn(async move {
        let exit = loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ForwarderExit::Cancelled,
                next = rx.recv() => match next {
                    Some(delivery) => delivery,
                    None => break ForwarderExit::ChannelClosed,
                },
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ForwarderExit::Cancelled,
                result = sink.send(delivery.payload) => result,
            };

            match result {
                Ok(()) => {
                    stats.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    let e = RelayError::from(e);
                    tracing::warn!(
                        session_id = %session_id,
                        topic = %delivery.topic,
                        error = %e,
                        "Transport write failed, closing session"
                    );
                    cancel.cancel();
                    break ForwarderExit::WriteFailed(e);
                }
            }
        };

        // Producers see the channel closed from here on.
        rx.close();
        sink.close().await;

        tracing::debug!(session_id = %session_id, exit = ?exit, "Forwarder stopped");
        exit
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, TransportSession};
    use bytes::Bytes;
    use std::time::Instant;

    fn delivery(topic: &str, payload: &'static str) -> Delivery {
        Delivery::new(topic, Bytes::from_static(payload.as_bytes()))
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let cancel = CancellationToken::new();
        let (sink, mut rx, stats) =
            DeliverySink::channel("s1", 3, Duration::ZERO, cancel.clone());

        let started = Instant::now();
        for i in 0..4 {
            let result = sink.enqueue(delivery("sensors/temp", "x")).await;
            assert_eq!(result.is_ok(), i < 3);
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(stats.dropped(), 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test]
    async fn test_enqueue_timeout_is_bounded() {
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(50);
        let (sink, _rx, stats) = DeliverySink::channel("s1", 1, timeout, cancel);

        sink.enqueue(delivery("a", "1")).await.unwrap();

        let started = Instant::now();
        let result = sink.enqueue(delivery("a", "2")).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(RelayError::DeliveryDropped { .. })));
        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(stats.dropped(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sink_discards() {
        let cancel = CancellationToken::new();
        let (sink, mut rx, stats) =
            DeliverySink::channel("s1", 8, Duration::ZERO, cancel.clone());

        cancel.cancel();
        assert!(sink.enqueue(delivery("a", "1")).await.is_err());
        assert!(rx.try_recv().is_err());
        // Teardown discards are not backpressure drops.
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn test_forwarder_preserves_order_and_closes_transport() {
        let cancel = CancellationToken::new();
        let (sink, rx, stats) = DeliverySink::channel("s1", 16, Duration::ZERO, cancel.clone());
        let (transport, mut client) = ChannelTransport::pair();
        let (_source, transport_sink) = transport.split();

        let handle = spawn_forwarder("s1".into(), rx, transport_sink, cancel.clone(), Arc::clone(&stats));

        for payload in ["1", "2", "3"] {
            sink.enqueue(delivery("sensors/temp", payload)).await.unwrap();
        }
        for expected in ["1", "2", "3"] {
            let got = client.recv_timeout(Duration::from_secs(1)).await.unwrap();
            assert_eq!(got, Bytes::from_static(expected.as_bytes()));
        }

        cancel.cancel();
        assert!(matches!(handle.await.unwrap(), ForwarderExit::Cancelled));
        assert_eq!(stats.forwarded(), 3);
        assert!(client.is_closed_by_server(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_cancel_with_queued_deliveries_stops_writing() {
        let cancel = CancellationToken::new();
        let (sink, rx, stats) = DeliverySink::channel("s1", 16, Duration::ZERO, cancel.clone());
        let (transport, mut client) = ChannelTransport::with_capacity(1);
        let (_source, transport_sink) = transport.split();

        for i in 0..10 {
            sink.enqueue(Delivery::new("sensors/temp", i.to_string())).await.unwrap();
        }
        let handle = spawn_forwarder("s1".into(), rx, transport_sink, cancel.clone(), Arc::clone(&stats));

        // One message fills the transport, the next blocks in send.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stats.forwarded() <= 2);

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("forwarder did not stop with deliveries still queued")
            .unwrap();
        assert!(matches!(exit, ForwarderExit::Cancelled));

        let forwarded = stats.forwarded();
        assert!(forwarded <= 2);

        let mut received = 0;
        while client.recv_timeout(Duration::from_millis(50)).await.is_some() {
            received += 1;
        }
        assert_eq!(received as u64, forwarded);
        assert!(client.is_closed_by_server(Duration::from_millis(50)).await);

        // Nothing is accepted once teardown has begun.
        assert!(sink.enqueue(delivery("sensors/temp", "late")).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_cancels_session() {
        let cancel = CancellationToken::new();
        let (sink, rx, stats) = DeliverySink::channel("s1", 16, Duration::ZERO, cancel.clone());
        let (transport, mut client) = ChannelTransport::pair();
        let (_source, transport_sink) = transport.split();
        client.stop_reading();

        let handle = spawn_forwarder("s1".into(), rx, transport_sink, cancel.clone(), stats);
        sink.enqueue(delivery("sensors/temp", "1")).await.unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            ForwarderExit::WriteFailed(RelayError::TransportWrite(_))
        ));
        assert!(cancel.is_cancelled());
    }
}
