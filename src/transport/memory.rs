//! In-memory transport
//!
//! Channel-backed transport session with a scriptable client end. Used by
//! the relay tests to play the remote client without a network socket.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource, TransportError, TransportSession};

/// Outbound capacity used by [`ChannelTransport::pair`]
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Server side of an in-memory connection
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::Sender<Bytes>,
    reads: Arc<AtomicU64>,
}

/// Client side of an in-memory connection
pub struct ClientEnd {
    to_server: Option<mpsc::UnboundedSender<Bytes>>,
    from_server: Option<mpsc::Receiver<Bytes>>,
    reads: Arc<AtomicU64>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, ClientEnd) {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Pair whose server→client direction holds at most `capacity`
    /// unread messages; further sends wait for the client to read.
    pub fn with_capacity(capacity: usize) -> (Self, ClientEnd) {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::channel(capacity.max(1));
        let reads = Arc::new(AtomicU64::new(0));

        (
            Self {
                inbound,
                outbound,
                reads: Arc::clone(&reads),
            },
            ClientEnd {
                to_server: Some(to_server),
                from_server: Some(from_server),
                reads,
            },
        )
    }
}

impl TransportSession for ChannelTransport {
    fn split(self) -> (Box<dyn MessageSource>, Box<dyn MessageSink>) {
        (
            Box::new(ChannelSource {
                inbound: self.inbound,
                reads: self.reads,
            }),
            Box::new(ChannelSink {
                outbound: Some(self.outbound),
            }),
        )
    }
}

impl ClientEnd {
    /// Send a control message to the server. Returns false once the
    /// server side is gone.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        match &self.to_server {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }

    /// Next message from the server, or `None` once the server closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match &mut self.from_server {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Bytes> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.from_server.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Whether the server has closed its sending half and every message
    /// has been read.
    pub async fn is_closed_by_server(&mut self, timeout: Duration) -> bool {
        let Some(rx) = &mut self.from_server else {
            return true;
        };
        loop {
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Close the client→server direction, as a client disconnect would.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    /// Stop reading; subsequent server writes fail.
    pub fn stop_reading(&mut self) {
        self.from_server = None;
    }

    /// Number of messages the server has received so far
    pub fn messages_read(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

struct ChannelSource {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    reads: Arc<AtomicU64>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        match self.inbound.recv().await {
            Some(payload) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(payload)
            }
            None => Err(TransportError::Closed),
        }
    }
}

struct ChannelSink {
    outbound: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(payload)
            .await
            .map_err(|_| TransportError::Write("client stopped reading".to_string()))
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_between_ends() {
        let (transport, mut client) = ChannelTransport::pair();
        let (mut source, mut sink) = transport.split();

        assert!(client.send("sensors/temp"));
        assert_eq!(source.receive().await.unwrap(), Bytes::from_static(b"sensors/temp"));
        assert_eq!(client.messages_read(), 1);

        sink.send(Bytes::from_static(b"21.5")).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), Bytes::from_static(b"21.5"));
    }

    #[tokio::test]
    async fn test_hang_up_closes_source() {
        let (transport, mut client) = ChannelTransport::pair();
        let (mut source, _sink) = transport.split();

        client.hang_up();
        assert!(matches!(source.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_write_fails_after_client_stops_reading() {
        let (transport, mut client) = ChannelTransport::pair();
        let (_source, mut sink) = transport.split();

        client.stop_reading();
        let err = sink.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_visible_to_client() {
        let (transport, mut client) = ChannelTransport::pair();
        let (_source, mut sink) = transport.split();

        sink.close().await;
        sink.close().await;
        assert!(client.is_closed_by_server(Duration::from_millis(100)).await);
        assert!(matches!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        ));
    }
}
