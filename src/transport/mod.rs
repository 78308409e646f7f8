//! Transport Session
//!
//! The client-facing side of the relay: an already-established duplex
//! message stream, split into a receiving half driven by the session's
//! receive loop and a sending half owned by its single forwarding task.
//! Splitting at the type level is what guarantees a single writer.

mod memory;
mod websocket;

pub use memory::{ChannelTransport, ClientEnd};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Receiving half of a transport session
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next complete message from the client.
    async fn receive(&mut self) -> Result<Bytes, TransportError>;
}

/// Sending half of a transport session
#[async_trait]
pub trait MessageSink: Send {
    /// Write one message atomically.
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// A client connection that can be split into its two halves
pub trait TransportSession: Send {
    fn split(self) -> (Box<dyn MessageSource>, Box<dyn MessageSink>);
}

/// Terminal transport outcomes
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),
}
