//! WebSocket transport
//!
//! Adapts an upgraded axum `WebSocket` to the transport traits.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use super::{MessageSink, MessageSource, TransportError, TransportSession};

/// An upgraded WebSocket connection
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl TransportSession for WebSocketTransport {
    fn split(self) -> (Box<dyn MessageSource>, Box<dyn MessageSink>) {
        let (sender, receiver) = self.socket.split();
        (
            Box::new(WsSource { receiver }),
            Box::new(WsSink {
                sender,
                closed: false,
            }),
        )
    }
}

struct WsSource {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return Ok(Bytes::from(data)),
                // Axum answers pings itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
            }
        }
    }
}

struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    closed: bool,
}

/// Text frame for UTF-8 payloads, binary otherwise.
fn frame(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sender
            .send(frame(payload))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.sender.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_payload_is_text_frame() {
        match frame(Bytes::from_static(b"21.5")) {
            Message::Text(text) => assert_eq!(text, "21.5"),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_non_utf8_payload_is_binary_frame() {
        match frame(Bytes::from_static(&[0xff, 0x00, 0x10])) {
            Message::Binary(data) => assert_eq!(data, vec![0xff, 0x00, 0x10]),
            other => panic!("expected binary frame, got {:?}", other),
        }
    }
}
