//! Relay error types

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while relaying one client session
#[derive(Error, Debug)]
pub enum RelayError {
    /// Broker could not be reached at session start; fatal to setup
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A single topic could not be subscribed; other topics are unaffected
    #[error("Subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Reading from the client failed
    #[error("Transport read error: {0}")]
    TransportRead(String),

    /// The client connection ended
    #[error("Transport closed")]
    TransportClosed,

    /// Writing to the client failed
    #[error("Transport write error: {0}")]
    TransportWrite(String),

    /// A delivery was discarded because the session's channel was full.
    /// Counted and logged, never surfaced to the client.
    #[error("Delivery dropped for topic '{topic}'")]
    DeliveryDropped { topic: String },

    /// The session limit has been reached
    #[error("Too many sessions (limit: {0})")]
    TooManySessions(usize),
}

impl RelayError {
    pub(crate) fn subscribe_failed(topic: &str, reason: impl ToString) -> Self {
        RelayError::SubscribeFailed {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => RelayError::TransportClosed,
            TransportError::Read(e) => RelayError::TransportRead(e),
            TransportError::Write(e) => RelayError::TransportWrite(e),
        }
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::subscribe_failed("sensors/#/x", "'#' must occupy the last topic level");
        assert_eq!(
            err.to_string(),
            "Subscribe to 'sensors/#/x' failed: '#' must occupy the last topic level"
        );

        let err = RelayError::TooManySessions(2);
        assert_eq!(err.to_string(), "Too many sessions (limit: 2)");
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: RelayError = TransportError::Closed.into();
        assert!(matches!(err, RelayError::TransportClosed));

        let err: RelayError = TransportError::Write("broken pipe".into()).into();
        assert!(matches!(err, RelayError::TransportWrite(_)));
    }
}
