//! Control messages
//!
//! Every inbound client message is a topic selection: a UTF-8 topic filter
//! to subscribe to, or `unsubscribe:<filter>` to release one.

use crate::broker::validate_topic_filter;

use super::error::RelayError;

/// Reserved prefix of a release request
pub const UNSUBSCRIBE_PREFIX: &str = "unsubscribe:";

/// A parsed client control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Subscribe(String),
    Unsubscribe(String),
    /// Blank payload, ignored
    Empty,
}

impl ControlMessage {
    /// Parse a raw client payload.
    ///
    /// Non-UTF-8 payloads and invalid topic filters yield
    /// [`RelayError::SubscribeFailed`].
    pub fn parse(payload: &[u8]) -> Result<Self, RelayError> {
        let text = std::str::from_utf8(payload).map_err(|e| {
            RelayError::subscribe_failed(&String::from_utf8_lossy(payload), e)
        })?;
        let text = text.trim();

        if text.is_empty() {
            return Ok(ControlMessage::Empty);
        }

        let (topic, release) = match text.strip_prefix(UNSUBSCRIBE_PREFIX) {
            Some(topic) => (topic.trim(), true),
            None => (text, false),
        };

        validate_topic_filter(topic).map_err(|e| RelayError::subscribe_failed(topic, e))?;

        Ok(if release {
            ControlMessage::Unsubscribe(topic.to_string())
        } else {
            ControlMessage::Subscribe(topic.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_topic_is_subscribe() {
        assert_eq!(
            ControlMessage::parse(b"sensors/temp").unwrap(),
            ControlMessage::Subscribe("sensors/temp".into())
        );
        assert_eq!(
            ControlMessage::parse(b"  power/#\n").unwrap(),
            ControlMessage::Subscribe("power/#".into())
        );
    }

    #[test]
    fn test_release_prefix() {
        assert_eq!(
            ControlMessage::parse(b"unsubscribe:sensors/temp").unwrap(),
            ControlMessage::Unsubscribe("sensors/temp".into())
        );
        assert_eq!(
            ControlMessage::parse(b"unsubscribe: sensors/+").unwrap(),
            ControlMessage::Unsubscribe("sensors/+".into())
        );
    }

    #[test]
    fn test_blank_payload_is_ignored() {
        assert_eq!(ControlMessage::parse(b"").unwrap(), ControlMessage::Empty);
        assert_eq!(ControlMessage::parse(b"   ").unwrap(), ControlMessage::Empty);
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(
            ControlMessage::parse(&[0xff, 0xfe]),
            Err(RelayError::SubscribeFailed { .. })
        ));
        assert!(matches!(
            ControlMessage::parse(b"sensors/#/temp"),
            Err(RelayError::SubscribeFailed { .. })
        ));
        assert!(matches!(
            ControlMessage::parse(b"unsubscribe:"),
            Err(RelayError::SubscribeFailed { .. })
        ));
    }
}
