//! MQTT topic filters
//!
//! Validation of client-supplied filters and matching of concrete topic
//! names against them, following the MQTT 3.1.1 rules.

use thiserror::Error;

/// Longest topic the MQTT wire format can carry
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Reasons a topic filter is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,

    #[error("topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,

    #[error("topic contains a NUL character")]
    NulCharacter,

    #[error("'+' must occupy a whole topic level")]
    MisplacedSingleLevel,

    #[error("'#' must occupy the last topic level")]
    MisplacedMultiLevel,
}

/// Check that `filter` is a valid subscription filter.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevel);
        }
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(TopicError::MisplacedMultiLevel);
        }
    }

    Ok(())
}

/// Whether a concrete topic name is matched by a subscription filter.
///
/// Filters starting with a wildcard never match topics beginning with `$`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
