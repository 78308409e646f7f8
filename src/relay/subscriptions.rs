//! Per-session subscription bookkeeping

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::broker::SubscriptionId;

/// One topic registered with the broker on behalf of a session
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: String,
    pub broker_id: SubscriptionId,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, broker_id: SubscriptionId) -> Self {
        Self {
            topic: topic.into(),
            broker_id,
            created_at: Utc::now(),
        }
    }
}

/// Topic → live subscription, at most one entry per topic
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    live: HashMap<String, Subscription>,
    /// Every topic that was ever live during the session
    seen: HashSet<String>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.live.contains_key(topic)
    }

    /// Record a new live subscription. Returns false, leaving the table
    /// untouched, when the topic is already live.
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.live.contains_key(&subscription.topic) {
            return false;
        }
        self.seen.insert(subscription.topic.clone());
        self.live.insert(subscription.topic.clone(), subscription);
        true
    }

    pub fn remove(&mut self, topic: &str) -> Option<Subscription> {
        self.live.remove(topic)
    }

    /// Take every live subscription, leaving the table empty.
    pub fn drain(&mut self) -> Vec<Subscription> {
        self.live.drain().map(|(_, sub)| sub).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.live.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of distinct topics ever subscribed
    pub fn distinct_seen(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_per_topic() {
        let mut table = SubscriptionTable::new();

        assert!(table.insert(Subscription::new("sensors/temp", SubscriptionId(1))));
        assert!(!table.insert(Subscription::new("sensors/temp", SubscriptionId(2))));
        assert_eq!(table.len(), 1);
        assert_eq!(table.live["sensors/temp"].broker_id, SubscriptionId(1));
    }

    #[test]
    fn test_multiple_topics_are_kept() {
        let mut table = SubscriptionTable::new();
        table.insert(Subscription::new("sensors/temp", SubscriptionId(1)));
        table.insert(Subscription::new("power/grid", SubscriptionId(2)));

        assert_eq!(table.topics(), vec!["power/grid", "sensors/temp"]);
    }

    #[test]
    fn test_remove_and_resubscribe_tracks_distinct_topics() {
        let mut table = SubscriptionTable::new();
        table.insert(Subscription::new("sensors/temp", SubscriptionId(1)));

        assert!(table.remove("sensors/temp").is_some());
        assert!(table.remove("sensors/temp").is_none());
        assert!(table.is_empty());

        table.insert(Subscription::new("sensors/temp", SubscriptionId(3)));
        assert_eq!(table.distinct_seen(), 1);
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = SubscriptionTable::new();
        table.insert(Subscription::new("a", SubscriptionId(1)));
        table.insert(Subscription::new("b", SubscriptionId(2)));

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
        assert!(table.drain().is_empty());
    }
}
