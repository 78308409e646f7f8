//! Session Registry
//!
//! Tracks live relay sessions and enforces the concurrent session limit.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::RelayError;

/// Unique identifier for a relay session
pub type SessionId = String;

/// What the registry knows about a live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
}

/// Live sessions, keyed by id
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Register a new session
    ///
    /// Returns the session ID on success, or an error if the session limit
    /// has been reached.
    pub async fn register(&self) -> Result<SessionId, RelayError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(RelayError::TooManySessions(self.max_sessions));
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                opened_at: Utc::now(),
            },
        );
        Ok(id)
    }

    pub async fn unregister(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.write().await.remove(id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn at_capacity(&self) -> bool {
        self.count().await >= self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = SessionRegistry::new(4);

        let id = registry.register().await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(registry.count().await, 1);

        assert!(registry.unregister(&id).await.is_some());
        assert!(registry.unregister(&id).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let registry = SessionRegistry::new(2);

        let first = registry.register().await.unwrap();
        registry.register().await.unwrap();
        assert!(registry.at_capacity().await);

        let err = registry.register().await.unwrap_err();
        assert!(matches!(err, RelayError::TooManySessions(2)));

        registry.unregister(&first).await;
        assert!(registry.register().await.is_ok());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = SessionRegistry::new(16);
        let a = registry.register().await.unwrap();
        let b = registry.register().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.count().await, 2);

        let info = registry.unregister(&a).await.unwrap();
        assert_eq!(info.id, a);
        assert!(info.opened_at <= chrono::Utc::now());
    }
}
