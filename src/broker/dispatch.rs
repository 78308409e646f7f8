//! Handler table shared by the broker adapters
//!
//! Routes inbound broker messages to the handlers registered per topic
//! filter. Dispatch holds the read lock while handlers run, so removing a
//! route (write lock) waits for in-flight invocations: once `remove`
//! returns, the removed handler is never called again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::topic::topic_matches;
use super::{Delivery, MessageHandler, SubscriptionId};

struct Route {
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler>,
}

/// Topic filter → handler routing table
pub(crate) struct HandlerTable {
    routes: RwLock<HashMap<String, Route>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `filter`, superseding any earlier handler.
    pub(crate) async fn insert(
        &self,
        filter: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .await
            .insert(filter.to_string(), Route { id, handler });
        id
    }

    /// Remove the route for `filter`.
    pub(crate) async fn remove(&self, filter: &str) -> Option<SubscriptionId> {
        self.routes.write().await.remove(filter).map(|route| route.id)
    }

    /// Drop every route.
    pub(crate) async fn clear(&self) -> usize {
        let mut routes = self.routes.write().await;
        let count = routes.len();
        routes.clear();
        count
    }

    pub(crate) async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub(crate) async fn filters(&self) -> Vec<String> {
        self.routes.read().await.keys().cloned().collect()
    }

    /// Invoke every handler whose filter matches the delivery's topic.
    ///
    /// Returns the number of handlers invoked.
    pub(crate) async fn dispatch(&self, delivery: &Delivery) -> usize {
        let routes = self.routes.read().await;
        let mut invoked = 0;
        for (filter, route) in routes.iter() {
            if topic_matches(filter, &delivery.topic) {
                route.handler.on_message(delivery.clone()).await;
                invoked += 1;
            }
        }
        invoked
    }
}
