//! Cross-node cache invalidation
//!
//! Every mutation that evicts a typed-cache entry publishes a message on a
//! shared channel. Each process runs one subscriber that drops matching local
//! entries; messages carrying the subscriber's own node id are skipped.

use crate::store::SharedStore;
use crate::CacheError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Channel name on the distributed store
pub const INVALIDATION_CHANNEL: &str = "cache:invalidation";

static NODE_ID: Lazy<Uuid> = Lazy::new(Uuid::new_v4);

/// Stable identity of this process on the invalidation channel
pub fn node_id() -> Uuid {
    *NODE_ID
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub store_id: String,
    pub key: String,
    pub source_node_id: Uuid,
}

type Handler = Arc<dyn Fn(String) + Send + Sync>;

/// Process-wide fan-in of invalidation messages to local cache layers
pub struct InvalidationHub {
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
    listener: JoinHandle<()>,
}

impl InvalidationHub {
    /// Subscribe to the invalidation channel and start dispatching
    pub async fn start(store: SharedStore) -> Result<Self, CacheError> {
        let handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let mut rx = store.subscribe(INVALIDATION_CHANNEL).await?;
        let dispatch = Arc::clone(&handlers);

        let listener = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let message: InvalidationMessage = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Malformed invalidation message: {}", e);
                        continue;
                    },
                };

                // Our own publications already evicted the local layer
                if message.source_node_id == node_id() {
                    continue;
                }

                debug!(
                    store_id = %message.store_id,
                    key = %message.key,
                    "Remote invalidation received"
                );

                let handlers = dispatch.read().await;
                if let Some(list) = handlers.get(&message.store_id) {
                    for handler in list {
                        handler(message.key.clone());
                    }
                }
            }
        });

        Ok(Self { handlers, listener })
    }

    /// Register a local-eviction handler for a store id
    pub async fn register(&self, store_id: &str, handler: Handler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(store_id.to_string()).or_default().push(handler);
    }
}

impl Drop for InvalidationHub {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatches_foreign_messages() {
        let store = SharedStore::memory();
        let hub = InvalidationHub::start(store.clone()).await.unwrap();

        let evictions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&evictions);
        hub.register(
            "policy",
            Arc::new(move |key| {
                assert_eq!(key, "acme:member");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        let message = InvalidationMessage {
            store_id: "policy".to_string(),
            key: "acme:member".to_string(),
            source_node_id: Uuid::new_v4(), // pretend it came from another node
        };
        store
            .publish(INVALIDATION_CHANNEL, &serde_json::to_string(&message).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skips_own_messages() {
        let store = SharedStore::memory();
        let hub = InvalidationHub::start(store.clone()).await.unwrap();

        let evictions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&evictions);
        hub.register("policy", Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        let message = InvalidationMessage {
            store_id: "policy".to_string(),
            key: "k".to_string(),
            source_node_id: node_id(),
        };
        store
            .publish(INVALIDATION_CHANNEL, &serde_json::to_string(&message).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
    }
}
