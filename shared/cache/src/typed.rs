//! Typed read-through cache
//!
//! `LookupCache(store_id, lookup, ttl)` resolves a key through three layers:
//! a small local moka cache, the distributed store, and finally the lookup
//! effect. Hits are written back through both layers. Lookup work is
//! deduplicated so one in-flight computation serves all concurrent callers of
//! the same primary key.

use crate::invalidation::{node_id, InvalidationHub, InvalidationMessage, INVALIDATION_CHANNEL};
use crate::store::SharedStore;
use futures::future::BoxFuture;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Local layer bounds; the distributed layer carries the authoritative TTL
const LOCAL_CAPACITY: u64 = 1_000;
const LOCAL_TTL: Duration = Duration::from_secs(30);

/// Keys know how to render themselves as a primary cache key
pub trait CacheKey {
    fn primary_key(&self) -> String;
}

impl CacheKey for String {
    fn primary_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for Uuid {
    fn primary_key(&self) -> String {
        self.to_string()
    }
}

type LookupFn<K, V> =
    Arc<dyn Fn(K) -> BoxFuture<'static, Result<Option<V>, AppError>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error("miss")]
    Miss,

    #[error("{0}")]
    Failed(String),
}

pub struct LookupCache<K, V> {
    store_id: String,
    ttl: Duration,
    store: SharedStore,
    local: Cache<String, V>,
    lookup: LookupFn<K, V>,
}

impl<K, V> Clone for LookupCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            store_id: self.store_id.clone(),
            ttl: self.ttl,
            store: self.store.clone(),
            local: self.local.clone(),
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl<K, V> LookupCache<K, V>
where
    K: CacheKey + Clone + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F, Fut>(store_id: &str, store: SharedStore, ttl: Duration, lookup: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<V>, AppError>> + Send + 'static,
    {
        let local = Cache::builder()
            .max_capacity(LOCAL_CAPACITY)
            .time_to_live(LOCAL_TTL.min(ttl))
            .build();

        let lookup: LookupFn<K, V> = Arc::new(move |key| Box::pin(lookup(key)));

        Self {
            store_id: store_id.to_string(),
            ttl,
            store,
            local,
            lookup,
        }
    }

    fn remote_key(&self, primary_key: &str) -> String {
        format!("cache:{}:{}", self.store_id, primary_key)
    }

    /// Local layer → distributed layer → lookup, persisting hits back through
    /// both. Misses are not cached.
    pub async fn get(&self, key: &K) -> Result<Option<V>, AppError> {
        let primary_key = key.primary_key();
        let remote_key = self.remote_key(&primary_key);
        let store = self.store.clone();
        let lookup = Arc::clone(&self.lookup);
        let ttl = self.ttl;
        let store_id = self.store_id.clone();
        let key = key.clone();

        let init = async move {
            match store.kv_get(&remote_key).await {
                Ok(Some(raw)) => match serde_json::from_str::<V>(&raw) {
                    Ok(value) => return Ok(value),
                    Err(_) => {
                        // Stale shape from an older build; evict and re-derive
                        let _ = store.kv_del(&remote_key).await;
                    },
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(store_id = %store_id, "Distributed cache read failed: {}", e);
                },
            }

            match lookup(key).await {
                Ok(Some(value)) => {
                    match serde_json::to_string(&value) {
                        Ok(raw) => {
                            if let Err(e) = store.kv_set(&remote_key, &raw, Some(ttl)).await {
                                warn!(store_id = %store_id, "Distributed cache write failed: {}", e);
                            }
                        },
                        Err(e) => {
                            warn!(store_id = %store_id, "Cache serialization failed: {}", e);
                        },
                    }
                    Ok(value)
                },
                Ok(None) => Err(LoadError::Miss),
                Err(e) => Err(LoadError::Failed(e.to_string())),
            }
        };

        match self.local.try_get_with(primary_key, init).await {
            Ok(value) => Ok(Some(value)),
            Err(err) => match &*err {
                LoadError::Miss => Ok(None),
                LoadError::Failed(details) => Err(AppError::Internal(details.clone())),
            },
        }
    }

    /// Drop the entry locally, evict it from the distributed store and tell
    /// the other nodes to do the same
    pub async fn invalidate(&self, key: &K) -> Result<(), AppError> {
        let primary_key = key.primary_key();
        self.local.invalidate(&primary_key).await;
        self.store.kv_del(&self.remote_key(&primary_key)).await?;

        let message = InvalidationMessage {
            store_id: self.store_id.clone(),
            key: primary_key,
            source_node_id: node_id(),
        };
        let payload = serde_json::to_string(&message)
            .map_err(|e| AppError::Internal(format!("Invalidation encoding failed: {}", e)))?;

        self.store.publish(INVALIDATION_CHANNEL, &payload).await?;
        Ok(())
    }

    /// Drop the entry from both layers without announcing it
    ///
    /// Used by consumers reacting to a domain-level change event that is
    /// itself fanned out to every node; republishing here would echo forever.
    pub async fn evict(&self, key: &K) -> Result<(), AppError> {
        let primary_key = key.primary_key();
        self.local.invalidate(&primary_key).await;
        self.store.kv_del(&self.remote_key(&primary_key)).await?;
        Ok(())
    }

    /// Wire this cache's local layer into the process invalidation hub
    pub async fn attach(&self, hub: &InvalidationHub) {
        let local = self.local.clone();
        hub.register(
            &self.store_id,
            Arc::new(move |key| {
                let local = local.clone();
                tokio::spawn(async move {
                    local.invalidate(&key).await;
                });
            }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cache(
        store: SharedStore,
        value: Option<String>,
    ) -> (LookupCache<String, String>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = LookupCache::new("test", store, Duration::from_secs(60), move |_key| {
            let counter = Arc::clone(&counter);
            let value = value.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        });
        (cache, calls)
    }

    #[tokio::test]
    async fn test_hit_is_cached_locally() {
        let (cache, calls) = counting_cache(SharedStore::memory(), Some("v".to_string()));

        assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_is_not_cached() {
        let (cache, calls) = counting_cache(SharedStore::memory(), None);

        assert_eq!(cache.get(&"k".to_string()).await.unwrap(), None);
        assert_eq!(cache.get(&"k".to_string()).await.unwrap(), None);
        // Each miss re-runs the lookup
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distributed_layer_shared_across_instances() {
        let store = SharedStore::memory();
        let (first, first_calls) = counting_cache(store.clone(), Some("v".to_string()));
        let (second, second_calls) = counting_cache(store, Some("other".to_string()));

        assert_eq!(first.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));

        // Second instance finds the persisted entry and never runs its lookup
        assert_eq!(second.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_relookup() {
        let (cache, calls) = counting_cache(SharedStore::memory(), Some("v".to_string()));

        cache.get(&"k".to_string()).await.unwrap();
        cache.invalidate(&"k".to_string()).await.unwrap();
        cache.get(&"k".to_string()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_gets_deduplicated() {
        let store = SharedStore::memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = LookupCache::new("dedup", store, Duration::from_secs(60), move |_key: String| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Some("v".to_string()))
            })
        });

        let a = cache.clone();
        let b = cache.clone();
        let key_a = "k".to_string();
        let key_b = "k".to_string();
        let (ra, rb) = tokio::join!(
            a.get(&key_a),
            b.get(&key_b),
        );
        assert_eq!(ra.unwrap(), Some("v".to_string()));
        assert_eq!(rb.unwrap(), Some("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_invalidation_drops_local_entry() {
        let store = SharedStore::memory();
        let hub = InvalidationHub::start(store.clone()).await.unwrap();
        let (cache, calls) = counting_cache(store.clone(), Some("v".to_string()));
        cache.attach(&hub).await;

        cache.get(&"k".to_string()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Another node invalidated the key: distributed entry gone, message published
        store.kv_del("cache:test:k").await.unwrap();
        let message = InvalidationMessage {
            store_id: "test".to_string(),
            key: "k".to_string(),
            source_node_id: Uuid::new_v4(),
        };
        store
            .publish(INVALIDATION_CHANNEL, &serde_json::to_string(&message).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cache.get(&"k".to_string()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
