//! In-process store implementation
//!
//! Suitable for single-instance deployments and tests. The invalidation
//! channel is a broadcast channel local to the process.

use crate::store::SetNxOutcome;
use crate::CacheError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// In-memory key/value + set store with TTL support
#[derive(Clone)]
pub struct MemoryStore {
    kv: Arc<RwLock<HashMap<String, KvEntry>>>,
    sets: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(RwLock::new(HashMap::new())),
            sets: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let kv = self.kv.read().await;
        Ok(kv.get(key).filter(|e| !e.is_expired()).map(|e| e.value.clone()))
    }

    pub async fn kv_set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut kv = self.kv.write().await;
        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    pub async fn kv_del(&self, key: &str) -> Result<(), CacheError> {
        self.kv.write().await.remove(key);
        Ok(())
    }

    /// Atomic set-if-absent; expired entries count as absent
    pub async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<SetNxOutcome, CacheError> {
        let mut kv = self.kv.write().await;

        if let Some(existing) = kv.get(key) {
            if !existing.is_expired() {
                return Ok(SetNxOutcome { already_exists: true });
            }
        }

        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(SetNxOutcome { already_exists: false })
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut sets = self.sets.write().await;
        sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let sets = self.sets.read().await;
        Ok(sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            // Send fails only when nobody is subscribed
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }

    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<String>, CacheError> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0);

        let mut rx = tx.subscribe();
        let (out_tx, out_rx) = tokio::sync::mpsc::channel(256);

        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        Ok(out_rx)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.kv_get("k").await.unwrap(), None);

        store.kv_set("k", "v", None).await.unwrap();
        assert_eq!(store.kv_get("k").await.unwrap(), Some("v".to_string()));

        store.kv_del("k").await.unwrap();
        assert_eq!(store.kv_get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kv_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .kv_set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.kv_get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.kv_get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_first_wins() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(150);

        let first = store.set_nx("totp:u:1:123456", "1", ttl).await.unwrap();
        assert!(!first.already_exists);

        let second = store.set_nx("totp:u:1:123456", "1", ttl).await.unwrap();
        assert!(second.already_exists);
    }

    #[tokio::test]
    async fn test_set_nx_expired_entry_is_absent() {
        let store = MemoryStore::new();
        store
            .set_nx("k", "1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let again = store.set_nx("k", "1", Duration::from_secs(10)).await.unwrap();
        assert!(!again.already_exists);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        store.set_add("s", "a").await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.set_remove("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("chan").await.unwrap();

        store.publish("chan", "hello").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }
}
