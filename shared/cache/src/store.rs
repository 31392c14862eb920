//! Shared store abstraction over the memory and Redis backends

use crate::memory_store::MemoryStore;
use crate::redis_store::RedisStore;
use crate::CacheError;
use std::time::Duration;
use tracing::{info, warn};

/// Result of an atomic set-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetNxOutcome {
    pub already_exists: bool,
}

/// Distributed store that can use either Redis or in-memory storage
#[derive(Clone)]
pub enum SharedStore {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl SharedStore {
    /// Build from configuration, falling back to memory when Redis is
    /// unreachable
    pub async fn from_config(redis_url: Option<&str>) -> Self {
        if let Some(url) = redis_url {
            match RedisStore::new(url).await {
                Ok(store) => {
                    info!("Cache store using Redis backend");
                    return Self::Redis(store);
                },
                Err(e) => {
                    warn!("Failed to connect to Redis for caching: {}. Falling back to in-memory.", e);
                },
            }
        }

        info!("Cache store using in-memory backend");
        Self::Memory(MemoryStore::new())
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Redis(s) => s.kv_get(key).await,
            Self::Memory(s) => s.kv_get(key).await,
        }
    }

    pub async fn kv_set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        match self {
            Self::Redis(s) => s.kv_set(key, value, ttl).await,
            Self::Memory(s) => s.kv_set(key, value, ttl).await,
        }
    }

    pub async fn kv_del(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(s) => s.kv_del(key).await,
            Self::Memory(s) => s.kv_del(key).await,
        }
    }

    /// Atomic set-if-absent with TTL; no read-then-write race on either
    /// backend
    pub async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<SetNxOutcome, CacheError> {
        match self {
            Self::Redis(s) => s.set_nx(key, value, ttl).await,
            Self::Memory(s) => s.set_nx(key, value, ttl).await,
        }
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(s) => s.set_add(key, member).await,
            Self::Memory(s) => s.set_add(key, member).await,
        }
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        match self {
            Self::Redis(s) => s.set_members(key).await,
            Self::Memory(s) => s.set_members(key).await,
        }
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(s) => s.set_remove(key, member).await,
            Self::Memory(s) => s.set_remove(key, member).await,
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(s) => s.publish(channel, payload).await,
            Self::Memory(s) => s.publish(channel, payload).await,
        }
    }

    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<String>, CacheError> {
        match self {
            Self::Redis(s) => s.subscribe(channel).await,
            Self::Memory(s) => s.subscribe(channel).await,
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self {
            Self::Redis(s) => s.is_healthy().await,
            Self::Memory(_) => true,
        }
    }
}
