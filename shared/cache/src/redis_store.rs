//! Redis-backed store implementation
//!
//! All multi-step operations go through Lua scripts so they stay atomic at
//! the backend. The invalidation channel maps onto Redis pub/sub; a dedicated
//! connection drives the subscriber.

use crate::store::SetNxOutcome;
use crate::CacheError;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{error, warn};

/// Redis store for distributed deployments
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::RedisError(e.to_string()))?;

        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))?;

        Ok(Self { client, connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        conn.get(key)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    pub async fn kv_set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(|e| CacheError::RedisError(e.to_string())),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| CacheError::RedisError(e.to_string())),
        }
    }

    pub async fn kv_del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    /// Atomic SET NX EX; the winner keeps its TTL untouched
    pub async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<SetNxOutcome, CacheError> {
        let script = redis::Script::new(
            r#"
            if redis.call("SET", KEYS[1], ARGV[1], "NX", "EX", ARGV[2]) then
                return 1
            else
                return 0
            end
            "#,
        );

        let mut conn = self.conn();
        let created: i32 = script
            .key(key)
            .arg(value)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))?;

        Ok(SetNxOutcome {
            already_exists: created == 0,
        })
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        conn.smembers(key)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))
    }

    /// Subscribe on a dedicated connection; messages are forwarded into the
    /// returned channel until the receiver is dropped.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<String>, CacheError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::RedisError(e.to_string()))?;

        let channel = channel.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to read pub/sub payload on {}: {}", channel, e);
                        continue;
                    },
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            warn!("Subscriber for {} has ended", channel);
        });

        Ok(rx)
    }

    pub async fn is_healthy(&self) -> bool {
        let mut conn = self.conn();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(response) => response == "PONG",
            Err(e) => {
                error!("Redis health check failed: {}", e);
                false
            },
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
