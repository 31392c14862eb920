//! Redis-based rate limiter implementation
//!
//! Both strategies run as Lua scripts so concurrent consumers on different
//! nodes see one atomic budget.

use crate::limiter::{Decision, RateLimitError, RateLimiter, Strategy};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Redis rate limiter for distributed deployments
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    /// Key prefix for all rate limit keys
    key_prefix: String,
}

impl RedisRateLimiter {
    pub async fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::RedisError(e.to_string()))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::RedisError(e.to_string()))?;

        Ok(Self {
            connection,
            key_prefix: "rl".to_string(),
        })
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn consume_bucket(
        &self,
        key: &str,
        capacity: u32,
        window_ms: u64,
        cost: u32,
    ) -> Result<Decision, RateLimitError> {
        // Refill continuously at capacity/window; deduct cost if it fits.
        // Returns {allowed, whole_tokens_left, wait_ms}.
        let script = redis::Script::new(
            r#"
            local key = KEYS[1]
            local now_ms = tonumber(ARGV[1])
            local capacity = tonumber(ARGV[2])
            local window_ms = tonumber(ARGV[3])
            local cost = tonumber(ARGV[4])

            local state = redis.call('HMGET', key, 'tokens', 'ts')
            local tokens = tonumber(state[1])
            local ts = tonumber(state[2])
            if tokens == nil then
                tokens = capacity
                ts = now_ms
            end

            local refill = (now_ms - ts) * capacity / window_ms
            tokens = math.min(capacity, tokens + refill)

            local allowed = 0
            local wait_ms = 0
            if tokens >= cost then
                tokens = tokens - cost
                allowed = 1
            else
                wait_ms = math.ceil((cost - tokens) * window_ms / capacity)
            end

            redis.call('HMSET', key, 'tokens', tokens, 'ts', now_ms)
            redis.call('PEXPIRE', key, window_ms * 2)
            return {allowed, math.floor(tokens), wait_ms}
            "#,
        );

        let mut conn = self.connection.clone();
        let result: Vec<i64> = script
            .key(self.build_key(key))
            .arg(Self::now_millis())
            .arg(capacity)
            .arg(window_ms)
            .arg(cost)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::RedisError(e.to_string()))?;

        let window_secs = window_ms / 1000;
        if result[0] == 1 {
            Ok(Decision::allowed(capacity, result[1] as u32, window_secs))
        } else {
            Ok(Decision::denied(capacity, window_secs, result[2] as u64))
        }
    }

    async fn consume_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
    ) -> Result<Decision, RateLimitError> {
        // INCR with an expiry pinned on first touch; PTTL drives Retry-After.
        // Returns {count, ttl_ms}.
        let script = redis::Script::new(
            r#"
            local key = KEYS[1]
            local limit = tonumber(ARGV[1])
            local window_ms = tonumber(ARGV[2])

            local count = tonumber(redis.call('GET', key) or '0')
            if count < limit then
                count = redis.call('INCR', key)
                if count == 1 then
                    redis.call('PEXPIRE', key, window_ms)
                end
            else
                count = count + 1
            end

            local ttl = redis.call('PTTL', key)
            if ttl < 0 then
                ttl = window_ms
            end
            return {count, ttl}
            "#,
        );

        let mut conn = self.connection.clone();
        let result: Vec<i64> = script
            .key(self.build_key(key))
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::RedisError(e.to_string()))?;

        let count = result[0] as u32;
        let ttl_ms = result[1] as u64;

        if count <= limit {
            Ok(Decision::allowed(limit, limit - count, ttl_ms / 1000))
        } else {
            Ok(Decision::denied(limit, ttl_ms / 1000, ttl_ms))
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn consume(&self, key: &str, strategy: &Strategy) -> Result<Decision, RateLimitError> {
        match *strategy {
            Strategy::TokenBucket {
                capacity,
                window,
                tokens_per_request,
            } => {
                self.consume_bucket(key, capacity, window.as_millis() as u64, tokens_per_request)
                    .await
            },
            Strategy::FixedWindow { limit, window } => {
                self.consume_window(key, limit, window.as_millis() as u64).await
            },
        }
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.build_key(key))
            .await
            .map_err(|e| RateLimitError::RedisError(e.to_string()))
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.connection.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(response) => response == "PONG",
            Err(e) => {
                error!("Redis health check failed: {}", e);
                false
            },
        }
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // These tests require a running Redis instance

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_fixed_window() {
        let redis_url = std::env::var("REDIS_URL").unwrap_or("redis://localhost:6379".to_string());
        let limiter = RedisRateLimiter::new(&redis_url).await.unwrap();
        let key = format!("test:window:{}", uuid::Uuid::new_v4());
        let strategy = Strategy::FixedWindow {
            limit: 3,
            window: Duration::from_secs(60),
        };

        for i in 0..3 {
            let decision = limiter.consume(&key, &strategy).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i + 1);
        }
        assert!(!limiter.consume(&key, &strategy).await.unwrap().allowed);

        limiter.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_token_bucket() {
        let redis_url = std::env::var("REDIS_URL").unwrap_or("redis://localhost:6379".to_string());
        let limiter = RedisRateLimiter::new(&redis_url).await.unwrap();
        let key = format!("test:bucket:{}", uuid::Uuid::new_v4());
        let strategy = Strategy::TokenBucket {
            capacity: 10,
            window: Duration::from_secs(60),
            tokens_per_request: 5,
        };

        assert!(limiter.consume(&key, &strategy).await.unwrap().allowed);
        assert!(limiter.consume(&key, &strategy).await.unwrap().allowed);
        assert!(!limiter.consume(&key, &strategy).await.unwrap().allowed);

        limiter.reset(&key).await.unwrap();
    }
}
