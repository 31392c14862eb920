//! In-memory rate limiter implementation
//!
//! Suitable for single-instance deployments or testing. For distributed
//! systems, use `RedisRateLimiter` instead.

use crate::limiter::{Decision, RateLimitError, RateLimiter, Strategy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum Entry {
    Bucket { tokens: f64, updated: Instant },
    Window { count: u32, started: Instant },
}

/// In-memory rate limiter supporting both strategies
#[derive(Debug, Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn consume(&self, key: &str, strategy: &Strategy) -> Result<Decision, RateLimitError> {
        let now = Instant::now();
        let mut store = self.store.write().await;

        match *strategy {
            Strategy::TokenBucket {
                capacity,
                window,
                tokens_per_request,
            } => {
                let refill_per_ms = f64::from(capacity) / window.as_millis() as f64;
                let cost = f64::from(tokens_per_request);

                let (mut tokens, updated) = match store.get(key) {
                    Some(Entry::Bucket { tokens, updated }) => (*tokens, *updated),
                    _ => (f64::from(capacity), now),
                };

                let elapsed_ms = now.duration_since(updated).as_millis() as f64;
                tokens = (tokens + elapsed_ms * refill_per_ms).min(f64::from(capacity));

                if tokens >= cost {
                    tokens -= cost;
                    store.insert(key.to_string(), Entry::Bucket { tokens, updated: now });
                    Ok(Decision::allowed(capacity, tokens as u32, window.as_secs()))
                } else {
                    store.insert(key.to_string(), Entry::Bucket { tokens, updated: now });
                    let wait_ms = ((cost - tokens) / refill_per_ms).ceil() as u64;
                    Ok(Decision::denied(capacity, window.as_secs(), wait_ms))
                }
            },
            Strategy::FixedWindow { limit, window } => {
                let (count, started) = match store.get(key) {
                    Some(Entry::Window { count, started })
                        if now.duration_since(*started) < window =>
                    {
                        (*count, *started)
                    },
                    _ => (0, now),
                };

                let remaining_window = window.saturating_sub(now.duration_since(started));

                if count < limit {
                    store.insert(key.to_string(), Entry::Window { count: count + 1, started });
                    Ok(Decision::allowed(
                        limit,
                        limit - count - 1,
                        remaining_window.as_secs(),
                    ))
                } else {
                    Ok(Decision::denied(
                        limit,
                        remaining_window.as_secs(),
                        remaining_window.as_millis() as u64,
                    ))
                }
            },
        }
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true // In-memory is always healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn auth_strategy() -> Strategy {
        Strategy::FixedWindow {
            limit: 5,
            window: Duration::from_secs(900),
        }
    }

    #[tokio::test]
    async fn test_fixed_window_denies_over_limit() {
        let limiter = InMemoryRateLimiter::new();

        for i in 0..5 {
            let decision = limiter.consume("k", &auth_strategy()).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.remaining, 4 - i);
        }

        let decision = limiter.consume("k", &auth_strategy()).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after_ms > 0);
    }

    #[tokio::test]
    async fn test_token_bucket_costs() {
        let limiter = InMemoryRateLimiter::new();
        let strategy = Strategy::TokenBucket {
            capacity: 10,
            window: Duration::from_secs(60),
            tokens_per_request: 5,
        };

        // 10 tokens cover exactly two requests at cost 5
        assert!(limiter.consume("k", &strategy).await.unwrap().allowed);
        assert!(limiter.consume("k", &strategy).await.unwrap().allowed);

        let denied = limiter.consume("k", &strategy).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_ms > 0);
    }

    #[tokio::test]
    async fn test_token_bucket_refills() {
        let limiter = InMemoryRateLimiter::new();
        let strategy = Strategy::TokenBucket {
            capacity: 100,
            window: Duration::from_millis(100),
            tokens_per_request: 100,
        };

        assert!(limiter.consume("k", &strategy).await.unwrap().allowed);
        assert!(!limiter.consume("k", &strategy).await.unwrap().allowed);

        // A full window refills the bucket
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.consume("k", &strategy).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter.consume("k", &auth_strategy()).await.unwrap();
        }
        assert!(!limiter.consume("k", &auth_strategy()).await.unwrap().allowed);

        limiter.reset("k").await.unwrap();
        assert!(limiter.consume("k", &auth_strategy()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_keys_independent() {
        let limiter = InMemoryRateLimiter::new();
        for _ in 0..5 {
            limiter.consume("k1", &auth_strategy()).await.unwrap();
        }
        assert!(!limiter.consume("k1", &auth_strategy()).await.unwrap().allowed);
        assert!(limiter.consume("k2", &auth_strategy()).await.unwrap().allowed);
    }
}
