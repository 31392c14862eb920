//! Rate limiter trait and types

use async_trait::async_trait;
use std::time::Duration;

/// Limiting strategy resolved from a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Continuous refill at `capacity / window`; each request costs
    /// `tokens_per_request`
    TokenBucket {
        capacity: u32,
        window: Duration,
        tokens_per_request: u32,
    },
    /// Hard cap per window; the counter resets when the window rolls over
    FixedWindow { limit: u32, window: Duration },
}

impl Strategy {
    pub fn limit(&self) -> u32 {
        match self {
            Strategy::TokenBucket { capacity, .. } => *capacity,
            Strategy::FixedWindow { limit, .. } => *limit,
        }
    }

    pub fn window(&self) -> Duration {
        match self {
            Strategy::TokenBucket { window, .. } => *window,
            Strategy::FixedWindow { window, .. } => *window,
        }
    }
}

/// Result of a consume call
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Whether the request fit in the budget
    pub allowed: bool,
    /// Budget size for the window
    pub limit: u32,
    /// Requests (or whole token-costs) left in the current window
    pub remaining: u32,
    /// Seconds until the budget resets
    pub reset_after: u64,
    /// Milliseconds until the request would fit; 0 when allowed
    pub retry_after_ms: u64,
}

impl Decision {
    pub fn allowed(limit: u32, remaining: u32, reset_after: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after_ms: 0,
        }
    }

    pub fn denied(limit: u32, reset_after: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after_ms,
        }
    }
}

/// Error types for rate limiting operations
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    RedisError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Rate limiter trait for different backends
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one request's worth of budget for `key`
    async fn consume(&self, key: &str, strategy: &Strategy) -> Result<Decision, RateLimitError>;

    /// Reset the budget for a specific key
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;

    /// Check if the backend is reachable
    async fn is_healthy(&self) -> bool;
}
