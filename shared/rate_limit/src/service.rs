//! Preset-level consume API
//!
//! Builds the tenant-scoped key, runs the configured limiter, applies the
//! preset's failure policy and writes the outcome into the request context.

use crate::limiter::{Decision, RateLimiter};
use crate::memory_limiter::InMemoryRateLimiter;
use crate::preset::{FailureMode, Preset};
use crate::redis_limiter::RedisRateLimiter;
use shared_context::RateLimitInfo;
use shared_error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared rate limiter that can use either Redis or in-memory storage
#[derive(Clone)]
pub enum SharedRateLimiter {
    Redis(RedisRateLimiter),
    InMemory(InMemoryRateLimiter),
}

impl SharedRateLimiter {
    pub async fn from_config(redis_url: Option<&str>) -> Self {
        if let Some(url) = redis_url {
            match RedisRateLimiter::new(url).await {
                Ok(limiter) => {
                    info!("Rate limiter using Redis backend");
                    return Self::Redis(limiter);
                },
                Err(e) => {
                    warn!(
                        "Failed to connect to Redis for rate limiting: {}. Falling back to in-memory.",
                        e
                    );
                },
            }
        }

        info!("Rate limiter using in-memory backend");
        Self::InMemory(InMemoryRateLimiter::new())
    }

    fn limiter(&self) -> &dyn RateLimiter {
        match self {
            Self::Redis(l) => l,
            Self::InMemory(l) => l,
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self {
            Self::Redis(l) => l.is_healthy().await,
            Self::InMemory(l) => l.is_healthy().await,
        }
    }
}

/// Entry point used by the edge before every protected operation
#[derive(Clone)]
pub struct RateLimitService {
    limiter: Arc<SharedRateLimiter>,
}

impl RateLimitService {
    pub fn new(limiter: SharedRateLimiter) -> Self {
        Self {
            limiter: Arc::new(limiter),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(SharedRateLimiter::InMemory(InMemoryRateLimiter::new()))
    }

    pub async fn from_config(redis_url: Option<&str>) -> Self {
        Self::new(SharedRateLimiter::from_config(redis_url).await)
    }

    /// Consume budget for the current tenant / principal / client address
    ///
    /// Writes the decision into the request context. Delay-mode presets sleep
    /// out the deficit instead of rejecting; all other presets fail with
    /// `RateLimit` when exhausted.
    pub async fn consume(
        &self,
        preset: Preset,
        user_id: Option<Uuid>,
        ip: Option<&str>,
    ) -> Result<Decision, AppError> {
        let tenant = shared_context::tenant_id();
        let key = preset.key(tenant.as_str(), user_id, ip);
        let strategy = preset.strategy();

        let decision = match self.limiter.limiter().consume(&key, &strategy).await {
            Ok(decision) => decision,
            Err(e) => {
                metrics::counter!("rate_limit_store_failures", "preset" => preset.name()).increment(1);
                match preset.failure_mode() {
                    FailureMode::Open => {
                        warn!(preset = preset.name(), "Rate limit store unavailable, failing open: {}", e);
                        Decision::allowed(strategy.limit(), strategy.limit(), strategy.window().as_secs())
                    },
                    FailureMode::Closed => {
                        warn!(preset = preset.name(), "Rate limit store unavailable, failing closed: {}", e);
                        Decision::denied(
                            strategy.limit(),
                            strategy.window().as_secs(),
                            strategy.window().as_millis() as u64,
                        )
                    },
                }
            },
        };

        let mut applied_delay = 0;

        if !decision.allowed && preset.is_delay_mode() {
            // Absorb the deficit instead of rejecting, bounded by the window
            applied_delay = decision.retry_after_ms.min(strategy.window().as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(applied_delay)).await;
        }

        shared_context::update(|ctx| {
            ctx.rate_limit = Some(RateLimitInfo {
                limit: decision.limit,
                remaining: decision.remaining,
                reset_after: decision.reset_after,
                delay: applied_delay,
            });
        });

        if decision.allowed || preset.is_delay_mode() {
            return Ok(decision);
        }

        metrics::counter!(
            "rate_limited",
            "preset" => preset.name(),
            "tenant" => tenant.to_string()
        )
        .increment(1);
        warn!(
            preset = preset.name(),
            tenant = %tenant,
            retry_after_ms = decision.retry_after_ms,
            "Rate limit exceeded"
        );

        Err(AppError::RateLimit {
            retry_after_ms: decision.retry_after_ms,
            limit: Some(decision.limit),
            remaining: Some(decision.remaining),
            recovery_action: preset.recovery_action().map(String::from),
        })
    }
}
