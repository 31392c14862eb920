//! Shared Rate Limiting Library
//!
//! Preset-driven rate limiting for the Parametric Portal platform:
//!
//! - Every operation is assigned a preset (`api`, `mutation`, `auth`, `mfa`,
//!   `health`, `realtime`) selecting strategy, budget and failure policy
//! - Token-bucket and fixed-window strategies over Redis (distributed) or an
//!   in-memory store (single node, tests)
//! - Fail-open presets pretend full allowance when the store is down;
//!   fail-closed presets deny exactly as if the budget were exhausted
//! - The consume result is written into the request context so the edge can
//!   emit `X-RateLimit-*` / `Retry-After` headers after the handler runs
//!
//! # Example
//!
//! ```rust,ignore
//! use shared_rate_limit::{Preset, RateLimitService};
//!
//! let service = RateLimitService::in_memory();
//! service.consume(Preset::Auth, Some(user_id), Some("203.0.113.9")).await?;
//! ```

pub mod limiter;
pub mod memory_limiter;
pub mod middleware;
pub mod preset;
pub mod redis_limiter;
pub mod service;

// Re-export main types
pub use limiter::{Decision, RateLimitError, RateLimiter, Strategy};
pub use memory_limiter::InMemoryRateLimiter;
pub use middleware::rate_limit_headers;
pub use preset::{FailureMode, Preset};
pub use redis_limiter::RedisRateLimiter;
pub use service::{RateLimitService, SharedRateLimiter};

#[cfg(test)]
mod tests {
    use super::*;
    use shared_context::{RequestContext, TenantId};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_auth_preset_denies_sixth_attempt() {
        let service = RateLimitService::in_memory();
        let ctx = RequestContext::for_tenant(TenantId::new("t1"));
        let user = Uuid::now_v7();

        shared_context::within(ctx, async {
            for i in 0..5 {
                let result = service.consume(Preset::Auth, Some(user), Some("10.0.0.1")).await;
                assert!(result.is_ok(), "attempt {} should be allowed", i + 1);
            }

            let denied = service.consume(Preset::Auth, Some(user), Some("10.0.0.1")).await;
            assert!(matches!(
                denied,
                Err(shared_error::AppError::RateLimit { recovery_action: Some(_), .. })
            ));
        })
        .await;
    }

    #[tokio::test]
    async fn test_presets_keyed_independently() {
        let service = RateLimitService::in_memory();
        let ctx = RequestContext::for_tenant(TenantId::new("t1"));
        let user = Uuid::now_v7();

        shared_context::within(ctx, async {
            for _ in 0..5 {
                service.consume(Preset::Auth, Some(user), Some("10.0.0.1")).await.unwrap();
            }
            assert!(service.consume(Preset::Auth, Some(user), Some("10.0.0.1")).await.is_err());

            // Same principal, different preset: untouched budget
            assert!(service.consume(Preset::Api, Some(user), Some("10.0.0.1")).await.is_ok());

            // Same preset, different tenant: untouched budget
            shared_context::within_tenant(TenantId::new("t2"), async {
                assert!(service.consume(Preset::Auth, Some(user), Some("10.0.0.1")).await.is_ok());
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_consume_records_into_context() {
        let service = RateLimitService::in_memory();
        let ctx = RequestContext::for_tenant(TenantId::new("t1"));

        shared_context::within(ctx, async {
            service.consume(Preset::Api, None, Some("10.0.0.2")).await.unwrap();

            let info = shared_context::current().rate_limit.expect("rate limit recorded");
            assert_eq!(info.limit, 100);
            assert_eq!(info.remaining, 99);
        })
        .await;
    }
}
