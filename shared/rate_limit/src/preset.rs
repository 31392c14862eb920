//! Rate limit presets
//!
//! Each protected operation is assigned one preset. The preset fixes the
//! strategy, the per-window budget, the cost per request and the behavior
//! when the backing store is unavailable.

use crate::limiter::Strategy;
use std::time::Duration;
use uuid::Uuid;

/// Behavior when the rate-limit store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Pretend full allowance; availability beats precision
    Open,
    /// Deny exactly like an exhausted budget
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    Api,
    Mutation,
    Auth,
    Mfa,
    Health,
    Realtime,
}

impl Preset {
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Api => "api",
            Preset::Mutation => "mutation",
            Preset::Auth => "auth",
            Preset::Mfa => "mfa",
            Preset::Health => "health",
            Preset::Realtime => "realtime",
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Preset::Api => Strategy::TokenBucket {
                capacity: 100,
                window: Duration::from_secs(60),
                tokens_per_request: 1,
            },
            Preset::Mutation => Strategy::TokenBucket {
                capacity: 100,
                window: Duration::from_secs(60),
                tokens_per_request: 5,
            },
            Preset::Auth | Preset::Mfa => Strategy::FixedWindow {
                limit: 5,
                window: Duration::from_secs(15 * 60),
            },
            Preset::Health | Preset::Realtime => Strategy::FixedWindow {
                limit: 300,
                window: Duration::from_secs(60),
            },
        }
    }

    pub fn failure_mode(&self) -> FailureMode {
        match self {
            Preset::Auth | Preset::Mfa => FailureMode::Closed,
            _ => FailureMode::Open,
        }
    }

    /// Presets that absorb excess by delaying instead of rejecting
    pub fn is_delay_mode(&self) -> bool {
        matches!(self, Preset::Mutation)
    }

    /// Hint surfaced to clients when the budget is exhausted
    pub fn recovery_action(&self) -> Option<&'static str> {
        match self {
            Preset::Auth | Preset::Mfa => Some("email-verify"),
            _ => None,
        }
    }

    /// `"{preset}:{tenant}:{user|anonymous}:{ip|unknown}"`
    pub fn key(&self, tenant_id: &str, user_id: Option<Uuid>, ip: Option<&str>) -> String {
        let user = user_id
            .map(|u| u.to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        format!("{}:{}:{}:{}", self.name(), tenant_id, user, ip.unwrap_or("unknown"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_modes() {
        assert_eq!(Preset::Auth.failure_mode(), FailureMode::Closed);
        assert_eq!(Preset::Mfa.failure_mode(), FailureMode::Closed);
        assert_eq!(Preset::Api.failure_mode(), FailureMode::Open);
        assert_eq!(Preset::Health.failure_mode(), FailureMode::Open);
    }

    #[test]
    fn test_only_auth_family_has_recovery() {
        assert_eq!(Preset::Auth.recovery_action(), Some("email-verify"));
        assert_eq!(Preset::Mfa.recovery_action(), Some("email-verify"));
        assert_eq!(Preset::Api.recovery_action(), None);
    }

    #[test]
    fn test_key_format() {
        let user = Uuid::parse_str("00000000-0000-7000-8000-000000000001").unwrap();
        assert_eq!(
            Preset::Auth.key("acme", Some(user), Some("10.0.0.1")),
            format!("auth:acme:{}:10.0.0.1", user)
        );
        assert_eq!(Preset::Api.key("acme", None, None), "api:acme:anonymous:unknown");
    }
}
