//! Event definitions for the trust plane
//!
//! This module contains the event types published on the bus for
//! cross-pod coordination.

use serde::{Deserialize, Serialize};
use shared_context::TenantId;

/// Subject for role permission changes
pub const POLICY_CHANGED: &str = "policy.changed";

/// Subject for tenant provisioning / settings updates
pub const APP_SETTINGS_UPDATED: &str = "app.settings.updated";

/// Published after a permission grant or revoke commits
///
/// Every node (including the publisher) drops its cached role permissions for
/// the `(tenant_id, role)` pair on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChangedEvent {
    pub tenant_id: TenantId,
    pub role: String,
}

/// Published when a tenant is provisioned or its settings change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettingsUpdatedEvent {
    pub tenant_id: TenantId,
    pub namespace: String,
}

/// Event envelope for bus messaging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Event type identifier
    pub event_type: String,
    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Event version for backward compatibility
    pub version: String,
    /// Event data
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(event_type: &str, data: T) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now(),
            version: "1.0".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let event = EventEnvelope::new(
            POLICY_CHANGED,
            PolicyChangedEvent {
                tenant_id: TenantId::new("acme"),
                role: "member".to_string(),
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let decoded: EventEnvelope<PolicyChangedEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.event_type, POLICY_CHANGED);
        assert_eq!(decoded.data.role, "member");
        assert_eq!(decoded.data.tenant_id, TenantId::new("acme"));
    }
}
