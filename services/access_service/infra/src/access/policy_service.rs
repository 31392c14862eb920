//! Policy service implementation
//!
//! `require(resource, action)` gates every protected operation: interactive
//! and MFA rules first, then the user's liveness, then the tenant-scoped
//! role permissions resolved through the `policy` cache. Grants and revokes
//! invalidate the cache and fan the change out on the event bus.

use access_service_core::domains::access::domain::model::Role;
use access_service_core::domains::access::domain::repository::{
    PermissionRepository, UserRepository,
};
use access_service_core::domains::access::domain::service::PolicyService;
use async_trait::async_trait;
use shared_cache::{CacheKey, LookupCache, SharedStore};
use shared_context::TenantId;
use shared_error::AppError;
use shared_events::{EventBus, EventEnvelope, PolicyChangedEvent, POLICY_CHANGED};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Catalog entry: `(resource, action, privileged)`. Privileged actions are
/// seeded only for owner and admin.
pub const PERMISSION_CATALOG: &[(&str, &str, bool)] = &[
    ("users", "read", false),
    ("users", "update", false),
    ("users", "update_notification_preferences", false),
    ("users", "set_role", true),
    ("users", "delete", true),
    ("sessions", "read", false),
    ("sessions", "revoke", false),
    ("mfa", "manage", false),
    ("policy", "read", false),
    ("policy", "grant", true),
    ("policy", "revoke", true),
    ("apps", "read", false),
    ("apps", "update_settings", true),
    ("audit", "read", true),
];

/// Operations that demand a user-driven session rather than an API key
fn requires_interactive(resource: &str, action: &str) -> bool {
    resource == "auth"
        || resource == "mfa"
        || (resource == "users" && action == "update_notification_preferences")
}

/// Operations gated behind a verified MFA posture
fn requires_mfa(resource: &str, action: &str) -> bool {
    matches!(
        (resource, action),
        ("users", "set_role")
            | ("users", "delete")
            | ("policy", "grant")
            | ("policy", "revoke")
            | ("apps", "update_settings")
    )
}

/// Cache key for a tenant's role permissions
#[derive(Debug, Clone)]
pub struct RoleScopedKey {
    pub tenant_id: TenantId,
    pub role: Role,
}

impl CacheKey for RoleScopedKey {
    fn primary_key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.role)
    }
}

pub struct PolicyServiceImpl {
    users: Arc<dyn UserRepository>,
    permissions: Arc<dyn PermissionRepository>,
    audit: super::audit::AuditSink,
    bus: EventBus,
    cache: LookupCache<RoleScopedKey, Vec<(String, String)>>,
}

impl PolicyServiceImpl {
    pub fn new(
        users: Arc<dyn UserRepository>,
        permissions: Arc<dyn PermissionRepository>,
        audit: super::audit::AuditSink,
        bus: EventBus,
        store: SharedStore,
        cache_ttl: Duration,
    ) -> Self {
        let lookup_repo = Arc::clone(&permissions);
        let cache = LookupCache::new("policy", store, cache_ttl, move |key: RoleScopedKey| {
            let repo = Arc::clone(&lookup_repo);
            Box::pin(async move {
                let rows = repo.by_role(&key.tenant_id, key.role).await?;
                Ok(Some(
                    rows.into_iter()
                        .map(|row| (row.resource, row.action))
                        .collect::<Vec<_>>(),
                ))
            })
        });

        Self {
            users,
            permissions,
            audit,
            bus,
            cache,
        }
    }

    /// Wire the policy cache into the process invalidation hub
    pub async fn attach_invalidation(&self, hub: &shared_cache::InvalidationHub) {
        self.cache.attach(hub).await;
    }

    /// React to `policy.changed` from any node (including this one) by
    /// dropping the affected cache entry
    pub async fn subscribe_invalidations(&self) -> Result<(), AppError> {
        let cache = self.cache.clone();
        self.bus
            .subscribe(POLICY_CHANGED, move |event: EventEnvelope<PolicyChangedEvent>| {
                let cache = cache.clone();
                async move {
                    let key = RoleScopedKey {
                        tenant_id: event.data.tenant_id,
                        role: event.data.role.parse().unwrap_or(Role::Guest),
                    };
                    if let Err(e) = cache.evict(&key).await {
                        warn!("Policy cache eviction failed: {}", e);
                    }
                }
            })
            .await
    }

    async fn announce_change(&self, tenant_id: &TenantId, role: Role) -> Result<(), AppError> {
        let event = EventEnvelope::new(
            POLICY_CHANGED,
            PolicyChangedEvent {
                tenant_id: tenant_id.clone(),
                role: role.to_string(),
            },
        );
        self.bus.publish(POLICY_CHANGED, event).await
    }
}

#[async_trait]
impl PolicyService for PolicyServiceImpl {
    async fn require(&self, resource: &str, action: &str) -> Result<(), AppError> {
        let session = shared_context::session()?;
        let tenant = shared_context::tenant_id();

        if requires_interactive(resource, action) && !session.is_interactive() {
            return Err(AppError::Forbidden("Interactive session required".to_string()));
        }

        if requires_mfa(resource, action) {
            if !session.mfa_enabled {
                return Err(AppError::Forbidden("MFA enrollment required".to_string()));
            }
            if !session.is_verified() {
                return Err(AppError::Forbidden("MFA verification required".to_string()));
            }
        }

        let user = self
            .users
            .one(&tenant, session.user_id)
            .await?
            .filter(|user| user.is_live())
            .ok_or_else(|| AppError::Auth("User no longer active".to_string()))?;

        let key = RoleScopedKey {
            tenant_id: tenant.clone(),
            role: user.role,
        };
        let granted = self.cache.get(&key).await?.unwrap_or_default();

        let allowed = granted
            .iter()
            .any(|(r, a)| r == resource && a == action);

        if !allowed {
            warn!(
                tenant = %tenant,
                role = %user.role,
                resource = resource,
                action = action,
                "Permission denied"
            );
            self.audit.record(
                "security.permission_denied",
                Some(user.user_id),
                serde_json::json!({
                    "role": user.role.to_string(),
                    "resource": resource,
                    "action": action,
                }),
            );
            metrics::counter!(
                "policy_denials",
                "tenant" => tenant.to_string(),
                "role" => user.role.to_string(),
                "resource" => resource.to_string(),
                "action" => action.to_string()
            )
            .increment(1);
            return Err(AppError::Forbidden("Insufficient permissions".to_string()));
        }

        Ok(())
    }

    async fn grant(&self, role: Role, resource: &str, action: &str) -> Result<(), AppError> {
        let tenant = shared_context::tenant_id();
        self.permissions.grant(&tenant, role, resource, action).await?;

        self.cache
            .invalidate(&RoleScopedKey {
                tenant_id: tenant.clone(),
                role,
            })
            .await?;
        self.announce_change(&tenant, role).await?;

        info!(tenant = %tenant, role = %role, resource, action, "Permission granted");
        self.audit.record(
            "policy.granted",
            None,
            serde_json::json!({"role": role.to_string(), "resource": resource, "action": action}),
        );
        Ok(())
    }

    async fn revoke(&self, role: Role, resource: &str, action: &str) -> Result<(), AppError> {
        let tenant = shared_context::tenant_id();
        let removed = self.permissions.revoke(&tenant, role, resource, action).await?;
        if !removed {
            return Err(AppError::NotFound {
                resource: "permission".to_string(),
                id: Some(format!("{}:{}:{}", role, resource, action)),
            });
        }

        self.cache
            .invalidate(&RoleScopedKey {
                tenant_id: tenant.clone(),
                role,
            })
            .await?;
        self.announce_change(&tenant, role).await?;

        info!(tenant = %tenant, role = %role, resource, action, "Permission revoked");
        self.audit.record(
            "policy.revoked",
            None,
            serde_json::json!({"role": role.to_string(), "resource": resource, "action": action}),
        );
        Ok(())
    }

    async fn seed_tenant_defaults(&self, tenant_id: &TenantId) -> Result<u32, AppError> {
        let mut entries = Vec::new();
        for (resource, action, privileged) in PERMISSION_CATALOG {
            let roles: &[Role] = if *privileged { &Role::PRIVILEGED } else { &Role::ALL };
            for role in roles {
                entries.push((*role, resource.to_string(), action.to_string()));
            }
        }

        let seeded = self.permissions.seed(tenant_id, &entries).await?;
        info!(tenant = %tenant_id, rows = seeded, "Tenant permission catalog seeded");
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_service_core::domains::access::domain::model::{
        PermissionRow, User, UserStatus,
    };
    use chrono::Utc;
    use shared_context::{RequestContext, SessionContext, SessionKind};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct FakeUserRepo {
        rows: Arc<Mutex<HashMap<Uuid, User>>>,
    }

    #[async_trait]
    impl UserRepository for FakeUserRepo {
        async fn one(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<Option<User>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&user_id)
                .filter(|u| u.tenant_id == tenant_id.as_str())
                .cloned())
        }

        async fn by_email(&self, _: &TenantId, _: &str) -> Result<Option<User>, AppError> {
            Ok(None)
        }

        async fn insert(&self, user: &User) -> Result<User, AppError> {
            self.rows.lock().unwrap().insert(user.user_id, user.clone());
            Ok(user.clone())
        }

        async fn set_role(&self, _: &TenantId, user_id: Uuid, role: Role) -> Result<(), AppError> {
            if let Some(user) = self.rows.lock().unwrap().get_mut(&user_id) {
                user.role = role;
            }
            Ok(())
        }

        async fn set_status(
            &self,
            _: &TenantId,
            user_id: Uuid,
            status: UserStatus,
        ) -> Result<(), AppError> {
            if let Some(user) = self.rows.lock().unwrap().get_mut(&user_id) {
                user.status = status;
            }
            Ok(())
        }

        async fn soft_delete(&self, _: &TenantId, user_id: Uuid) -> Result<(), AppError> {
            if let Some(user) = self.rows.lock().unwrap().get_mut(&user_id) {
                user.deleted_at = Some(Utc::now());
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakePermissionRepo {
        rows: Arc<Mutex<Vec<PermissionRow>>>,
    }

    #[async_trait]
    impl PermissionRepository for FakePermissionRepo {
        async fn by_role(
            &self,
            tenant_id: &TenantId,
            role: Role,
        ) -> Result<Vec<PermissionRow>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|p| {
                    p.tenant_id == tenant_id.as_str() && p.role == role && p.deleted_at.is_none()
                })
                .cloned()
                .collect())
        }

        async fn find(
            &self,
            tenant_id: &TenantId,
            role: Role,
            resource: &str,
            action: &str,
        ) -> Result<Option<PermissionRow>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|p| {
                    p.tenant_id == tenant_id.as_str()
                        && p.role == role
                        && p.resource == resource
                        && p.action == action
                        && p.deleted_at.is_none()
                })
                .cloned())
        }

        async fn grant(
            &self,
            tenant_id: &TenantId,
            role: Role,
            resource: &str,
            action: &str,
        ) -> Result<PermissionRow, AppError> {
            let row = PermissionRow {
                permission_id: Uuid::now_v7(),
                tenant_id: tenant_id.to_string(),
                role,
                resource: resource.to_string(),
                action: action.to_string(),
                created_at: Utc::now(),
                deleted_at: None,
            };
            self.rows.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn revoke(
            &self,
            tenant_id: &TenantId,
            role: Role,
            resource: &str,
            action: &str,
        ) -> Result<bool, AppError> {
            let mut rows = self.rows.lock().unwrap();
            for row in rows.iter_mut() {
                if row.tenant_id == tenant_id.as_str()
                    && row.role == role
                    && row.resource == resource
                    && row.action == action
                    && row.deleted_at.is_none()
                {
                    row.deleted_at = Some(Utc::now());
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn seed(
            &self,
            tenant_id: &TenantId,
            entries: &[(Role, String, String)],
        ) -> Result<u32, AppError> {
            for (role, resource, action) in entries {
                self.grant(tenant_id, *role, resource, action).await?;
            }
            Ok(entries.len() as u32)
        }
    }

    #[derive(Clone, Default)]
    struct NullAuditRepo;

    #[async_trait]
    impl access_service_core::domains::access::domain::repository::AuditLogRepository for NullAuditRepo {
        async fn insert(
            &self,
            _entry: &access_service_core::domains::access::domain::model::AuditLogRow,
        ) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn live_user(tenant: &str, role: Role) -> User {
        User {
            user_id: Uuid::now_v7(),
            tenant_id: tenant.to_string(),
            email: "user@example.com".to_string(),
            role,
            status: UserStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn session_for(user: &User, kind: SessionKind, mfa_enabled: bool, verified: bool) -> SessionContext {
        SessionContext {
            id: Uuid::now_v7(),
            user_id: user.user_id,
            kind,
            mfa_enabled,
            verified_at: if verified { Some(Utc::now()) } else { None },
        }
    }

    fn service(users: FakeUserRepo, permissions: FakePermissionRepo) -> PolicyServiceImpl {
        PolicyServiceImpl::new(
            Arc::new(users),
            Arc::new(permissions),
            super::super::audit::AuditSink::new(Arc::new(NullAuditRepo)),
            EventBus::Disabled,
            SharedStore::memory(),
            Duration::from_secs(300),
        )
    }

    fn ctx(tenant: &str, session: SessionContext) -> RequestContext {
        RequestContext::for_tenant(TenantId::new(tenant)).with_session(session)
    }

    #[tokio::test]
    async fn test_require_without_session_fails_auth() {
        let service = service(FakeUserRepo::default(), FakePermissionRepo::default());

        let err = shared_context::within(
            RequestContext::for_tenant(TenantId::new("t1")),
            service.require("users", "read"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn test_require_denied_without_permission_row() {
        let users = FakeUserRepo::default();
        let user = live_user("t1", Role::Member);
        users.insert(&user).await.unwrap();

        let service = service(users, FakePermissionRepo::default());
        let session = session_for(&user, SessionKind::Session, false, true);

        let err = shared_context::within(ctx("t1", session), service.require("admin", "list_users"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref msg) if msg == "Insufficient permissions"));
    }

    #[tokio::test]
    async fn test_grant_then_require_passes() {
        let users = FakeUserRepo::default();
        let user = live_user("t1", Role::Member);
        users.insert(&user).await.unwrap();

        let service = service(users, FakePermissionRepo::default());
        let session = session_for(&user, SessionKind::Session, false, true);

        shared_context::within(ctx("t1", session), async {
            assert!(service.require("reports", "read").await.is_err());

            service.grant(Role::Member, "reports", "read").await.unwrap();
            service.require("reports", "read").await.unwrap();

            // Revocation takes effect through invalidation
            service.revoke(Role::Member, "reports", "read").await.unwrap();
            assert!(service.require("reports", "read").await.is_err());
        })
        .await;
    }

    #[tokio::test]
    async fn test_interactive_rule_blocks_api_keys() {
        let users = FakeUserRepo::default();
        let user = live_user("t1", Role::Owner);
        users.insert(&user).await.unwrap();

        let service = service(users, FakePermissionRepo::default());
        let session = session_for(&user, SessionKind::ApiKey, false, true);

        let err = shared_context::within(ctx("t1", session), service.require("mfa", "manage"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref msg) if msg == "Interactive session required"));
    }

    #[tokio::test]
    async fn test_mfa_rules() {
        let users = FakeUserRepo::default();
        let user = live_user("t1", Role::Owner);
        users.insert(&user).await.unwrap();
        let service = service(users, FakePermissionRepo::default());

        // Not enrolled
        let session = session_for(&user, SessionKind::Session, false, true);
        let err = shared_context::within(ctx("t1", session), service.require("policy", "grant"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref msg) if msg == "MFA enrollment required"));

        // Enrolled but this session never verified
        let session = session_for(&user, SessionKind::Session, true, false);
        let err = shared_context::within(ctx("t1", session), service.require("policy", "grant"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref msg) if msg == "MFA verification required"));
    }

    #[tokio::test]
    async fn test_disabled_user_rejected() {
        let users = FakeUserRepo::default();
        let mut user = live_user("t1", Role::Owner);
        user.status = UserStatus::Disabled;
        users.insert(&user).await.unwrap();

        let service = service(users, FakePermissionRepo::default());
        let session = session_for(&user, SessionKind::Session, false, true);

        let err = shared_context::within(ctx("t1", session), service.require("users", "read"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[tokio::test]
    async fn test_seeding_respects_privilege() {
        let users = FakeUserRepo::default();
        let permissions = FakePermissionRepo::default();
        let service = service(users, permissions.clone());
        let tenant = TenantId::new("t-new");

        service.seed_tenant_defaults(&tenant).await.unwrap();

        // Non-privileged entries land on every role
        assert!(permissions
            .find(&tenant, Role::Guest, "users", "read")
            .await
            .unwrap()
            .is_some());

        // Privileged entries only on owner and admin
        assert!(permissions
            .find(&tenant, Role::Owner, "policy", "grant")
            .await
            .unwrap()
            .is_some());
        assert!(permissions
            .find(&tenant, Role::Admin, "policy", "grant")
            .await
            .unwrap()
            .is_some());
        assert!(permissions
            .find(&tenant, Role::Member, "policy", "grant")
            .await
            .unwrap()
            .is_none());
    }
}
