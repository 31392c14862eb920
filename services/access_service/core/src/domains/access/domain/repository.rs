use super::model::{
    App, AuditLogRow, MfaSecretRow, OAuthAccountRow, PermissionRow, RefreshTokenRow, Role,
    SessionRow, User, UserStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_context::TenantId;
use shared_error::AppError;
use uuid::Uuid;

/// Replacement credentials for a refresh rotation
///
/// `verified_at` on the new session is decided inside the rotation from the
/// re-read MFA posture, not by the caller.
#[derive(Debug, Clone)]
pub struct PairTemplate {
    pub session_id: Uuid,
    pub token_hash: String,
    pub refresh_token_id: Uuid,
    pub refresh_token_hash: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What a committed rotation established
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub user_id: Uuid,
    pub old_session_id: Uuid,
    pub old_token_hash: String,
    pub new_session_id: Uuid,
    pub mfa_pending: bool,
}

/// User repository trait
///
/// Implementations must handle tenant isolation; every method filters
/// soft-deleted rows.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn one(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn by_email(&self, tenant_id: &TenantId, email: &str) -> Result<Option<User>, AppError>;

    async fn insert(&self, user: &User) -> Result<User, AppError>;

    async fn set_role(&self, tenant_id: &TenantId, user_id: Uuid, role: Role) -> Result<(), AppError>;

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), AppError>;

    async fn soft_delete(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<(), AppError>;
}

/// Session repository trait
///
/// Pair operations are atomic: either both rows commit or neither does.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a session row and its refresh row in one transaction
    async fn insert_pair(
        &self,
        session: &SessionRow,
        refresh: &RefreshTokenRow,
    ) -> Result<(), AppError>;

    async fn by_hash(
        &self,
        tenant_id: &TenantId,
        token_hash: &str,
    ) -> Result<Option<SessionRow>, AppError>;

    /// Refresh rotation, entirely inside one transaction:
    /// lock the old refresh row (absent ⇒ `Auth(invalid)`), check expiry
    /// (⇒ `Auth(expired)`), check the user is live (⇒ `Auth(user_gone)`),
    /// re-read MFA posture, soft-delete the old pair, insert the replacement.
    /// Concurrent rotations of the same token serialize on the row lock; the
    /// losers observe the soft delete and fail `Auth(invalid)`.
    async fn rotate(
        &self,
        tenant_id: &TenantId,
        old_refresh_hash: &str,
        replacement: PairTemplate,
    ) -> Result<RotationOutcome, AppError>;

    /// Activity tracking; failures are the caller's to swallow
    async fn touch(&self, tenant_id: &TenantId, session_id: Uuid) -> Result<(), AppError>;

    /// Record the MFA verification instant
    async fn verify(
        &self,
        tenant_id: &TenantId,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn soft_delete(&self, tenant_id: &TenantId, session_id: Uuid) -> Result<(), AppError>;

    /// Soft-delete all of a user's sessions and refresh tokens atomically;
    /// returns the number of sessions revoked
    async fn soft_delete_by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<u64, AppError>;

    /// Maintenance sweep for rows past their refresh expiry
    async fn delete_expired(&self) -> Result<u64, AppError>;
}

/// Refresh token repository trait
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn by_hash(
        &self,
        tenant_id: &TenantId,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRow>, AppError>;

    async fn soft_delete_by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<u64, AppError>;
}

/// OAuth identity repository trait
///
/// `(provider, external_id)` is unique across tenants; lookups here run in
/// system scope during the callback, before the user's tenant is known.
#[async_trait]
pub trait OAuthAccountRepository: Send + Sync {
    async fn by_external(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<OAuthAccountRow>, AppError>;

    async fn upsert(&self, account: &OAuthAccountRow) -> Result<OAuthAccountRow, AppError>;
}

/// MFA secret repository trait
#[async_trait]
pub trait MfaSecretRepository: Send + Sync {
    async fn by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<Option<MfaSecretRow>, AppError>;

    async fn upsert(&self, secret: &MfaSecretRow) -> Result<MfaSecretRow, AppError>;

    /// First successful verify confirms enrollment
    async fn set_enabled(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Persist the remaining backup hashes after a code is consumed
    async fn update_backup_hashes(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        hashes: &[String],
    ) -> Result<(), AppError>;

    async fn soft_delete(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<bool, AppError>;
}

/// Permission repository trait
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn by_role(&self, tenant_id: &TenantId, role: Role) -> Result<Vec<PermissionRow>, AppError>;

    async fn find(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<Option<PermissionRow>, AppError>;

    async fn grant(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<PermissionRow, AppError>;

    async fn revoke(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<bool, AppError>;

    /// Bulk insert at tenant provisioning; one transaction
    async fn seed(
        &self,
        tenant_id: &TenantId,
        entries: &[(Role, String, String)],
    ) -> Result<u32, AppError>;
}

/// App (tenant) repository trait. All methods run in system scope.
#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn one(&self, app_id: &TenantId) -> Result<Option<App>, AppError>;

    async fn by_namespace(&self, namespace: &str) -> Result<Option<App>, AppError>;

    async fn insert(&self, app: &App) -> Result<App, AppError>;

    /// Hard delete; provisioning compensation when seeding fails
    async fn drop(&self, app_id: &TenantId) -> Result<bool, AppError>;

    async fn read_settings(&self, app_id: &TenantId) -> Result<serde_json::Value, AppError>;

    async fn update_settings(
        &self,
        app_id: &TenantId,
        settings: serde_json::Value,
    ) -> Result<(), AppError>;
}

/// Audit log repository trait
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn insert(&self, entry: &AuditLogRow) -> Result<(), AppError>;
}
