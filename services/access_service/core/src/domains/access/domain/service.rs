use super::machine::{RevokeReason, TokenSet};
use crate::domains::access::dto::auth_dto::{AuthResp, InitiateOutcome};
use crate::domains::access::dto::mfa_dto::{MfaEnrollResp, MfaStatusResp, MfaVerifyResp};
use async_trait::async_trait;
use shared_context::{SessionContext, TenantId};
use shared_error::AppError;
use uuid::Uuid;

/// Credentials minted for a new session; plaintext tokens exist only in this
/// value and the response that carries it
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tokens: TokenSet,
    pub mfa_pending: bool,
    /// Session replaced by a rotation, when this pair came from `refresh`
    pub rotated_from: Option<Uuid>,
}

/// MFA service trait
#[async_trait]
pub trait MfaService: Send + Sync {
    /// Enroll the user: fresh secret + backup codes, returned exactly once
    async fn enroll(&self, user_id: Uuid, account_name: &str) -> Result<MfaEnrollResp, AppError>;

    /// TOTP verification with replay detection and lockout
    async fn verify_totp(&self, user_id: Uuid, code: &str) -> Result<MfaVerifyResp, AppError>;

    /// Backup-code recovery; a matched code is consumed
    async fn verify_backup(&self, user_id: Uuid, code: &str) -> Result<MfaVerifyResp, AppError>;

    async fn disable(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn status(&self, user_id: Uuid) -> Result<MfaStatusResp, AppError>;

    /// Whether MFA is currently active for the user (cached, 5-minute bound)
    async fn is_enabled(&self, user_id: Uuid) -> Result<bool, AppError>;
}

/// Session service trait
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Mint a session + refresh pair; `verified_at = now` iff not MFA-pending
    async fn create(
        &self,
        user_id: Uuid,
        mfa_pending: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession, AppError>;

    /// `create` plus login telemetry and audit
    async fn login(
        &self,
        user_id: Uuid,
        mfa_pending: bool,
        provider: &str,
        is_new_user: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession, AppError>;

    /// Rotate the pair identified by this refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, AppError>;

    /// Soft-delete every session of the user; returns the count
    async fn revoke_all(&self, user_id: Uuid, reason: RevokeReason) -> Result<u64, AppError>;

    /// MFA transition: mark the session verified and drop its cache entry
    async fn mark_verified(&self, session_id: Uuid, token_hash: &str) -> Result<(), AppError>;

    /// Drop the cached summary for a token hash (used on revocation)
    async fn invalidate_lookup(&self, token_hash: &str) -> Result<(), AppError>;

    /// Cached token → session resolution; None on unknown, expired or
    /// tenant-mismatched tokens
    async fn lookup(&self, token: &str) -> Result<Option<SessionContext>, AppError>;
}

/// Policy service trait
#[async_trait]
pub trait PolicyService: Send + Sync {
    /// Gate at the start of every protected operation
    async fn require(&self, resource: &str, action: &str) -> Result<(), AppError>;

    async fn grant(
        &self,
        role: super::model::Role,
        resource: &str,
        action: &str,
    ) -> Result<(), AppError>;

    async fn revoke(
        &self,
        role: super::model::Role,
        resource: &str,
        action: &str,
    ) -> Result<(), AppError>;

    /// Catalog seeding at tenant provisioning; returns rows inserted
    async fn seed_tenant_defaults(&self, tenant_id: &TenantId) -> Result<u32, AppError>;
}

/// Auth flow service trait: the effectful face of the state machine
#[async_trait]
pub trait AuthFlowService: Send + Sync {
    /// `Initiate(provider)`: build the authorize URL and the encrypted state
    /// cookie
    async fn initiate(&self, provider: &str) -> Result<InitiateOutcome, AppError>;

    /// `Callback(code, state, cookie)`: exchange the code, resolve the user,
    /// mint a session
    async fn callback(&self, code: &str, state: &str, cookie_value: &str)
        -> Result<AuthResp, AppError>;

    /// `Verify(code, isBackup)` from the `mfa` phase
    async fn verify_mfa(
        &self,
        session_id: Uuid,
        code: &str,
        is_backup: bool,
    ) -> Result<MfaVerifyResp, AppError>;

    /// `Refresh(hash)` self-loop on `mfa` / `active`
    async fn refresh(&self, refresh_token: &str) -> Result<AuthResp, AppError>;

    /// `Revoke(reason)`: terminal; idempotent when the snapshot is already
    /// gone
    async fn revoke(&self, session_id: Uuid, reason: RevokeReason) -> Result<(), AppError>;
}

/// What tenant provisioning established
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub app: super::model::App,
    pub permissions_seeded: u32,
}

/// Tenant provisioning service trait
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// Insert the app row, seed the policy catalog and announce the tenant.
    /// Seeding failure rolls the app row back.
    async fn provision(&self, namespace: &str, name: &str) -> Result<ProvisionOutcome, AppError>;
}
