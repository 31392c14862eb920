use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User role within a tenant
///
/// Ranked: guest < viewer < member < admin < owner. Privileged catalog
/// entries are seeded only for admin and owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::Viewer => 1,
            Role::Member => 2,
            Role::Admin => 3,
            Role::Owner => 4,
        }
    }

    pub fn at_least(&self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    pub const ALL: [Role; 5] = [Role::Guest, Role::Viewer, Role::Member, Role::Admin, Role::Owner];

    /// Roles receiving privileged catalog entries at tenant seeding
    pub const PRIVILEGED: [Role; 2] = [Role::Admin, Role::Owner];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Guest => write!(f, "guest"),
            Role::Viewer => write!(f, "viewer"),
            Role::Member => write!(f, "member"),
            Role::Admin => write!(f, "admin"),
            Role::Owner => write!(f, "owner"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "viewer" => Ok(Role::Viewer),
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
    Suspended,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Disabled => write!(f, "disabled"),
            UserStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// User entity (domain model)
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // Soft delete
}

impl User {
    /// Live users only: active status and not soft-deleted
    pub fn is_live(&self) -> bool {
        self.status == UserStatus::Active && self.deleted_at.is_none()
    }
}

/// Session entity
///
/// Only the HMAC of the opaque token touches storage; `(tenant_id, token_hash)`
/// is unique among non-deleted rows.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    /// None exactly while MFA is enrolled but not yet verified for this session
    pub verified_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Refresh token entity; same shape as the session with a refresh-only
/// validity window
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRow {
    pub token_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// MFA secret entity
///
/// `encrypted` holds the AES-GCM frame of the shared secret under the tenant
/// key. Backup hashes are formatted `salt$sha256(salt || code_upper)`.
#[derive(Debug, Clone, FromRow)]
pub struct MfaSecretRow {
    pub secret_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub encrypted: Vec<u8>,
    pub backup_hashes: Vec<String>,
    /// Set by the first successful verify; Some ⇔ MFA active
    pub enabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MfaSecretRow {
    pub fn is_enabled(&self) -> bool {
        self.enabled_at.is_some() && self.deleted_at.is_none()
    }
}

/// OAuth identity entity; unique on `(provider, external_id)`
#[derive(Debug, Clone, FromRow)]
pub struct OAuthAccountRow {
    pub account_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub access_encrypted: Vec<u8>,
    pub refresh_encrypted: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Permission entity
///
/// A role possesses `(resource, action)` iff a non-deleted row matches
/// exactly.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionRow {
    pub permission_id: Uuid,
    pub tenant_id: String,
    pub role: Role,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// App (tenant) entity; `app_id` is the tenant id carried in every request
/// context
#[derive(Debug, Clone, FromRow)]
pub struct App {
    pub app_id: String,
    pub namespace: String,
    pub name: String,
    pub settings: sqlx::types::Json<serde_json::Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Audit log entry; writes are fire-and-forget
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub audit_id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub subject_id: Option<Uuid>,
    pub details: sqlx::types::Json<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogRow {
    pub fn new(
        tenant_id: &str,
        event_type: &str,
        subject_id: Option<Uuid>,
        details: serde_json::Value,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::now_v7(),
            tenant_id: tenant_id.to_string(),
            event_type: event_type.to_string(),
            subject_id,
            details: sqlx::types::Json(details),
            ip_address,
            user_agent,
            created_at: Utc::now(),
        }
    }
}

/// Session summary persisted in the lookup cache (5-minute TTL)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub app_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<&SessionRow> for SessionSummary {
    fn from(row: &SessionRow) -> Self {
        Self {
            id: row.session_id,
            user_id: row.user_id,
            app_id: row.tenant_id.clone(),
            access_expires_at: row.access_expires_at,
            verified_at: row.verified_at,
        }
    }
}
