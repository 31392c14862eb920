//! MFA service implementation
//!
//! TOTP enrollment, verification with replay protection, backup-code
//! recovery and posture reporting. The shared secret is stored hex-encoded
//! inside an AES-GCM frame under the tenant key; backup codes are stored as
//! salted digests only.

use access_service_core::domains::access::domain::model::MfaSecretRow;
use access_service_core::domains::access::domain::repository::MfaSecretRepository;
use access_service_core::domains::access::domain::service::MfaService;
use access_service_core::domains::access::dto::mfa_dto::{
    MfaEnrollResp, MfaStatusResp, MfaVerifyResp,
};
use access_service_core::domains::access::utils::{backup_codes, totp};
use async_trait::async_trait;
use chrono::Utc;
use shared_cache::{CacheKey, LookupCache, SharedStore};
use shared_context::TenantId;
use shared_crypto::TenantCipher;
use shared_error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::audit::AuditSink;
use super::replay_guard::ReplayGuard;

/// Tenant-scoped user key for the posture cache
#[derive(Debug, Clone)]
pub struct UserScopedKey {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
}

impl CacheKey for UserScopedKey {
    fn primary_key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.user_id)
    }
}

pub struct MfaServiceImpl {
    secrets: Arc<dyn MfaSecretRepository>,
    cipher: TenantCipher,
    replay: ReplayGuard,
    audit: AuditSink,
    app_name: String,
    /// userId → enabled; staleness bounded by the configured TTL
    posture_cache: LookupCache<UserScopedKey, bool>,
}

impl MfaServiceImpl {
    pub fn new(
        secrets: Arc<dyn MfaSecretRepository>,
        cipher: TenantCipher,
        replay: ReplayGuard,
        audit: AuditSink,
        store: SharedStore,
        app_name: &str,
        posture_ttl: Duration,
    ) -> Self {
        let lookup_repo = Arc::clone(&secrets);
        let posture_cache = LookupCache::new("mfa_enabled", store, posture_ttl, move |key: UserScopedKey| {
            let repo = Arc::clone(&lookup_repo);
            Box::pin(async move {
                let enabled = repo
                    .by_user(&key.tenant_id, key.user_id)
                    .await?
                    .map(|row| row.is_enabled())
                    .unwrap_or(false);
                Ok(Some(enabled))
            })
        });

        Self {
            secrets,
            cipher,
            replay,
            audit,
            app_name: app_name.to_string(),
            posture_cache,
        }
    }

    /// Wire the posture cache into the process invalidation hub
    pub async fn attach_invalidation(&self, hub: &shared_cache::InvalidationHub) {
        self.posture_cache.attach(hub).await;
    }

    fn posture_key(&self, user_id: Uuid) -> UserScopedKey {
        UserScopedKey {
            tenant_id: shared_context::tenant_id(),
            user_id,
        }
    }

    async fn load_secret(&self, user_id: Uuid) -> Result<MfaSecretRow, AppError> {
        self.secrets
            .by_user(&shared_context::tenant_id(), user_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: "mfa_enrollment".to_string(),
                id: Some(user_id.to_string()),
            })
    }

    fn decrypt_secret(&self, row: &MfaSecretRow) -> Result<Vec<u8>, AppError> {
        let hex_secret = self.cipher.decrypt(&row.encrypted)?;
        hex::decode(&hex_secret)
            .map_err(|_| AppError::Internal("Stored MFA secret is malformed".to_string()))
    }
}

#[async_trait]
impl MfaService for MfaServiceImpl {
    async fn enroll(&self, user_id: Uuid, account_name: &str) -> Result<MfaEnrollResp, AppError> {
        let tenant = shared_context::tenant_id();

        if let Some(existing) = self.secrets.by_user(&tenant, user_id).await? {
            if existing.is_enabled() {
                return Err(AppError::conflict("mfa", "MFA is already enabled"));
            }
            // A pending enrollment is replaced by the upsert below
        }

        let secret = totp::generate_secret();
        let encrypted = self.cipher.encrypt(&hex::encode(&secret))?;

        let salt = backup_codes::new_salt();
        let codes = backup_codes::generate_codes();
        let backup_hashes: Vec<String> = codes
            .iter()
            .map(|code| backup_codes::hash_code(&salt, code))
            .collect();

        let now = Utc::now();
        let row = MfaSecretRow {
            secret_id: Uuid::now_v7(),
            tenant_id: tenant.to_string(),
            user_id,
            encrypted,
            backup_hashes,
            enabled_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.secrets.upsert(&row).await?;
        self.posture_cache.invalidate(&self.posture_key(user_id)).await?;

        info!(user_id = %user_id, "MFA enrollment created");
        self.audit.record("mfa.enrolled", Some(user_id), serde_json::json!({}));

        Ok(MfaEnrollResp {
            secret: totp::base32_encode(&secret),
            backup_codes: codes,
            otpauth_url: totp::provisioning_uri(&self.app_name, account_name, &secret),
        })
    }

    async fn verify_totp(&self, user_id: Uuid, code: &str) -> Result<MfaVerifyResp, AppError> {
        self.replay.check_lockout(user_id).await?;

        let row = self.load_secret(user_id).await?;
        let secret = self.decrypt_secret(&row)?;

        let now_ms = Utc::now().timestamp_millis();
        let Some(delta) = totp::verify(&secret, code, now_ms, totp::WINDOW) else {
            self.replay.record_failure(user_id).await;
            metrics::counter!("mfa_verify_failures", "kind" => "totp").increment(1);
            return Err(AppError::Auth("Invalid MFA code".to_string()));
        };

        let step = totp::time_step(now_ms) + delta;
        let outcome = self.replay.check_and_mark(user_id, step, code).await;
        if outcome.already_used {
            // A replayed code counts as a failure even though the TOTP math
            // checked out
            self.replay.record_failure(user_id).await;
            warn!(user_id = %user_id, "TOTP replay detected");
            metrics::counter!("mfa_verify_failures", "kind" => "replay").increment(1);
            return Err(AppError::Auth("Invalid MFA code".to_string()));
        }

        self.replay.record_success(user_id).await;

        if row.enabled_at.is_none() {
            // First successful verify confirms enrollment
            self.secrets
                .set_enabled(&shared_context::tenant_id(), user_id, Utc::now())
                .await?;
            self.posture_cache.invalidate(&self.posture_key(user_id)).await?;
            info!(user_id = %user_id, "MFA activated");
        }

        self.audit.record("mfa.verified", Some(user_id), serde_json::json!({"method": "totp"}));

        Ok(MfaVerifyResp {
            verified: true,
            remaining_backup_codes: row.backup_hashes.len(),
        })
    }

    async fn verify_backup(&self, user_id: Uuid, code: &str) -> Result<MfaVerifyResp, AppError> {
        self.replay.check_lockout(user_id).await?;

        let row = self.load_secret(user_id).await?;

        let Some(index) = backup_codes::find_match(&row.backup_hashes, code) else {
            self.replay.record_failure(user_id).await;
            metrics::counter!("mfa_verify_failures", "kind" => "backup").increment(1);
            return Err(AppError::Auth(format!(
                "Invalid backup code ({} remaining)",
                row.backup_hashes.len()
            )));
        };

        // First match consumes the entry
        let mut remaining = row.backup_hashes.clone();
        remaining.remove(index);
        self.secrets
            .update_backup_hashes(&shared_context::tenant_id(), user_id, &remaining)
            .await?;

        self.replay.record_success(user_id).await;
        self.audit.record(
            "mfa.recovered",
            Some(user_id),
            serde_json::json!({"remaining_backup_codes": remaining.len()}),
        );

        Ok(MfaVerifyResp {
            verified: true,
            remaining_backup_codes: remaining.len(),
        })
    }

    async fn disable(&self, user_id: Uuid) -> Result<(), AppError> {
        let tenant = shared_context::tenant_id();
        let removed = self.secrets.soft_delete(&tenant, user_id).await?;
        if !removed {
            return Err(AppError::NotFound {
                resource: "mfa_enrollment".to_string(),
                id: Some(user_id.to_string()),
            });
        }

        self.posture_cache.invalidate(&self.posture_key(user_id)).await?;
        self.audit.record("mfa.disabled", Some(user_id), serde_json::json!({}));
        Ok(())
    }

    async fn status(&self, user_id: Uuid) -> Result<MfaStatusResp, AppError> {
        let row = self
            .secrets
            .by_user(&shared_context::tenant_id(), user_id)
            .await?;

        Ok(match row {
            Some(row) => MfaStatusResp {
                enrolled: true,
                enabled: row.is_enabled(),
                remaining_backup_codes: Some(row.backup_hashes.len()),
            },
            None => MfaStatusResp {
                enrolled: false,
                enabled: false,
                remaining_backup_codes: None,
            },
        })
    }

    async fn is_enabled(&self, user_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .posture_cache
            .get(&self.posture_key(user_id))
            .await?
            .unwrap_or(false))
    }
}
