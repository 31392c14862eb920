use access_service_core::domains::access::domain::{
    model::MfaSecretRow, repository::MfaSecretRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_context::TenantId;
use shared_error::AppError;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL implementation of MfaSecretRepository
#[derive(Clone)]
pub struct PgMfaSecretRepository {
    pool: PgPool,
}

impl PgMfaSecretRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MfaSecretRepository for PgMfaSecretRepository {
    async fn by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<Option<MfaSecretRow>, AppError> {
        let secret = sqlx::query_as::<_, MfaSecretRow>(
            "SELECT * FROM mfa_secrets WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(secret)
    }

    async fn upsert(&self, secret: &MfaSecretRow) -> Result<MfaSecretRow, AppError> {
        // Re-enrollment over a pending (never-verified) secret replaces it
        let secret = sqlx::query_as::<_, MfaSecretRow>(
            r#"
            INSERT INTO mfa_secrets (
                secret_id, tenant_id, user_id, encrypted, backup_hashes,
                enabled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, user_id) WHERE deleted_at IS NULL
            DO UPDATE SET
                encrypted = EXCLUDED.encrypted,
                backup_hashes = EXCLUDED.backup_hashes,
                enabled_at = EXCLUDED.enabled_at,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(secret.secret_id)
        .bind(&secret.tenant_id)
        .bind(secret.user_id)
        .bind(&secret.encrypted)
        .bind(&secret.backup_hashes)
        .bind(secret.enabled_at)
        .bind(secret.created_at)
        .bind(secret.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(secret)
    }

    async fn set_enabled(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE mfa_secrets
            SET enabled_at = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_backup_hashes(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        hashes: &[String],
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE mfa_secrets
            SET backup_hashes = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .bind(hashes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn soft_delete(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_secrets
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
