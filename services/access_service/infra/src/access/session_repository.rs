use access_service_core::domains::access::domain::{
    model::{RefreshTokenRow, SessionRow},
    repository::{PairTemplate, RefreshTokenRepository, RotationOutcome, SessionRepository},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_context::TenantId;
use shared_error::AppError;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL implementation of SessionRepository
///
/// Pair mutations run inside tenant-scoped transactions
/// (`shared_db::begin_tenant_tx`), so row-level security filters every
/// statement even if a predicate is missed here.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert_pair(
        &self,
        session: &SessionRow,
        refresh: &RefreshTokenRow,
    ) -> Result<(), AppError> {
        let mut tx = shared_db::begin_tenant_tx(&self.pool, &TenantId::new(&session.tenant_id)).await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, tenant_id, user_id, token_hash, refresh_token_hash,
                access_expires_at, refresh_expires_at, verified_at,
                ip_address, user_agent, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(session.session_id)
        .bind(&session.tenant_id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.refresh_token_hash)
        .bind(session.access_expires_at)
        .bind(session.refresh_expires_at)
        .bind(session.verified_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                token_id, tenant_id, user_id, session_id, token_hash,
                expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(refresh.token_id)
        .bind(&refresh.tenant_id)
        .bind(refresh.user_id)
        .bind(refresh.session_id)
        .bind(&refresh.token_hash)
        .bind(refresh.expires_at)
        .bind(refresh.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn by_hash(
        &self,
        tenant_id: &TenantId,
        token_hash: &str,
    ) -> Result<Option<SessionRow>, AppError> {
        let session = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND token_hash = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id.as_str())
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn rotate(
        &self,
        tenant_id: &TenantId,
        old_refresh_hash: &str,
        replacement: PairTemplate,
    ) -> Result<RotationOutcome, AppError> {
        let mut tx = shared_db::begin_tenant_tx(&self.pool, tenant_id).await?;

        // The row lock serializes concurrent rotations of the same token; a
        // loser re-runs this query after the winner committed and sees no row
        let old_refresh = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT * FROM refresh_tokens
            WHERE tenant_id = $1 AND token_hash = $2 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid refresh token".to_string()))?;

        if old_refresh.expires_at <= Utc::now() {
            return Err(AppError::Auth("Refresh token expired".to_string()));
        }

        // The user must still exist and be active
        let user_status: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM users
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match user_status {
            Some((status,)) if status == "active" => {},
            _ => return Err(AppError::Auth("User no longer active".to_string())),
        }

        // Re-read MFA posture; the user may have enrolled since login
        let mfa_enabled: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            SELECT enabled_at FROM mfa_secrets
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let mfa_enabled = matches!(mfa_enabled, Some((Some(_),)));

        let old_session = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND session_id = $2",
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh.session_id)
        .fetch_one(&mut *tx)
        .await?;

        // A session that never passed MFA stays pending on the new pair
        let mfa_pending = mfa_enabled && old_session.verified_at.is_none();

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE sessions
            SET deleted_at = $3, updated_at = $3
            WHERE tenant_id = $1 AND session_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh.session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET deleted_at = $3
            WHERE tenant_id = $1 AND token_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(old_refresh.token_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let verified_at = if mfa_pending { None } else { Some(now) };
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, tenant_id, user_id, token_hash, refresh_token_hash,
                access_expires_at, refresh_expires_at, verified_at,
                ip_address, user_agent, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(replacement.session_id)
        .bind(tenant_id.as_str())
        .bind(old_refresh.user_id)
        .bind(&replacement.token_hash)
        .bind(&replacement.refresh_token_hash)
        .bind(replacement.access_expires_at)
        .bind(replacement.refresh_expires_at)
        .bind(verified_at)
        .bind(&replacement.ip_address)
        .bind(&replacement.user_agent)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                token_id, tenant_id, user_id, session_id, token_hash,
                expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(replacement.refresh_token_id)
        .bind(tenant_id.as_str())
        .bind(old_refresh.user_id)
        .bind(replacement.session_id)
        .bind(&replacement.refresh_token_hash)
        .bind(replacement.refresh_expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RotationOutcome {
            user_id: old_refresh.user_id,
            old_session_id: old_refresh.session_id,
            old_token_hash: old_session.token_hash,
            new_session_id: replacement.session_id,
            mfa_pending,
        })
    }

    async fn touch(&self, tenant_id: &TenantId, session_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET updated_at = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn verify(
        &self,
        tenant_id: &TenantId,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET verified_at = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn soft_delete(&self, tenant_id: &TenantId, session_id: Uuid) -> Result<(), AppError> {
        let mut tx = shared_db::begin_tenant_tx(&self.pool, tenant_id).await?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET deleted_at = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete_by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut tx = shared_db::begin_tenant_tx(&self.pool, tenant_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET deleted_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE refresh_expires_at < NOW()
               OR (deleted_at IS NOT NULL AND deleted_at < NOW() - INTERVAL '30 days')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < NOW()
               OR (deleted_at IS NOT NULL AND deleted_at < NOW() - INTERVAL '30 days')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// PostgreSQL implementation of RefreshTokenRepository
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn by_hash(
        &self,
        tenant_id: &TenantId,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRow>, AppError> {
        let token = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT * FROM refresh_tokens
            WHERE tenant_id = $1 AND token_hash = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn soft_delete_by_user(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET deleted_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
