use access_service_core::domains::access::domain::{
    model::OAuthAccountRow, repository::OAuthAccountRepository,
};
use async_trait::async_trait;
use shared_error::AppError;
use sqlx::PgPool;

/// PostgreSQL implementation of OAuthAccountRepository
///
/// `(provider, external_id)` is globally unique; callback-time lookups run
/// before the user's tenant is known.
#[derive(Clone)]
pub struct PgOAuthAccountRepository {
    pool: PgPool,
}

impl PgOAuthAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OAuthAccountRepository for PgOAuthAccountRepository {
    async fn by_external(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<OAuthAccountRow>, AppError> {
        let account = sqlx::query_as::<_, OAuthAccountRow>(
            r#"
            SELECT * FROM oauth_accounts
            WHERE provider = $1 AND external_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn upsert(&self, account: &OAuthAccountRow) -> Result<OAuthAccountRow, AppError> {
        let account = sqlx::query_as::<_, OAuthAccountRow>(
            r#"
            INSERT INTO oauth_accounts (
                account_id, tenant_id, user_id, provider, external_id,
                access_encrypted, refresh_encrypted, expires_at, scope,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (provider, external_id) WHERE deleted_at IS NULL
            DO UPDATE SET
                access_encrypted = EXCLUDED.access_encrypted,
                refresh_encrypted = EXCLUDED.refresh_encrypted,
                expires_at = EXCLUDED.expires_at,
                scope = EXCLUDED.scope,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(account.account_id)
        .bind(&account.tenant_id)
        .bind(account.user_id)
        .bind(&account.provider)
        .bind(&account.external_id)
        .bind(&account.access_encrypted)
        .bind(&account.refresh_encrypted)
        .bind(account.expires_at)
        .bind(&account.scope)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }
}
