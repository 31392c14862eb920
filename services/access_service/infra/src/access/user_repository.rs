use access_service_core::domains::access::domain::{
    model::{Role, User, UserStatus},
    repository::UserRepository,
};
use async_trait::async_trait;
use shared_context::TenantId;
use shared_error::AppError;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL implementation of UserRepository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn one(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn by_email(&self, tenant_id: &TenantId, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND email = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id.as_str())
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert(&self, user: &User) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                user_id, tenant_id, email, role, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(user.user_id)
        .bind(&user.tenant_id)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.status)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn set_role(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET role = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET status = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn soft_delete(&self, tenant_id: &TenantId, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
