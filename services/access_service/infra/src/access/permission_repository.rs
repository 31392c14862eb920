use access_service_core::domains::access::domain::{
    model::{PermissionRow, Role},
    repository::PermissionRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use shared_context::TenantId;
use shared_error::AppError;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL implementation of PermissionRepository
#[derive(Clone)]
pub struct PgPermissionRepository {
    pool: PgPool,
}

impl PgPermissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn by_role(
        &self,
        tenant_id: &TenantId,
        role: Role,
    ) -> Result<Vec<PermissionRow>, AppError> {
        let permissions = sqlx::query_as::<_, PermissionRow>(
            "SELECT * FROM permissions WHERE tenant_id = $1 AND role = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id.as_str())
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    async fn find(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<Option<PermissionRow>, AppError> {
        let permission = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT * FROM permissions
            WHERE tenant_id = $1 AND role = $2 AND resource = $3 AND action = $4
              AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(role)
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;

        Ok(permission)
    }

    async fn grant(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<PermissionRow, AppError> {
        let permission = sqlx::query_as::<_, PermissionRow>(
            r#"
            INSERT INTO permissions (permission_id, tenant_id, role, resource, action, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, role, resource, action) WHERE deleted_at IS NULL
            DO UPDATE SET created_at = permissions.created_at
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id.as_str())
        .bind(role)
        .bind(resource)
        .bind(action)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(permission)
    }

    async fn revoke(
        &self,
        tenant_id: &TenantId,
        role: Role,
        resource: &str,
        action: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE permissions
            SET deleted_at = NOW()
            WHERE tenant_id = $1 AND role = $2 AND resource = $3 AND action = $4
              AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(role)
        .bind(resource)
        .bind(action)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn seed(
        &self,
        tenant_id: &TenantId,
        entries: &[(Role, String, String)],
    ) -> Result<u32, AppError> {
        let mut tx = shared_db::begin_tenant_tx(&self.pool, tenant_id).await?;
        let now = Utc::now();

        for (role, resource, action) in entries {
            sqlx::query(
                r#"
                INSERT INTO permissions (permission_id, tenant_id, role, resource, action, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tenant_id, role, resource, action) WHERE deleted_at IS NULL
                DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(tenant_id.as_str())
            .bind(role)
            .bind(resource)
            .bind(action)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entries.len() as u32)
    }
}
