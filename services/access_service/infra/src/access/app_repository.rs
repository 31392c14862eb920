use access_service_core::domains::access::domain::{model::App, repository::AppRepository};
use async_trait::async_trait;
use shared_context::TenantId;
use shared_error::AppError;
use sqlx::PgPool;

/// PostgreSQL implementation of AppRepository (system scope)
#[derive(Clone)]
pub struct PgAppRepository {
    pool: PgPool,
}

impl PgAppRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppRepository for PgAppRepository {
    async fn one(&self, app_id: &TenantId) -> Result<Option<App>, AppError> {
        let app = sqlx::query_as::<_, App>(
            "SELECT * FROM apps WHERE app_id = $1 AND deleted_at IS NULL",
        )
        .bind(app_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    async fn by_namespace(&self, namespace: &str) -> Result<Option<App>, AppError> {
        let app = sqlx::query_as::<_, App>(
            "SELECT * FROM apps WHERE namespace = $1 AND deleted_at IS NULL",
        )
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    async fn insert(&self, app: &App) -> Result<App, AppError> {
        let app = sqlx::query_as::<_, App>(
            r#"
            INSERT INTO apps (app_id, namespace, name, settings, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&app.app_id)
        .bind(&app.namespace)
        .bind(&app.name)
        .bind(&app.settings)
        .bind(&app.status)
        .bind(app.created_at)
        .bind(app.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(app)
    }

    async fn drop(&self, app_id: &TenantId) -> Result<bool, AppError> {
        // Hard delete: provisioning compensation must leave no trace
        let result = sqlx::query("DELETE FROM apps WHERE app_id = $1")
            .bind(app_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn read_settings(&self, app_id: &TenantId) -> Result<serde_json::Value, AppError> {
        let row: Option<(sqlx::types::Json<serde_json::Value>,)> = sqlx::query_as(
            "SELECT settings FROM apps WHERE app_id = $1 AND deleted_at IS NULL",
        )
        .bind(app_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(settings,)| settings.0)
            .ok_or_else(|| AppError::NotFound {
                resource: "app".to_string(),
                id: Some(app_id.to_string()),
            })
    }

    async fn update_settings(
        &self,
        app_id: &TenantId,
        settings: serde_json::Value,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE apps
            SET settings = $2, updated_at = NOW()
            WHERE app_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(app_id.as_str())
        .bind(sqlx::types::Json(settings))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: "app".to_string(),
                id: Some(app_id.to_string()),
            });
        }
        Ok(())
    }
}
