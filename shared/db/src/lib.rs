use shared_context::TenantId;
use shared_error::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Initialize database connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to connect to database: {}", e)))
}

/// Begin a transaction bound to a tenant
///
/// The first statement on the connection executes the tenant-scoping
/// directive; row-level security policies filter on
/// `current_setting('app.current_tenant')` for every statement that follows.
/// The setting is transaction-local, so the connection returns to the pool
/// unscoped.
pub async fn begin_tenant_tx(
    pool: &PgPool,
    tenant_id: &TenantId,
) -> Result<Transaction<'static, Postgres>, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
        .bind(tenant_id.as_str())
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}
