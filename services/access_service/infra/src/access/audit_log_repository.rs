use access_service_core::domains::access::domain::{
    model::AuditLogRow, repository::AuditLogRepository,
};
use async_trait::async_trait;
use shared_error::AppError;
use sqlx::PgPool;

/// PostgreSQL implementation of AuditLogRepository
#[derive(Clone)]
pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn insert(&self, entry: &AuditLogRow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                audit_id, tenant_id, event_type, subject_id, details,
                ip_address, user_agent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.audit_id)
        .bind(&entry.tenant_id)
        .bind(&entry.event_type)
        .bind(entry.subject_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
