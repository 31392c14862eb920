//! Fire-and-forget audit recording
//!
//! Audit writes never propagate failure into the calling operation: the row
//! is built from the current request context and persisted from a spawned
//! task; a failed insert is logged and dropped.

use access_service_core::domains::access::domain::{
    model::AuditLogRow, repository::AuditLogRepository,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditSink {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditSink {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    /// Record an event against the current request context
    pub fn record(&self, event_type: &str, subject_id: Option<Uuid>, details: serde_json::Value) {
        let ctx = shared_context::current();
        let entry = AuditLogRow::new(
            ctx.tenant_id.as_str(),
            event_type,
            subject_id,
            details,
            ctx.ip_address,
            ctx.user_agent,
        );

        let repo = Arc::clone(&self.repo);
        let event = event_type.to_string();
        tokio::spawn(async move {
            if let Err(e) = repo.insert(&entry).await {
                warn!(event_type = %event, "Audit write failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_error::AppError;
    use std::sync::Mutex;

    struct RecordingRepo {
        entries: Arc<Mutex<Vec<AuditLogRow>>>,
    }

    #[async_trait]
    impl AuditLogRepository for RecordingRepo {
        async fn insert(&self, entry: &AuditLogRow) -> Result<(), AppError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_record_captures_context() {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = AuditSink::new(Arc::new(RecordingRepo {
            entries: Arc::clone(&entries),
        }));

        let mut ctx = shared_context::RequestContext::for_tenant(shared_context::TenantId::new("t1"));
        ctx.ip_address = Some("10.0.0.9".to_string());

        shared_context::within(ctx, async {
            sink.record(
                "security.permission_denied",
                Some(Uuid::now_v7()),
                serde_json::json!({"resource": "admin"}),
            );
        })
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, "t1");
        assert_eq!(entries[0].event_type, "security.permission_denied");
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.9"));
    }
}
