//! Tenant provisioning
//!
//! Inserts the app row, seeds the permission catalog and announces the
//! tenant on the bus. A failed seeding compensates by dropping the app row
//! so no half-provisioned tenant survives.

use access_service_core::domains::access::domain::model::App;
use access_service_core::domains::access::domain::repository::AppRepository;
use access_service_core::domains::access::domain::service::{
    PolicyService, ProvisionOutcome, ProvisioningService,
};
use async_trait::async_trait;
use chrono::Utc;
use shared_context::TenantId;
use shared_error::AppError;
use shared_events::{
    AppSettingsUpdatedEvent, EventBus, EventEnvelope, APP_SETTINGS_UPDATED,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct ProvisioningServiceImpl {
    apps: Arc<dyn AppRepository>,
    policy: Arc<dyn PolicyService>,
    bus: EventBus,
    audit: super::audit::AuditSink,
}

impl ProvisioningServiceImpl {
    pub fn new(
        apps: Arc<dyn AppRepository>,
        policy: Arc<dyn PolicyService>,
        bus: EventBus,
        audit: super::audit::AuditSink,
    ) -> Self {
        Self {
            apps,
            policy,
            bus,
            audit,
        }
    }
}

#[async_trait]
impl ProvisioningService for ProvisioningServiceImpl {
    async fn provision(&self, namespace: &str, name: &str) -> Result<ProvisionOutcome, AppError> {
        if self.apps.by_namespace(namespace).await?.is_some() {
            return Err(AppError::conflict("app", "namespace already exists"));
        }

        let now = Utc::now();
        let app = self
            .apps
            .insert(&App {
                app_id: Uuid::now_v7().to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                settings: sqlx::types::Json(serde_json::json!({})),
                status: "active".to_string(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await?;

        let tenant = TenantId::new(app.app_id.clone());
        let permissions_seeded = match self.policy.seed_tenant_defaults(&tenant).await {
            Ok(seeded) => seeded,
            Err(seed_err) => {
                // Compensation: the tenant row must not outlive a failed seeding
                warn!(tenant = %tenant, "Catalog seeding failed, rolling back tenant: {}", seed_err);
                if let Err(drop_err) = AppRepository::drop(&*self.apps, &tenant).await {
                    error!(tenant = %tenant, "Tenant rollback failed: {}", drop_err);
                }
                return Err(seed_err);
            },
        };

        let event = EventEnvelope::new(
            APP_SETTINGS_UPDATED,
            AppSettingsUpdatedEvent {
                tenant_id: tenant.clone(),
                namespace: namespace.to_string(),
            },
        );
        if let Err(e) = self.bus.publish(APP_SETTINGS_UPDATED, event).await {
            warn!(tenant = %tenant, "Provisioning event publish failed: {}", e);
        }

        info!(tenant = %tenant, namespace = namespace, "Tenant provisioned");
        self.audit.record(
            "app.provisioned",
            None,
            serde_json::json!({"app_id": app.app_id, "namespace": namespace}),
        );

        Ok(ProvisionOutcome {
            app,
            permissions_seeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_service_core::domains::access::domain::model::Role;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeAppRepo {
        rows: Arc<Mutex<HashMap<String, App>>>,
    }

    #[async_trait]
    impl AppRepository for FakeAppRepo {
        async fn one(&self, app_id: &TenantId) -> Result<Option<App>, AppError> {
            Ok(self.rows.lock().unwrap().get(app_id.as_str()).cloned())
        }
        async fn by_namespace(&self, namespace: &str) -> Result<Option<App>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|a| a.namespace == namespace)
                .cloned())
        }
        async fn insert(&self, app: &App) -> Result<App, AppError> {
            self.rows.lock().unwrap().insert(app.app_id.clone(), app.clone());
            Ok(app.clone())
        }
        async fn drop(&self, app_id: &TenantId) -> Result<bool, AppError> {
            Ok(self.rows.lock().unwrap().remove(app_id.as_str()).is_some())
        }
        async fn read_settings(&self, _: &TenantId) -> Result<serde_json::Value, AppError> {
            Ok(serde_json::json!({}))
        }
        async fn update_settings(&self, _: &TenantId, _: serde_json::Value) -> Result<(), AppError> {
            Ok(())
        }
    }

    /// Policy stub whose seeding can be forced to fail
    struct StubPolicy {
        fail_seeding: bool,
    }

    #[async_trait]
    impl PolicyService for StubPolicy {
        async fn require(&self, _: &str, _: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn grant(&self, _: Role, _: &str, _: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn revoke(&self, _: Role, _: &str, _: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn seed_tenant_defaults(&self, _: &TenantId) -> Result<u32, AppError> {
            if self.fail_seeding {
                Err(AppError::Internal("seed failed".to_string()))
            } else {
                Ok(42)
            }
        }
    }

    #[derive(Clone, Default)]
    struct NullAuditRepo;

    #[async_trait]
    impl access_service_core::domains::access::domain::repository::AuditLogRepository for NullAuditRepo {
        async fn insert(
            &self,
            _: &access_service_core::domains::access::domain::model::AuditLogRow,
        ) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn service(apps: FakeAppRepo, fail_seeding: bool) -> ProvisioningServiceImpl {
        ProvisioningServiceImpl::new(
            Arc::new(apps),
            Arc::new(StubPolicy { fail_seeding }),
            EventBus::Disabled,
            super::super::audit::AuditSink::new(Arc::new(NullAuditRepo)),
        )
    }

    #[tokio::test]
    async fn test_provision_creates_app() {
        let apps = FakeAppRepo::default();
        let service = service(apps.clone(), false);

        let outcome = service.provision("acme", "Acme Corp").await.unwrap();
        assert_eq!(outcome.app.namespace, "acme");
        assert_eq!(outcome.app.status, "active");
        assert_eq!(outcome.permissions_seeded, 42);
        assert!(apps.rows.lock().unwrap().contains_key(&outcome.app.app_id));
    }

    #[tokio::test]
    async fn test_duplicate_namespace_conflicts() {
        let apps = FakeAppRepo::default();
        let service = service(apps.clone(), false);

        service.provision("acme", "Acme Corp").await.unwrap();
        let err = service.provision("acme", "Other").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_failed_seeding_rolls_back_tenant() {
        let apps = FakeAppRepo::default();
        let service = service(apps.clone(), true);

        let err = service.provision("acme", "Acme Corp").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        // Compensation removed the row
        assert!(apps.rows.lock().unwrap().is_empty());
    }
}
