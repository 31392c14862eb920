use access_service_core::domains::access::domain::repository::UserRepository;
use access_service_core::domains::access::domain::service::{
    AuthFlowService, MfaService, PolicyService, ProvisioningService, SessionService,
};
use axum::extract::State;
use axum::Json;
use shared_config::Config;
use shared_error::AppError;
use shared_rate_limit::{Preset, RateLimitService};
use std::sync::Arc;

/// Shared application state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<dyn AuthFlowService>,
    pub sessions: Arc<dyn SessionService>,
    pub mfa: Arc<dyn MfaService>,
    pub policy: Arc<dyn PolicyService>,
    pub provisioning: Arc<dyn ProvisioningService>,
    pub users: Arc<dyn UserRepository>,
    pub rate_limits: RateLimitService,
    pub config: Arc<Config>,
}

/// Service health; fail-open presets keep this reachable under store outages
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service healthy"),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Health, None, ctx.ip_address.as_deref())
        .await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "access-service",
    })))
}
