use crate::handlers::AppState;
use access_service_core::domains::access::dto::auth_dto::ErrorResp;
use access_service_core::domains::access::dto::policy_dto::{
    GrantReq, GrantResp, ProvisionReq, ProvisionResp,
};
use axum::extract::State;
use axum::Json;
use shared_error::AppError;
use shared_rate_limit::Preset;
use validator::Validate;

/// Grant a `(resource, action)` to a role in the current tenant
#[utoipa::path(
    post,
    path = "/api/policy/grant",
    tag = "policy",
    request_body = GrantReq,
    responses(
        (status = 200, description = "Permission granted", body = GrantResp),
        (status = 403, description = "Policy denied", body = ErrorResp),
    )
)]
pub async fn grant(
    State(state): State<AppState>,
    Json(payload): Json<GrantReq>,
) -> Result<Json<GrantResp>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation("permission", e.to_string()))?;

    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mutation, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;
    state.policy.require("policy", "grant").await?;

    state
        .policy
        .grant(payload.role, &payload.resource, &payload.action)
        .await?;

    Ok(Json(GrantResp {
        role: payload.role,
        resource: payload.resource,
        action: payload.action,
        granted: true,
    }))
}

/// Revoke a `(resource, action)` from a role in the current tenant
#[utoipa::path(
    post,
    path = "/api/policy/revoke",
    tag = "policy",
    request_body = GrantReq,
    responses(
        (status = 200, description = "Permission revoked", body = GrantResp),
        (status = 404, description = "No matching permission", body = ErrorResp),
    )
)]
pub async fn revoke(
    State(state): State<AppState>,
    Json(payload): Json<GrantReq>,
) -> Result<Json<GrantResp>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation("permission", e.to_string()))?;

    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mutation, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;
    state.policy.require("policy", "revoke").await?;

    state
        .policy
        .revoke(payload.role, &payload.resource, &payload.action)
        .await?;

    Ok(Json(GrantResp {
        role: payload.role,
        resource: payload.resource,
        action: payload.action,
        granted: false,
    }))
}

/// Provision a tenant: app row + default permission catalog
#[utoipa::path(
    post,
    path = "/api/apps",
    tag = "apps",
    request_body = ProvisionReq,
    responses(
        (status = 200, description = "Tenant provisioned", body = ProvisionResp),
        (status = 409, description = "Namespace taken", body = ErrorResp),
    )
)]
pub async fn provision(
    State(state): State<AppState>,
    Json(payload): Json<ProvisionReq>,
) -> Result<Json<ProvisionResp>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation("app", e.to_string()))?;

    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mutation, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;
    state.policy.require("apps", "update_settings").await?;

    let outcome = state
        .provisioning
        .provision(&payload.namespace, &payload.name)
        .await?;

    Ok(Json(ProvisionResp {
        app_id: outcome.app.app_id,
        namespace: outcome.app.namespace,
        permissions_seeded: outcome.permissions_seeded,
    }))
}
