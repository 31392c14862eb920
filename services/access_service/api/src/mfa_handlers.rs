use crate::handlers::AppState;
use access_service_core::domains::access::dto::auth_dto::ErrorResp;
use access_service_core::domains::access::dto::mfa_dto::{
    MfaEnrollResp, MfaStatusResp, MfaVerifyReq, MfaVerifyResp,
};
use axum::extract::State;
use axum::Json;
use shared_error::AppError;
use shared_rate_limit::Preset;
use validator::Validate;

/// Generate a TOTP secret and backup codes for the current user
///
/// The material is returned exactly once; only ciphertext and hashes are
/// stored.
#[utoipa::path(
    post,
    path = "/api/mfa/enroll",
    tag = "mfa",
    responses(
        (status = 200, description = "Enrollment material", body = MfaEnrollResp),
        (status = 409, description = "MFA already enabled", body = ErrorResp),
    )
)]
pub async fn enroll(State(state): State<AppState>) -> Result<Json<MfaEnrollResp>, AppError> {
    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mfa, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;
    state.policy.require("mfa", "manage").await?;

    // Provisioning URIs label the account with the user's email
    let account_name = state
        .users
        .one(&ctx.tenant_id, session.user_id)
        .await?
        .map(|user| user.email)
        .unwrap_or_else(|| session.user_id.to_string());

    let resp = state.mfa.enroll(session.user_id, &account_name).await?;
    Ok(Json(resp))
}

/// Verify a TOTP or backup code for the pending session
#[utoipa::path(
    post,
    path = "/api/mfa/verify",
    tag = "mfa",
    request_body = MfaVerifyReq,
    responses(
        (status = 200, description = "Code accepted, session verified", body = MfaVerifyResp),
        (status = 401, description = "Invalid or replayed code", body = ErrorResp),
        (status = 429, description = "Locked out", body = ErrorResp),
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<MfaVerifyReq>,
) -> Result<Json<MfaVerifyResp>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation("code", e.to_string()))?;

    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mfa, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;

    let resp = state
        .flow
        .verify_mfa(session.id, &payload.code, payload.is_backup)
        .await?;
    Ok(Json(resp))
}

/// Disable MFA for the current user
#[utoipa::path(
    post,
    path = "/api/mfa/disable",
    tag = "mfa",
    responses(
        (status = 200, description = "MFA disabled"),
        (status = 404, description = "Not enrolled", body = ErrorResp),
    )
)]
pub async fn disable(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Mfa, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;
    state.policy.require("mfa", "manage").await?;

    state.mfa.disable(session.user_id).await?;
    Ok(Json(serde_json::json!({"disabled": true})))
}

/// Enrollment and activation posture for the current user
#[utoipa::path(
    get,
    path = "/api/mfa/status",
    tag = "mfa",
    responses(
        (status = 200, description = "MFA posture", body = MfaStatusResp),
    )
)]
pub async fn status(State(state): State<AppState>) -> Result<Json<MfaStatusResp>, AppError> {
    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Api, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;

    let resp = state.mfa.status(session.user_id).await?;
    Ok(Json(resp))
}
