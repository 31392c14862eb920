use crate::cookie_helper;
use crate::handlers::AppState;
use access_service_core::domains::access::domain::machine::RevokeReason;
use access_service_core::domains::access::dto::auth_dto::{
    AuthResp, CallbackReq, ErrorResp, InitiateReq, InitiateResp, RefreshReq, RevokeReq, RevokeResp,
};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared_error::AppError;
use shared_rate_limit::Preset;
use tracing::debug;
use validator::Validate;

/// Start an OAuth flow
///
/// Returns the provider authorization URL; the encrypted flow state travels
/// back to the client in the `oauth_state` cookie.
#[utoipa::path(
    post,
    path = "/api/auth/oauth/initiate",
    tag = "auth",
    request_body = InitiateReq,
    responses(
        (status = 200, description = "Authorization URL generated", body = InitiateResp),
        (status = 401, description = "Unknown or unconfigured provider", body = ErrorResp),
        (status = 429, description = "Rate limited", body = ErrorResp),
    )
)]
pub async fn oauth_initiate(
    State(state): State<AppState>,
    Json(payload): Json<InitiateReq>,
) -> Result<Response, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation("provider", e.to_string()))?;

    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Auth, None, ctx.ip_address.as_deref())
        .await?;

    let outcome = state.flow.initiate(&payload.provider).await?;

    let mut headers = HeaderMap::new();
    cookie_helper::set_oauth_state_cookie(&mut headers, &outcome.state_cookie, &state.config)
        .map_err(AppError::Internal)?;

    debug!(provider = %payload.provider, "OAuth flow initiated");
    Ok((
        headers,
        Json(InitiateResp {
            authorization_url: outcome.authorization_url,
        }),
    )
        .into_response())
}

/// Provider redirect target
///
/// Exchanges the code, resolves or creates the user and mints the session
/// pair. The refresh token is also set as an HttpOnly cookie.
#[utoipa::path(
    get,
    path = "/api/auth/oauth/callback",
    tag = "auth",
    params(
        ("code" = String, Query, description = "Authorization code"),
        ("state" = String, Query, description = "CSRF state"),
    ),
    responses(
        (status = 200, description = "Authentication successful", body = AuthResp),
        (status = 401, description = "State mismatch or exchange failure", body = ErrorResp),
    )
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(payload): Query<CallbackReq>,
) -> Result<Response, AppError> {
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Auth, None, ctx.ip_address.as_deref())
        .await?;

    let cookie = cookie_helper::get_cookie_value(&headers, cookie_helper::OAUTH_STATE_COOKIE)
        .ok_or_else(|| AppError::Auth("Missing OAuth state cookie".to_string()))?;

    let resp = state.flow.callback(&payload.code, &payload.state, &cookie).await?;

    let mut response_headers = HeaderMap::new();
    cookie_helper::clear_oauth_state_cookie(&mut response_headers, &state.config)
        .map_err(AppError::Internal)?;
    cookie_helper::set_refresh_cookie(&mut response_headers, &resp.refresh_token, &state.config)
        .map_err(AppError::Internal)?;

    Ok((response_headers, Json(resp)).into_response())
}

/// Rotate the session pair
///
/// The refresh token comes from the body or, failing that, the cookie. The
/// old pair is soft-deleted in the same transaction that mints the new one.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "auth",
    request_body = RefreshReq,
    responses(
        (status = 200, description = "Pair rotated", body = AuthResp),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorResp),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshReq>>,
) -> Result<Response, AppError> {
    let ctx = shared_context::current();
    let user = ctx.session.as_ref().map(|s| s.user_id);
    state
        .rate_limits
        .consume(Preset::Auth, user, ctx.ip_address.as_deref())
        .await?;

    let token = payload
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| cookie_helper::get_cookie_value(&headers, cookie_helper::REFRESH_TOKEN_COOKIE))
        .ok_or_else(|| AppError::Auth("Missing refresh token".to_string()))?;

    let resp = state.flow.refresh(&token).await?;

    let mut response_headers = HeaderMap::new();
    cookie_helper::set_refresh_cookie(&mut response_headers, &resp.refresh_token, &state.config)
        .map_err(AppError::Internal)?;

    Ok((response_headers, Json(resp)).into_response())
}

/// Revoke all sessions of the current user and clear the refresh cookie
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = RevokeResp),
        (status = 401, description = "No active session", body = ErrorResp),
    )
)]
pub async fn logout(State(state): State<AppState>) -> Result<Response, AppError> {
    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Auth, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;

    state.flow.revoke(session.id, RevokeReason::Logout).await?;

    let mut headers = HeaderMap::new();
    cookie_helper::clear_refresh_cookie(&mut headers, &state.config).map_err(AppError::Internal)?;

    Ok((headers, Json(RevokeResp { sessions_revoked: 1 })).into_response())
}

/// Administrative revocation with an explicit reason
#[utoipa::path(
    post,
    path = "/api/auth/revoke",
    tag = "auth",
    request_body = RevokeReq,
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeResp),
        (status = 403, description = "Policy denied", body = ErrorResp),
    )
)]
pub async fn revoke(
    State(state): State<AppState>,
    Json(payload): Json<RevokeReq>,
) -> Result<Json<RevokeResp>, AppError> {
    let session = shared_context::session()?;
    let ctx = shared_context::current();
    state
        .rate_limits
        .consume(Preset::Auth, Some(session.user_id), ctx.ip_address.as_deref())
        .await?;

    state.policy.require("sessions", "revoke").await?;

    let reason = match payload.reason.as_deref() {
        Some("timeout") => RevokeReason::Timeout,
        Some("security") => RevokeReason::Security,
        _ => RevokeReason::Logout,
    };
    state.flow.revoke(session.id, reason).await?;

    Ok(Json(RevokeResp { sessions_revoked: 1 }))
}
