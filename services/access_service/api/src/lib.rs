pub mod auth_handlers;
pub mod cookie_helper;
pub mod extractors;
pub mod handlers;
pub mod mfa_handlers;
pub mod openapi;
pub mod policy_handlers;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use handlers::AppState;
use tower_http::trace::TraceLayer;

/// Assemble the HTTP surface
///
/// The context middleware is outermost so every inner layer (rate-limit
/// headers included) runs inside the request's tenant scope.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/auth/oauth/initiate", post(auth_handlers::oauth_initiate))
        .route("/api/auth/oauth/callback", get(auth_handlers::oauth_callback))
        .route("/api/auth/refresh", post(auth_handlers::refresh))
        .route("/api/auth/logout", post(auth_handlers::logout))
        .route("/api/auth/revoke", post(auth_handlers::revoke))
        .route("/api/mfa/enroll", post(mfa_handlers::enroll))
        .route("/api/mfa/verify", post(mfa_handlers::verify))
        .route("/api/mfa/disable", post(mfa_handlers::disable))
        .route("/api/mfa/status", get(mfa_handlers::status))
        .route("/api/policy/grant", post(policy_handlers::grant))
        .route("/api/policy/revoke", post(policy_handlers::revoke))
        .route("/api/apps", post(policy_handlers::provision))
        .layer(middleware::from_fn(shared_rate_limit::rate_limit_headers))
        .layer(middleware::from_fn_with_state(state.clone(), extractors::request_context))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
