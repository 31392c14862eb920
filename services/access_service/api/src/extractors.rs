//! Request context population
//!
//! The edge's one job before any handler runs: pin the tenant, generate or
//! propagate the request id, capture the client address, and resolve the
//! bearer token into a session. Everything downstream reads the ambient
//! context instead of re-parsing headers.

use crate::handlers::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use shared_context::{RequestContext, TenantId};
use tracing::debug;
use uuid::Uuid;

const TENANT_HEADER: &str = "x-app-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
}

/// Outermost middleware: builds the request context and runs the rest of the
/// stack inside its scope
pub async fn request_context(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers();

    let tenant_id = header_str(headers, TENANT_HEADER)
        .map(TenantId::from)
        .unwrap_or_else(TenantId::default_tenant);
    let request_id = header_str(headers, REQUEST_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::now_v7);

    let ctx = RequestContext {
        tenant_id,
        request_id,
        session: None,
        ip_address: client_ip(headers),
        user_agent: header_str(headers, "user-agent").map(String::from),
        rate_limit: None,
        circuit: None,
        cluster: None,
    };
    let token = bearer_token(headers);

    shared_context::within(ctx, async move {
        if let Some(token) = token {
            match state.sessions.lookup(&token).await {
                Ok(Some(session)) => {
                    shared_context::update(|c| c.session = Some(session));
                },
                Ok(None) => debug!("Bearer token did not resolve to a session"),
                Err(e) => debug!("Session lookup failed: {}", e),
            }
        }

        let mut response = next.run(request).await;

        if let Ok(value) = HeaderValue::from_str(&shared_context::request_id().to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_client_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), Some("203.0.113.9".to_string()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
