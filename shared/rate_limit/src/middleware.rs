//! Response-header emission
//!
//! After the handler completes, the context's rate-limit observation (written
//! by `RateLimitService::consume`) is turned into the standard headers. Must
//! run inside the request's context scope.

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use shared_context::RateLimitInfo;

pub async fn rate_limit_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    if let Some(info) = shared_context::current().rate_limit {
        apply_headers(response.headers_mut(), &info);
    }

    response
}

fn apply_headers(headers: &mut axum::http::HeaderMap, info: &RateLimitInfo) {
    if let Ok(v) = HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&info.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&info.reset_after.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_headers() {
        let mut headers = axum::http::HeaderMap::new();
        apply_headers(
            &mut headers,
            &RateLimitInfo {
                limit: 100,
                remaining: 42,
                reset_after: 37,
                delay: 0,
            },
        );

        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "100");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "42");
        assert_eq!(headers.get("x-ratelimit-reset").unwrap(), "37");
    }
}
