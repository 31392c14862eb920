//! Cookie facet for the auth flow
//!
//! Exactly two cookies with three operations each (set, get, clear):
//!
//! - `oauthState`: encrypted flow state between initiate and callback;
//!   10 minutes, path `/api/auth/oauth`
//! - `refreshToken`: opaque refresh credential; 30 days, path `/api/auth`
//!
//! Both are HttpOnly + SameSite=Lax; Secure when the configured base URL is
//! HTTPS.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use shared_config::Config;

pub const OAUTH_STATE_COOKIE: &str = "oauthState";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

const OAUTH_STATE_PATH: &str = "/api/auth/oauth";
const REFRESH_TOKEN_PATH: &str = "/api/auth";

/// Build a Set-Cookie header value
fn build_cookie_header(
    name: &str,
    value: &str,
    path: &str,
    max_age: i64,
    config: &Config,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, path, max_age
    );

    if config.is_https() {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie)
}

pub fn set_oauth_state_cookie(
    headers: &mut HeaderMap,
    value: &str,
    config: &Config,
) -> Result<(), String> {
    let cookie = build_cookie_header(
        OAUTH_STATE_COOKIE,
        value,
        OAUTH_STATE_PATH,
        config.oauth_state_seconds,
        config,
    )
    .map_err(|e| format!("Failed to build oauth_state cookie: {}", e))?;

    headers.append(SET_COOKIE, cookie);
    Ok(())
}

pub fn clear_oauth_state_cookie(headers: &mut HeaderMap, config: &Config) -> Result<(), String> {
    let cookie = build_cookie_header(OAUTH_STATE_COOKIE, "", OAUTH_STATE_PATH, 0, config)
        .map_err(|e| format!("Failed to build clear oauth_state cookie: {}", e))?;

    headers.append(SET_COOKIE, cookie);
    Ok(())
}

pub fn set_refresh_cookie(
    headers: &mut HeaderMap,
    value: &str,
    config: &Config,
) -> Result<(), String> {
    let cookie = build_cookie_header(
        REFRESH_TOKEN_COOKIE,
        value,
        REFRESH_TOKEN_PATH,
        config.refresh_token_seconds,
        config,
    )
    .map_err(|e| format!("Failed to build refresh_token cookie: {}", e))?;

    headers.append(SET_COOKIE, cookie);
    Ok(())
}

pub fn clear_refresh_cookie(headers: &mut HeaderMap, config: &Config) -> Result<(), String> {
    let cookie = build_cookie_header(REFRESH_TOKEN_COOKIE, "", REFRESH_TOKEN_PATH, 0, config)
        .map_err(|e| format!("Failed to build clear refresh_token cookie: {}", e))?;

    headers.append(SET_COOKIE, cookie);
    Ok(())
}

/// Extract a cookie value from the Cookie header
pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                let mut parts = cookie.trim().splitn(2, '=');
                let name = parts.next()?;
                let value = parts.next()?;
                if name == cookie_name {
                    Some(value.to_string())
                } else {
                    None
                }
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(https: bool) -> Config {
        serde_json::from_value(serde_json::json!({
            "database_url": "postgres://localhost/test",
            "encryption_key": "",
            "api_base_url": if https { "https://portal.example.com" } else { "http://localhost:3000" },
        }))
        .unwrap()
    }

    #[test]
    fn test_oauth_state_cookie_attributes() {
        let config = test_config(false);
        let mut headers = HeaderMap::new();

        set_oauth_state_cookie(&mut headers, "sealed-state", &config).unwrap();

        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("oauthState=sealed-state"));
        assert!(cookie.contains("Path=/api/auth/oauth"));
        assert!(cookie.contains("Max-Age=600"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let config = test_config(false);
        let mut headers = HeaderMap::new();

        set_refresh_cookie(&mut headers, "opaque-token", &config).unwrap();

        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("refreshToken=opaque-token"));
        assert!(cookie.contains("Path=/api/auth"));
        assert!(cookie.contains("Max-Age=2592000"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_secure_flag_follows_base_url() {
        let config = test_config(true);
        let mut headers = HeaderMap::new();

        set_refresh_cookie(&mut headers, "t", &config).unwrap();

        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("; Secure"));
    }

    #[test]
    fn test_clear_cookies() {
        let config = test_config(false);
        let mut headers = HeaderMap::new();

        clear_oauth_state_cookie(&mut headers, &config).unwrap();
        clear_refresh_cookie(&mut headers, &config).unwrap();

        for cookie in headers.get_all(SET_COOKIE).iter() {
            let cookie = cookie.to_str().unwrap();
            assert!(cookie.contains("Max-Age=0"));
        }
    }

    #[test]
    fn test_get_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("oauthState=abc123; refreshToken=xyz789"),
        );

        assert_eq!(get_cookie_value(&headers, "oauthState"), Some("abc123".to_string()));
        assert_eq!(get_cookie_value(&headers, "refreshToken"), Some("xyz789".to_string()));
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }
}
