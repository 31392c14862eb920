use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Reason a circuit-breaker call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitReason {
    BrokenCircuit,
    Isolated,
    ExecutionFailed,
    Cancelled,
}

impl fmt::Display for CircuitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitReason::BrokenCircuit => write!(f, "broken_circuit"),
            CircuitReason::Isolated => write!(f, "isolated"),
            CircuitReason::ExecutionFailed => write!(f, "execution_failed"),
            CircuitReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    // Database errors
    Database(sqlx::Error),

    // Authentication errors (missing/invalid credentials, expired tokens, user gone)
    Auth(String),

    // Authenticated but denied by policy
    Forbidden(String),

    // Bad input shape
    Validation {
        field: String,
        details: String,
    },

    // Uniqueness / state-machine conflicts
    Conflict {
        resource: String,
        details: String,
    },

    NotFound {
        resource: String,
        id: Option<String>,
    },

    // Too many requests; carries everything the edge needs for headers
    RateLimit {
        retry_after_ms: u64,
        limit: Option<u32>,
        remaining: Option<u32>,
        recovery_action: Option<String>,
    },

    // OAuth-specific failures (state_mismatch, exchange_failed, user_fetch, ...)
    OAuth {
        provider: String,
        reason: String,
    },

    // Circuit breaker rejected or wrapped the call
    Circuit {
        circuit: String,
        reason: CircuitReason,
    },

    // Crypto failure, cache backend error, unexpected repository error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Auth(reason) => write!(f, "Authentication failed: {}", reason),
            AppError::Forbidden(detail) => write!(f, "Forbidden: {}", detail),
            AppError::Validation { field, details } => {
                write!(f, "Validation error on '{}': {}", field, details)
            },
            AppError::Conflict { resource, details } => {
                write!(f, "Conflict on {}: {}", resource, details)
            },
            AppError::NotFound { resource, id } => match id {
                Some(id) => write!(f, "{} not found: {}", resource, id),
                None => write!(f, "{} not found", resource),
            },
            AppError::RateLimit { retry_after_ms, .. } => {
                write!(f, "Rate limit exceeded, retry after {}ms", retry_after_ms)
            },
            AppError::OAuth { provider, reason } => {
                write!(f, "OAuth error ({}): {}", provider, reason)
            },
            AppError::Circuit { circuit, reason } => {
                write!(f, "Circuit '{}' rejected call: {}", circuit, reason)
            },
            AppError::Internal(details) => write!(f, "Internal error: {}", details),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Shorthand for a not-found error without a concrete id
    pub fn not_found(resource: &str) -> Self {
        AppError::NotFound {
            resource: resource.to_string(),
            id: None,
        }
    }

    pub fn validation(field: &str, details: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            details: details.into(),
        }
    }

    pub fn conflict(resource: &str, details: impl Into<String>) -> Self {
        AppError::Conflict {
            resource: resource.to_string(),
            details: details.into(),
        }
    }

    pub fn oauth(provider: &str, reason: &str) -> Self {
        AppError::OAuth {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    "DATABASE_ERROR",
                )
            },
            AppError::Auth(reason) => (StatusCode::UNAUTHORIZED, reason.clone(), "UNAUTHORIZED"),
            AppError::Forbidden(detail) => (StatusCode::FORBIDDEN, detail.clone(), "FORBIDDEN"),
            AppError::Validation { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string(), "VALIDATION_ERROR")
            },
            AppError::Conflict { .. } => (StatusCode::CONFLICT, self.to_string(), "CONFLICT"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), "NOT_FOUND"),
            AppError::RateLimit { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, self.to_string(), "RATE_LIMITED")
            },
            AppError::OAuth { reason, .. } => {
                if reason == "user_no_email" {
                    (StatusCode::BAD_REQUEST, self.to_string(), "OAUTH_NO_EMAIL")
                } else {
                    (StatusCode::UNAUTHORIZED, self.to_string(), "OAUTH_FAILED")
                }
            },
            AppError::Circuit { circuit, reason } => {
                tracing::warn!(circuit = %circuit, reason = %reason, "Circuit rejected call");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), "CIRCUIT_OPEN")
            },
            AppError::Internal(details) => {
                tracing::error!("Internal error: {}", details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                    "INTERNAL_ERROR",
                )
            },
        };

        let body = Json(json!({
            "error": error_message,
            "code": error_code,
        }));

        let mut response = (status, body).into_response();

        // Rate-limit responses carry Retry-After alongside the X-RateLimit-*
        // headers emitted by the middleware
        if let AppError::RateLimit {
            retry_after_ms,
            recovery_action,
            ..
        } = &self
        {
            let secs = retry_after_ms.div_ceil(1000);
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
            if let Some(action) = recovery_action {
                if let Ok(v) = HeaderValue::from_str(action) {
                    response.headers_mut().insert("x-recovery-action", v);
                }
            }
        }

        response
    }
}

// From implementations for common error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<std::env::VarError> for AppError {
    fn from(err: std::env::VarError) -> Self {
        AppError::Internal(err.to_string())
    }
}
