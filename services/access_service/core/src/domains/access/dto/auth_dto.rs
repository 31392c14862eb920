use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request to start an OAuth flow
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct InitiateReq {
    /// Provider key: apple | google | microsoft | github
    #[validate(length(min = 1, max = 32))]
    pub provider: String,
}

/// Body returned from initiate; the encrypted state travels in a cookie
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiateResp {
    pub authorization_url: String,
}

/// Service-level initiate outcome: the response body plus the cookie value
/// the edge must set
#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub authorization_url: String,
    pub state_cookie: String,
}

/// Provider redirect parameters
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CallbackReq {
    #[validate(length(min = 1))]
    pub code: String,
    #[validate(length(min = 1))]
    pub state: String,
}

/// Tokens handed to the client; plaintext exists only in this response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthResp {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: Uuid,
    /// True when the flow parked in the `mfa` phase; MFA-gated routes stay
    /// closed until verify succeeds
    pub mfa_pending: bool,
}

/// Explicit refresh request; the token may also arrive via cookie
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshReq {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RevokeReq {
    /// logout | timeout | security
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RevokeResp {
    pub sessions_revoked: u64,
}

/// Payload sealed into the `oauthState` cookie (AES-GCM under the tenant
/// key, base64url)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCookiePayload {
    /// Expiry, milliseconds since the epoch
    pub exp: i64,
    pub provider: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
}

/// Error body shape for API documentation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResp {
    pub error: String,
    pub code: String,
}
