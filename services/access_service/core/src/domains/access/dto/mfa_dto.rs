use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Enrollment material, returned exactly once
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaEnrollResp {
    /// Base32 shared secret for manual entry
    pub secret: String,
    /// Plaintext backup codes; only their hashes are stored
    pub backup_codes: Vec<String>,
    /// otpauth:// URI for QR rendering
    pub otpauth_url: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MfaVerifyReq {
    /// 6-digit TOTP code, or 8-character backup code when `is_backup`
    #[validate(length(min = 6, max = 8))]
    pub code: String,
    #[serde(default)]
    pub is_backup: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaVerifyResp {
    pub verified: bool,
    pub remaining_backup_codes: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaStatusResp {
    pub enrolled: bool,
    /// `enrolled && enabled_at set`; first successful verify activates
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_backup_codes: Option<usize>,
}
