//! Authentication flow state machine
//!
//! Pure transition rules for the login lifecycle:
//!
//! ```text
//! idle → oauth → { mfa | active } → revoked
//!                   ↺ refresh on mfa and active
//! ```
//!
//! The effectful dispatcher lives in the infra crate; this module owns the
//! phase data, the allowed-event table and the snapshot format carried
//! across HTTP round-trips and pods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_context::TenantId;
use shared_error::AppError;
use uuid::Uuid;

/// Fields shared by every phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCommon {
    pub tenant_id: TenantId,
    pub request_id: Uuid,
    /// Accumulated MFA attempts for this flow; informational only, lockout is
    /// the replay guard's job
    pub mfa_attempts: u32,
}

impl PhaseCommon {
    pub fn new(tenant_id: TenantId, request_id: Uuid) -> Self {
        Self {
            tenant_id,
            request_id,
            mfa_attempts: 0,
        }
    }
}

/// Identity established by a successful OAuth callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseIdentity {
    pub provider: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub tokens: TokenSet,
}

/// Session credentials minted for this flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevokeReason {
    Logout,
    Timeout,
    Security,
}

impl std::fmt::Display for RevokeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevokeReason::Logout => write!(f, "logout"),
            RevokeReason::Timeout => write!(f, "timeout"),
            RevokeReason::Security => write!(f, "security"),
        }
    }
}

/// Snapshottable flow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum AuthPhase {
    Idle {
        common: PhaseCommon,
    },
    /// Authorize URL handed out, waiting for the provider callback. The same
    /// `state` / `verifier` pair also lives in the encrypted cookie.
    Oauth {
        common: PhaseCommon,
        provider: String,
        state: String,
        verifier: Option<String>,
    },
    /// Callback done but the user's MFA posture demands a verify
    Mfa {
        common: PhaseCommon,
        identity: PhaseIdentity,
    },
    Active {
        common: PhaseCommon,
        identity: PhaseIdentity,
    },
    Revoked {
        common: PhaseCommon,
        reason: RevokeReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTag {
    Idle,
    Oauth,
    Mfa,
    Active,
    Revoked,
}

impl std::fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseTag::Idle => write!(f, "idle"),
            PhaseTag::Oauth => write!(f, "oauth"),
            PhaseTag::Mfa => write!(f, "mfa"),
            PhaseTag::Active => write!(f, "active"),
            PhaseTag::Revoked => write!(f, "revoked"),
        }
    }
}

/// Event kinds with their allowed source phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    Initiate,
    Callback,
    Verify,
    Refresh,
    Revoke,
}

impl AuthEventKind {
    pub fn allowed_from(&self) -> &'static [PhaseTag] {
        match self {
            AuthEventKind::Initiate => &[PhaseTag::Idle],
            AuthEventKind::Callback => &[PhaseTag::Oauth],
            AuthEventKind::Verify => &[PhaseTag::Mfa],
            AuthEventKind::Refresh => &[PhaseTag::Mfa, PhaseTag::Active],
            AuthEventKind::Revoke => &[PhaseTag::Mfa, PhaseTag::Active],
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthEventKind::Initiate => write!(f, "initiate"),
            AuthEventKind::Callback => write!(f, "callback"),
            AuthEventKind::Verify => write!(f, "verify"),
            AuthEventKind::Refresh => write!(f, "refresh"),
            AuthEventKind::Revoke => write!(f, "revoke"),
        }
    }
}

impl AuthPhase {
    pub fn idle(tenant_id: TenantId, request_id: Uuid) -> Self {
        AuthPhase::Idle {
            common: PhaseCommon::new(tenant_id, request_id),
        }
    }

    pub fn tag(&self) -> PhaseTag {
        match self {
            AuthPhase::Idle { .. } => PhaseTag::Idle,
            AuthPhase::Oauth { .. } => PhaseTag::Oauth,
            AuthPhase::Mfa { .. } => PhaseTag::Mfa,
            AuthPhase::Active { .. } => PhaseTag::Active,
            AuthPhase::Revoked { .. } => PhaseTag::Revoked,
        }
    }

    pub fn common(&self) -> &PhaseCommon {
        match self {
            AuthPhase::Idle { common }
            | AuthPhase::Oauth { common, .. }
            | AuthPhase::Mfa { common, .. }
            | AuthPhase::Active { common, .. }
            | AuthPhase::Revoked { common, .. } => common,
        }
    }

    pub fn common_mut(&mut self) -> &mut PhaseCommon {
        match self {
            AuthPhase::Idle { common }
            | AuthPhase::Oauth { common, .. }
            | AuthPhase::Mfa { common, .. }
            | AuthPhase::Active { common, .. }
            | AuthPhase::Revoked { common, .. } => common,
        }
    }

    pub fn identity(&self) -> Option<&PhaseIdentity> {
        match self {
            AuthPhase::Mfa { identity, .. } | AuthPhase::Active { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Reject the event unless this phase allows it; the phase itself is
    /// never mutated on rejection
    pub fn ensure_allows(&self, event: AuthEventKind) -> Result<(), AppError> {
        let allowed = event.allowed_from();
        if allowed.contains(&self.tag()) {
            return Ok(());
        }

        let allowed_list = allowed
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("|");
        Err(AppError::conflict(
            "auth_phase",
            format!(
                "phase_invalid: event={} actual={} allowed={}",
                event,
                self.tag(),
                allowed_list
            ),
        ))
    }

    /// Serialize for the snapshot cache
    pub fn to_snapshot(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Snapshot encoding failed: {}", e)))
    }

    /// Restore from a snapshot-cache entry
    pub fn from_snapshot(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Internal(format!("Snapshot decoding failed: {}", e)))
    }
}

/// Snapshot cache scopes
///
/// Exactly one of the two exists for a given flow at any time: the `oauth`
/// entry between initiate and callback, the `session` entry afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    Oauth,
    Session,
}

impl SnapshotScope {
    pub fn key(&self, discriminator: &str) -> String {
        match self {
            SnapshotScope::Oauth => format!("authsnap:oauth:{}", discriminator),
            SnapshotScope::Session => format!("authsnap:session:{}", discriminator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common() -> PhaseCommon {
        PhaseCommon::new(TenantId::new("t1"), Uuid::now_v7())
    }

    fn identity() -> PhaseIdentity {
        PhaseIdentity {
            provider: "google".to_string(),
            user_id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            tokens: TokenSet {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                access_expires_at: Utc::now(),
                refresh_expires_at: Utc::now(),
            },
        }
    }

    fn all_phases() -> Vec<AuthPhase> {
        vec![
            AuthPhase::Idle { common: common() },
            AuthPhase::Oauth {
                common: common(),
                provider: "google".to_string(),
                state: "s".to_string(),
                verifier: Some("v".to_string()),
            },
            AuthPhase::Mfa {
                common: common(),
                identity: identity(),
            },
            AuthPhase::Active {
                common: common(),
                identity: identity(),
            },
            AuthPhase::Revoked {
                common: common(),
                reason: RevokeReason::Logout,
            },
        ]
    }

    const ALL_EVENTS: [AuthEventKind; 5] = [
        AuthEventKind::Initiate,
        AuthEventKind::Callback,
        AuthEventKind::Verify,
        AuthEventKind::Refresh,
        AuthEventKind::Revoke,
    ];

    #[test]
    fn test_allowed_table_is_exhaustive() {
        // For every (phase, event) pair the outcome matches the table
        for phase in all_phases() {
            for event in ALL_EVENTS {
                let expected = event.allowed_from().contains(&phase.tag());
                assert_eq!(
                    phase.ensure_allows(event).is_ok(),
                    expected,
                    "phase={} event={}",
                    phase.tag(),
                    event
                );
            }
        }
    }

    #[test]
    fn test_invalid_transition_error_names_phases() {
        let phase = AuthPhase::Idle { common: common() };
        let err = phase.ensure_allows(AuthEventKind::Verify).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("phase_invalid"));
        assert!(message.contains("actual=idle"));
        assert!(message.contains("allowed=mfa"));
    }

    #[test]
    fn test_refresh_self_loops() {
        for phase in all_phases() {
            let ok = phase.ensure_allows(AuthEventKind::Refresh).is_ok();
            let expected = matches!(phase.tag(), PhaseTag::Mfa | PhaseTag::Active);
            assert_eq!(ok, expected);
        }
    }

    #[test]
    fn test_revoked_is_terminal() {
        let phase = AuthPhase::Revoked {
            common: common(),
            reason: RevokeReason::Security,
        };
        for event in ALL_EVENTS {
            assert!(phase.ensure_allows(event).is_err());
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        for phase in all_phases() {
            let raw = phase.to_snapshot().unwrap();
            let restored = AuthPhase::from_snapshot(&raw).unwrap();
            assert_eq!(restored, phase);
        }
    }

    #[test]
    fn test_snapshot_keys_scoped() {
        assert_eq!(SnapshotScope::Oauth.key("cookie-v"), "authsnap:oauth:cookie-v");
        assert_eq!(SnapshotScope::Session.key("sid"), "authsnap:session:sid");
    }

    #[test]
    fn test_mfa_attempts_accumulate() {
        let mut phase = AuthPhase::Mfa {
            common: common(),
            identity: identity(),
        };
        assert_eq!(phase.common().mfa_attempts, 0);
        phase.common_mut().mfa_attempts += 1;
        phase.common_mut().mfa_attempts += 1;
        assert_eq!(phase.common().mfa_attempts, 2);
    }
}
