//! Auth flow dispatcher
//!
//! Effectful face of the phase machine in `access_service_core`. Each event
//! restores the snapshot for its flow, checks the transition against the
//! pure allowed-event table, performs the I/O, and persists the successor
//! snapshot:
//!
//! - between initiate and callback the flow is keyed by the encrypted state
//!   cookie (`oauth` scope)
//! - from callback onwards it is keyed by the session id (`session` scope)
//!
//! Rejected transitions never mutate the stored snapshot.

use access_service_core::domains::access::domain::machine::{
    AuthEventKind, AuthPhase, PhaseCommon, PhaseIdentity, RevokeReason, SnapshotScope,
};
use access_service_core::domains::access::domain::model::{OAuthAccountRow, Role, User, UserStatus};
use access_service_core::domains::access::domain::repository::{
    OAuthAccountRepository, UserRepository,
};
use access_service_core::domains::access::domain::service::{
    AuthFlowService, MfaService, SessionService,
};
use access_service_core::domains::access::dto::auth_dto::{
    AuthResp, InitiateOutcome, StateCookiePayload,
};
use access_service_core::domains::access::dto::mfa_dto::MfaVerifyResp;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use shared_cache::SharedStore;
use shared_crypto::TenantCipher;
use shared_error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit::AuditSink;
use super::oauth_client::{capability, OAuthClient};

const BASE64URL: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub struct AuthFlowServiceImpl {
    oauth: Arc<OAuthClient>,
    sessions: Arc<dyn SessionService>,
    mfa: Arc<dyn MfaService>,
    users: Arc<dyn UserRepository>,
    accounts: Arc<dyn OAuthAccountRepository>,
    cipher: TenantCipher,
    store: SharedStore,
    audit: AuditSink,
    /// oauthState cookie validity
    state_ttl_ms: i64,
    /// Snapshot TTL; equals the refresh-token duration
    snapshot_ttl: Duration,
}

impl AuthFlowServiceImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oauth: Arc<OAuthClient>,
        sessions: Arc<dyn SessionService>,
        mfa: Arc<dyn MfaService>,
        users: Arc<dyn UserRepository>,
        accounts: Arc<dyn OAuthAccountRepository>,
        cipher: TenantCipher,
        store: SharedStore,
        audit: AuditSink,
        state_ttl_seconds: i64,
        snapshot_ttl_seconds: u64,
    ) -> Self {
        Self {
            oauth,
            sessions,
            mfa,
            users,
            accounts,
            cipher,
            store,
            audit,
            state_ttl_ms: state_ttl_seconds * 1000,
            snapshot_ttl: Duration::from_secs(snapshot_ttl_seconds),
        }
    }

    async fn save_snapshot(
        &self,
        scope: SnapshotScope,
        discriminator: &str,
        phase: &AuthPhase,
    ) -> Result<(), AppError> {
        self.store
            .kv_set(&scope.key(discriminator), &phase.to_snapshot()?, Some(self.snapshot_ttl))
            .await?;
        Ok(())
    }

    async fn load_snapshot(
        &self,
        scope: SnapshotScope,
        discriminator: &str,
    ) -> Result<Option<AuthPhase>, AppError> {
        match self.store.kv_get(&scope.key(discriminator)).await? {
            Some(raw) => Ok(Some(AuthPhase::from_snapshot(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete_snapshot(
        &self,
        scope: SnapshotScope,
        discriminator: &str,
    ) -> Result<(), AppError> {
        self.store.kv_del(&scope.key(discriminator)).await?;
        Ok(())
    }

    /// Seal `{exp, provider, state, verifier?}` into the cookie value
    fn seal_state_cookie(&self, payload: &StateCookiePayload) -> Result<String, AppError> {
        let json = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(format!("State encoding failed: {}", e)))?;
        let frame = self.cipher.encrypt(&json)?;
        Ok(BASE64URL.encode(frame))
    }

    fn open_state_cookie(&self, cookie_value: &str) -> Result<StateCookiePayload, AppError> {
        let frame = BASE64URL
            .decode(cookie_value)
            .map_err(|_| AppError::oauth("unknown", "encoding"))?;
        let json = self
            .cipher
            .decrypt(&frame)
            .map_err(|_| AppError::oauth("unknown", "encoding"))?;
        serde_json::from_str(&json).map_err(|_| AppError::oauth("unknown", "encoding"))
    }

    /// Resolve the callback identity to a local user, creating one on first
    /// login when the provider supplied an email
    async fn resolve_user(
        &self,
        provider: &str,
        external_id: &str,
        email: Option<&str>,
    ) -> Result<(User, bool), AppError> {
        let tenant = shared_context::tenant_id();

        if let Some(account) = self.accounts.by_external(provider, external_id).await? {
            if account.tenant_id != tenant.as_str() {
                warn!(
                    provider = provider,
                    account_tenant = %account.tenant_id,
                    request_tenant = %tenant,
                    "OAuth identity belongs to another tenant"
                );
                return Err(AppError::oauth(provider, "user_fetch"));
            }

            let user = self
                .users
                .one(&tenant, account.user_id)
                .await?
                .filter(|user| user.is_live())
                .ok_or_else(|| AppError::Auth("User no longer active".to_string()))?;
            return Ok((user, false));
        }

        let Some(email) = email else {
            return Err(AppError::oauth(provider, "user_no_email"));
        };

        let now = Utc::now();
        let user = self
            .users
            .insert(&User {
                user_id: Uuid::now_v7(),
                tenant_id: tenant.to_string(),
                email: email.to_string(),
                role: Role::Member,
                status: UserStatus::Active,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await?;

        info!(user_id = %user.user_id, provider = provider, "User created on first login");
        Ok((user, true))
    }

    fn auth_resp(identity: &PhaseIdentity, mfa_pending: bool) -> AuthResp {
        let expires_in = (identity.tokens.access_expires_at - Utc::now()).num_seconds().max(0);
        AuthResp {
            access_token: identity.tokens.access_token.clone(),
            refresh_token: identity.tokens.refresh_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in,
            session_id: identity.session_id,
            mfa_pending,
        }
    }
}

#[async_trait]
impl AuthFlowService for AuthFlowServiceImpl {
    async fn initiate(&self, provider: &str) -> Result<InitiateOutcome, AppError> {
        let ctx = shared_context::current();
        let phase = AuthPhase::idle(ctx.tenant_id.clone(), ctx.request_id);
        phase.ensure_allows(AuthEventKind::Initiate)?;

        let caps = capability(provider)
            .ok_or_else(|| AppError::oauth(provider, "unknown_provider"))?;

        let state = OAuthClient::generate_state();
        let verifier = caps.pkce.then(OAuthClient::generate_verifier);
        let authorization_url = self.oauth.auth_url(provider, &state, verifier.as_deref())?;

        let payload = StateCookiePayload {
            exp: Utc::now().timestamp_millis() + self.state_ttl_ms,
            provider: provider.to_string(),
            state: state.clone(),
            verifier: verifier.clone(),
        };
        let state_cookie = self.seal_state_cookie(&payload)?;

        let next = AuthPhase::Oauth {
            common: PhaseCommon::new(ctx.tenant_id, ctx.request_id),
            provider: provider.to_string(),
            state,
            verifier,
        };
        self.save_snapshot(SnapshotScope::Oauth, &state_cookie, &next).await?;

        debug!(provider = provider, "OAuth flow initiated");
        Ok(InitiateOutcome {
            authorization_url,
            state_cookie,
        })
    }

    async fn callback(
        &self,
        code: &str,
        state: &str,
        cookie_value: &str,
    ) -> Result<AuthResp, AppError> {
        let payload = self.open_state_cookie(cookie_value)?;
        let provider = payload.provider.clone();

        if Utc::now().timestamp_millis() > payload.exp {
            return Err(AppError::oauth(&provider, "state_expired"));
        }
        if payload.state != state {
            warn!(provider = %provider, "OAuth state mismatch");
            return Err(AppError::oauth(&provider, "state_mismatch"));
        }

        let phase = self
            .load_snapshot(SnapshotScope::Oauth, cookie_value)
            .await?
            .ok_or_else(|| AppError::oauth(&provider, "snapshot_missing"))?;
        phase.ensure_allows(AuthEventKind::Callback)?;

        let AuthPhase::Oauth { common, provider: snap_provider, state: snap_state, .. } = &phase
        else {
            // ensure_allows already rejected every other variant
            return Err(AppError::oauth(&provider, "snapshot_missing"));
        };
        if *snap_provider != provider || *snap_state != payload.state {
            return Err(AppError::oauth(&provider, "state_mismatch"));
        }

        // The cookie-keyed entry is single-use
        self.delete_snapshot(SnapshotScope::Oauth, cookie_value).await?;

        let tokens = self.oauth.exchange(&provider, code, payload.verifier.as_deref()).await?;
        let oauth_user = self.oauth.fetch_user(&provider, &tokens).await?;

        let (user, is_new_user) = self
            .resolve_user(&provider, &oauth_user.external_id, oauth_user.email.as_deref())
            .await?;

        // Provider tokens are stored encrypted under the tenant key
        let access_encrypted = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_encrypted = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;
        let now = Utc::now();
        self.accounts
            .upsert(&OAuthAccountRow {
                account_id: Uuid::now_v7(),
                tenant_id: user.tenant_id.clone(),
                user_id: user.user_id,
                provider: provider.clone(),
                external_id: oauth_user.external_id.clone(),
                access_encrypted,
                refresh_encrypted,
                expires_at: tokens.expires_in.map(|s| now + chrono::Duration::seconds(s)),
                scope: tokens.scope.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await?;

        let mfa_pending = self.mfa.is_enabled(user.user_id).await?;
        let ctx = shared_context::current();
        let issued = self
            .sessions
            .login(
                user.user_id,
                mfa_pending,
                &provider,
                is_new_user,
                ctx.ip_address,
                ctx.user_agent,
            )
            .await?;

        let identity = PhaseIdentity {
            provider: provider.clone(),
            user_id: user.user_id,
            session_id: issued.session_id,
            tokens: issued.tokens,
        };
        let next = if mfa_pending {
            AuthPhase::Mfa {
                common: common.clone(),
                identity: identity.clone(),
            }
        } else {
            AuthPhase::Active {
                common: common.clone(),
                identity: identity.clone(),
            }
        };
        self.save_snapshot(SnapshotScope::Session, &issued.session_id.to_string(), &next)
            .await?;

        info!(
            provider = %provider,
            user_id = %user.user_id,
            mfa_pending,
            "OAuth callback completed"
        );
        self.audit.record(
            "auth.callback",
            Some(user.user_id),
            serde_json::json!({"provider": provider, "is_new_user": is_new_user}),
        );

        Ok(Self::auth_resp(&identity, mfa_pending))
    }

    async fn verify_mfa(
        &self,
        session_id: Uuid,
        code: &str,
        is_backup: bool,
    ) -> Result<MfaVerifyResp, AppError> {
        let key = session_id.to_string();
        let mut phase = self
            .load_snapshot(SnapshotScope::Session, &key)
            .await?
            .ok_or_else(|| AppError::Auth("Authentication flow not found".to_string()))?;
        phase.ensure_allows(AuthEventKind::Verify)?;

        let identity = phase
            .identity()
            .cloned()
            .ok_or_else(|| AppError::Auth("Authentication flow not found".to_string()))?;

        // Attempts accumulate across the mfa phase, successful or not
        phase.common_mut().mfa_attempts += 1;

        let result = if is_backup {
            self.mfa.verify_backup(identity.user_id, code).await
        } else {
            self.mfa.verify_totp(identity.user_id, code).await
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                // Failed attempt: the phase stays `mfa` with the bumped counter
                self.save_snapshot(SnapshotScope::Session, &key, &phase).await?;
                return Err(err);
            },
        };

        let token_hash = self.cipher.hmac(&identity.tokens.access_token);
        self.sessions.mark_verified(session_id, &token_hash).await?;

        let next = AuthPhase::Active {
            common: phase.common().clone(),
            identity,
        };
        self.save_snapshot(SnapshotScope::Session, &key, &next).await?;

        info!(session_id = %session_id, "MFA verified, session active");
        Ok(resp)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResp, AppError> {
        // The database rotation is the serialization point; the snapshot
        // follows it
        let issued = self.sessions.refresh(refresh_token).await?;

        let mut common = PhaseCommon::new(shared_context::tenant_id(), shared_context::request_id());
        let mut provider = "unknown".to_string();

        if let Some(old_session_id) = issued.rotated_from {
            let old_key = old_session_id.to_string();
            if let Some(old_phase) = self.load_snapshot(SnapshotScope::Session, &old_key).await? {
                old_phase.ensure_allows(AuthEventKind::Refresh)?;
                common = old_phase.common().clone();
                if let Some(identity) = old_phase.identity() {
                    provider = identity.provider.clone();
                }
                self.delete_snapshot(SnapshotScope::Session, &old_key).await?;
            }
        }

        let identity = PhaseIdentity {
            provider,
            user_id: issued.user_id,
            session_id: issued.session_id,
            tokens: issued.tokens,
        };

        let next = if issued.mfa_pending {
            AuthPhase::Mfa {
                common,
                identity: identity.clone(),
            }
        } else {
            AuthPhase::Active {
                common,
                identity: identity.clone(),
            }
        };
        self.save_snapshot(SnapshotScope::Session, &issued.session_id.to_string(), &next)
            .await?;

        Ok(Self::auth_resp(&identity, issued.mfa_pending))
    }

    async fn revoke(&self, session_id: Uuid, reason: RevokeReason) -> Result<(), AppError> {
        let key = session_id.to_string();
        let snapshot = self.load_snapshot(SnapshotScope::Session, &key).await?;

        // Missing snapshot is idempotent success; the soft delete by user
        // runs regardless
        if let Some(phase) = &snapshot {
            phase.ensure_allows(AuthEventKind::Revoke)?;
        }

        let user_id = match (&snapshot, shared_context::current().session) {
            (Some(phase), _) if phase.identity().is_some() => {
                phase.identity().map(|i| i.user_id).unwrap()
            },
            (_, Some(session)) => session.user_id,
            _ => return Err(AppError::Auth("No active session".to_string())),
        };

        self.sessions.revoke_all(user_id, reason).await?;

        // Stop the current token from resolving out of cache
        if let Some(phase) = &snapshot {
            if let Some(identity) = phase.identity() {
                let hash = self.cipher.hmac(&identity.tokens.access_token);
                self.sessions.invalidate_lookup(&hash).await?;
            }
        }

        let common = snapshot
            .as_ref()
            .map(|p| p.common().clone())
            .unwrap_or_else(|| {
                PhaseCommon::new(shared_context::tenant_id(), shared_context::request_id())
            });
        let terminal = AuthPhase::Revoked { common, reason };
        self.save_snapshot(SnapshotScope::Session, &key, &terminal).await?;

        info!(session_id = %session_id, reason = %reason, "Flow revoked");
        Ok(())
    }
}
