//! Session service implementation
//!
//! Mints opaque session/refresh pairs, rotates them on refresh, revokes them
//! and resolves bearer tokens through the 5-minute lookup cache. Only
//! tenant-keyed HMACs of the tokens ever touch storage or the cache.

use access_service_core::domains::access::domain::machine::{RevokeReason, TokenSet};
use access_service_core::domains::access::domain::model::{
    RefreshTokenRow, SessionRow, SessionSummary,
};
use access_service_core::domains::access::domain::repository::{PairTemplate, SessionRepository};
use access_service_core::domains::access::domain::service::{IssuedSession, MfaService, SessionService};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use shared_cache::{LookupCache, SharedStore};
use shared_context::{SessionContext, SessionKind};
use shared_crypto::{token_pair, TenantCipher};
use shared_error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::audit::AuditSink;

pub struct SessionServiceImpl {
    sessions: Arc<dyn SessionRepository>,
    cipher: TenantCipher,
    mfa: Arc<dyn MfaService>,
    audit: AuditSink,
    access_ttl: ChronoDuration,
    refresh_ttl: ChronoDuration,
    /// token hash → summary; staleness bounded by the configured TTL
    lookup_cache: LookupCache<String, SessionSummary>,
}

impl SessionServiceImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        cipher: TenantCipher,
        mfa: Arc<dyn MfaService>,
        audit: AuditSink,
        store: SharedStore,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
        lookup_ttl: Duration,
    ) -> Self {
        let lookup_repo = Arc::clone(&sessions);
        let lookup_cache = LookupCache::new("sessions", store, lookup_ttl, move |hash: String| {
            let repo = Arc::clone(&lookup_repo);
            Box::pin(async move {
                let row = repo.by_hash(&shared_context::tenant_id(), &hash).await?;
                Ok(row.as_ref().map(SessionSummary::from))
            })
        });

        Self {
            sessions,
            cipher,
            mfa,
            audit,
            access_ttl: ChronoDuration::seconds(access_ttl_seconds),
            refresh_ttl: ChronoDuration::seconds(refresh_ttl_seconds),
            lookup_cache,
        }
    }

    /// Wire the lookup cache into the process invalidation hub
    pub async fn attach_invalidation(&self, hub: &shared_cache::InvalidationHub) {
        self.lookup_cache.attach(hub).await;
    }

    fn mint(&self, user_id: Uuid, mfa_pending: bool, ip_address: Option<String>, user_agent: Option<String>)
        -> (SessionRow, RefreshTokenRow, TokenSet)
    {
        let now = Utc::now();
        let access = token_pair();
        let refresh = token_pair();
        let session_id = Uuid::now_v7();
        let tenant = shared_context::tenant_id();

        let access_expires_at = now + self.access_ttl;
        let refresh_expires_at = now + self.refresh_ttl;

        let session = SessionRow {
            session_id,
            tenant_id: tenant.to_string(),
            user_id,
            token_hash: self.cipher.hmac(&access.token),
            refresh_token_hash: self.cipher.hmac(&refresh.token),
            access_expires_at,
            refresh_expires_at,
            verified_at: if mfa_pending { None } else { Some(now) },
            ip_address,
            user_agent,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let refresh_row = RefreshTokenRow {
            token_id: Uuid::now_v7(),
            tenant_id: tenant.to_string(),
            user_id,
            session_id,
            token_hash: session.refresh_token_hash.clone(),
            expires_at: refresh_expires_at,
            created_at: now,
            deleted_at: None,
        };

        let tokens = TokenSet {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at,
            refresh_expires_at,
        };

        (session, refresh_row, tokens)
    }
}

#[async_trait]
impl SessionService for SessionServiceImpl {
    async fn create(
        &self,
        user_id: Uuid,
        mfa_pending: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession, AppError> {
        let (session, refresh, tokens) = self.mint(user_id, mfa_pending, ip_address, user_agent);
        self.sessions.insert_pair(&session, &refresh).await?;

        debug!(user_id = %user_id, session_id = %session.session_id, "Session created");
        Ok(IssuedSession {
            session_id: session.session_id,
            user_id,
            tokens,
            mfa_pending,
            rotated_from: None,
        })
    }

    async fn login(
        &self,
        user_id: Uuid,
        mfa_pending: bool,
        provider: &str,
        is_new_user: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession, AppError> {
        let issued = self.create(user_id, mfa_pending, ip_address, user_agent).await?;

        metrics::counter!(
            "auth_logins",
            "provider" => provider.to_string(),
            "is_new_user" => is_new_user.to_string()
        )
        .increment(1);
        self.audit.record(
            "auth.login",
            Some(user_id),
            serde_json::json!({"provider": provider, "is_new_user": is_new_user}),
        );

        Ok(issued)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, AppError> {
        let tenant = shared_context::tenant_id();
        let old_refresh_hash = self.cipher.hmac(refresh_token);

        let now = Utc::now();
        let access = token_pair();
        let refresh = token_pair();
        let replacement = PairTemplate {
            session_id: Uuid::now_v7(),
            token_hash: self.cipher.hmac(&access.token),
            refresh_token_id: Uuid::now_v7(),
            refresh_token_hash: self.cipher.hmac(&refresh.token),
            access_expires_at: now + self.access_ttl,
            refresh_expires_at: now + self.refresh_ttl,
            ip_address: shared_context::current().ip_address,
            user_agent: shared_context::current().user_agent,
        };
        let tokens = TokenSet {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: replacement.access_expires_at,
            refresh_expires_at: replacement.refresh_expires_at,
        };

        let outcome = self
            .sessions
            .rotate(&tenant, &old_refresh_hash, replacement)
            .await?;

        // The replaced session must stop resolving immediately
        self.lookup_cache.invalidate(&outcome.old_token_hash).await?;

        metrics::counter!("auth_refreshes").increment(1);
        self.audit.record(
            "auth.refresh",
            Some(outcome.user_id),
            serde_json::json!({"old_session_id": outcome.old_session_id}),
        );

        Ok(IssuedSession {
            session_id: outcome.new_session_id,
            user_id: outcome.user_id,
            tokens,
            mfa_pending: outcome.mfa_pending,
            rotated_from: Some(outcome.old_session_id),
        })
    }

    async fn revoke_all(&self, user_id: Uuid, reason: RevokeReason) -> Result<u64, AppError> {
        let tenant = shared_context::tenant_id();
        let revoked = self.sessions.soft_delete_by_user(&tenant, user_id).await?;

        metrics::counter!("auth_revocations", "reason" => reason.to_string()).increment(revoked);
        self.audit.record(
            "auth.revoked",
            Some(user_id),
            serde_json::json!({"reason": reason.to_string(), "sessions": revoked}),
        );

        Ok(revoked)
    }

    async fn mark_verified(&self, session_id: Uuid, token_hash: &str) -> Result<(), AppError> {
        let tenant = shared_context::tenant_id();
        self.sessions.verify(&tenant, session_id, Utc::now()).await?;
        self.lookup_cache.invalidate(&token_hash.to_string()).await?;
        Ok(())
    }

    async fn invalidate_lookup(&self, token_hash: &str) -> Result<(), AppError> {
        self.lookup_cache.invalidate(&token_hash.to_string()).await
    }

    async fn lookup(&self, token: &str) -> Result<Option<SessionContext>, AppError> {
        let tenant = shared_context::tenant_id();
        let hash = self.cipher.hmac(token);

        let Some(summary) = self.lookup_cache.get(&hash).await? else {
            return Ok(None);
        };

        // Activity tracking; failures are logged, never raised
        {
            let sessions = Arc::clone(&self.sessions);
            let tenant = tenant.clone();
            let session_id = summary.id;
            tokio::spawn(async move {
                if let Err(e) = sessions.touch(&tenant, session_id).await {
                    debug!(session_id = %session_id, "Session touch failed: {}", e);
                }
            });
        }

        if summary.app_id != tenant.as_str() {
            warn!(
                session_tenant = %summary.app_id,
                request_tenant = %tenant,
                "Session resolved under foreign tenant, rejecting"
            );
            return Ok(None);
        }

        if Utc::now() > summary.access_expires_at {
            warn!(session_id = %summary.id, "Expired session token presented");
            return Ok(None);
        }

        let mfa_enabled = self.mfa.is_enabled(summary.user_id).await?;

        Ok(Some(SessionContext {
            id: summary.id,
            user_id: summary.user_id,
            kind: SessionKind::Session,
            mfa_enabled,
            verified_at: summary.verified_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_service_core::domains::access::domain::repository::RotationOutcome;
    use access_service_core::domains::access::dto::mfa_dto::{
        MfaEnrollResp, MfaStatusResp, MfaVerifyResp,
    };
    use shared_context::{RequestContext, TenantId};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory pair store mimicking the Postgres rotation semantics
    #[derive(Clone, Default)]
    struct FakeSessionRepo {
        sessions: Arc<Mutex<HashMap<Uuid, SessionRow>>>,
        refreshes: Arc<Mutex<HashMap<Uuid, RefreshTokenRow>>>,
        mfa_enabled_users: Arc<Mutex<Vec<Uuid>>>,
    }

    #[async_trait]
    impl SessionRepository for FakeSessionRepo {
        async fn insert_pair(
            &self,
            session: &SessionRow,
            refresh: &RefreshTokenRow,
        ) -> Result<(), AppError> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.session_id, session.clone());
            self.refreshes
                .lock()
                .unwrap()
                .insert(refresh.token_id, refresh.clone());
            Ok(())
        }

        async fn by_hash(
            &self,
            tenant_id: &TenantId,
            token_hash: &str,
        ) -> Result<Option<SessionRow>, AppError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .values()
                .find(|s| {
                    s.tenant_id == tenant_id.as_str()
                        && s.token_hash == token_hash
                        && s.deleted_at.is_none()
                })
                .cloned())
        }

        async fn rotate(
            &self,
            tenant_id: &TenantId,
            old_refresh_hash: &str,
            replacement: PairTemplate,
        ) -> Result<RotationOutcome, AppError> {
            let mut refreshes = self.refreshes.lock().unwrap();
            let old_refresh = refreshes
                .values()
                .find(|r| {
                    r.tenant_id == tenant_id.as_str()
                        && r.token_hash == old_refresh_hash
                        && r.deleted_at.is_none()
                })
                .cloned()
                .ok_or_else(|| AppError::Auth("Invalid refresh token".to_string()))?;

            if old_refresh.expires_at <= Utc::now() {
                return Err(AppError::Auth("Refresh token expired".to_string()));
            }

            let now = Utc::now();
            refreshes.get_mut(&old_refresh.token_id).unwrap().deleted_at = Some(now);

            let mut sessions = self.sessions.lock().unwrap();
            let old_session = sessions.get_mut(&old_refresh.session_id).unwrap();
            let old_verified = old_session.verified_at;
            let old_token_hash = old_session.token_hash.clone();
            old_session.deleted_at = Some(now);

            let mfa_enabled = self
                .mfa_enabled_users
                .lock()
                .unwrap()
                .contains(&old_refresh.user_id);
            let mfa_pending = mfa_enabled && old_verified.is_none();

            sessions.insert(
                replacement.session_id,
                SessionRow {
                    session_id: replacement.session_id,
                    tenant_id: tenant_id.to_string(),
                    user_id: old_refresh.user_id,
                    token_hash: replacement.token_hash.clone(),
                    refresh_token_hash: replacement.refresh_token_hash.clone(),
                    access_expires_at: replacement.access_expires_at,
                    refresh_expires_at: replacement.refresh_expires_at,
                    verified_at: if mfa_pending { None } else { Some(now) },
                    ip_address: None,
                    user_agent: None,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                },
            );
            refreshes.insert(
                replacement.refresh_token_id,
                RefreshTokenRow {
                    token_id: replacement.refresh_token_id,
                    tenant_id: tenant_id.to_string(),
                    user_id: old_refresh.user_id,
                    session_id: replacement.session_id,
                    token_hash: replacement.refresh_token_hash.clone(),
                    expires_at: replacement.refresh_expires_at,
                    created_at: now,
                    deleted_at: None,
                },
            );

            Ok(RotationOutcome {
                user_id: old_refresh.user_id,
                old_session_id: old_refresh.session_id,
                old_token_hash,
                new_session_id: replacement.session_id,
                mfa_pending,
            })
        }

        async fn touch(&self, _tenant_id: &TenantId, _session_id: Uuid) -> Result<(), AppError> {
            Ok(())
        }

        async fn verify(
            &self,
            _tenant_id: &TenantId,
            session_id: Uuid,
            at: chrono::DateTime<Utc>,
        ) -> Result<(), AppError> {
            if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
                session.verified_at = Some(at);
            }
            Ok(())
        }

        async fn soft_delete(&self, _tenant_id: &TenantId, session_id: Uuid) -> Result<(), AppError> {
            if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
                session.deleted_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn soft_delete_by_user(
            &self,
            tenant_id: &TenantId,
            user_id: Uuid,
        ) -> Result<u64, AppError> {
            let now = Utc::now();
            let mut revoked = 0;
            for session in self.sessions.lock().unwrap().values_mut() {
                if session.tenant_id == tenant_id.as_str()
                    && session.user_id == user_id
                    && session.deleted_at.is_none()
                {
                    session.deleted_at = Some(now);
                    revoked += 1;
                }
            }
            for refresh in self.refreshes.lock().unwrap().values_mut() {
                if refresh.user_id == user_id {
                    refresh.deleted_at = Some(now);
                }
            }
            Ok(revoked)
        }

        async fn delete_expired(&self) -> Result<u64, AppError> {
            Ok(0)
        }
    }

    struct StubMfa;

    #[async_trait]
    impl MfaService for StubMfa {
        async fn enroll(&self, _: Uuid, _: &str) -> Result<MfaEnrollResp, AppError> {
            unimplemented!()
        }
        async fn verify_totp(&self, _: Uuid, _: &str) -> Result<MfaVerifyResp, AppError> {
            unimplemented!()
        }
        async fn verify_backup(&self, _: Uuid, _: &str) -> Result<MfaVerifyResp, AppError> {
            unimplemented!()
        }
        async fn disable(&self, _: Uuid) -> Result<(), AppError> {
            unimplemented!()
        }
        async fn status(&self, _: Uuid) -> Result<MfaStatusResp, AppError> {
            unimplemented!()
        }
        async fn is_enabled(&self, _: Uuid) -> Result<bool, AppError> {
            Ok(false)
        }
    }

    #[derive(Clone, Default)]
    struct NullAuditRepo;

    #[async_trait]
    impl access_service_core::domains::access::domain::repository::AuditLogRepository for NullAuditRepo {
        async fn insert(
            &self,
            _entry: &access_service_core::domains::access::domain::model::AuditLogRow,
        ) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn service(repo: FakeSessionRepo) -> SessionServiceImpl {
        let cipher = TenantCipher::new(
            shared_crypto::Keyring::from_base64("QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=")
                .unwrap(),
        );
        SessionServiceImpl::new(
            Arc::new(repo),
            cipher,
            Arc::new(StubMfa),
            AuditSink::new(Arc::new(NullAuditRepo)),
            SharedStore::memory(),
            900,
            2_592_000,
            Duration::from_secs(300),
        )
    }

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::for_tenant(TenantId::new(tenant))
    }

    #[tokio::test]
    async fn test_create_then_lookup() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        shared_context::within(ctx("t1"), async {
            let issued = service.create(user, false, None, None).await.unwrap();
            assert!(!issued.mfa_pending);

            let resolved = service.lookup(&issued.tokens.access_token).await.unwrap().unwrap();
            assert_eq!(resolved.id, issued.session_id);
            assert_eq!(resolved.user_id, user);
            assert!(resolved.is_verified());
        })
        .await;
    }

    #[tokio::test]
    async fn test_lookup_is_tenant_isolated() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        let issued = shared_context::within(ctx("tenant-a"), service.create(user, false, None, None))
            .await
            .unwrap();

        // Same token under another tenant resolves to nothing
        let foreign = shared_context::within(
            ctx("tenant-b"),
            service.lookup(&issued.tokens.access_token),
        )
        .await
        .unwrap();
        assert!(foreign.is_none());
    }

    #[tokio::test]
    async fn test_mfa_pending_session_not_verified() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        shared_context::within(ctx("t1"), async {
            let issued = service.create(user, true, None, None).await.unwrap();
            assert!(issued.mfa_pending);

            let resolved = service.lookup(&issued.tokens.access_token).await.unwrap().unwrap();
            assert!(!resolved.is_verified());
        })
        .await;
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_old_token_dies() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        shared_context::within(ctx("t1"), async {
            let issued = service.create(user, false, None, None).await.unwrap();

            let rotated = service.refresh(&issued.tokens.refresh_token).await.unwrap();
            assert_ne!(rotated.session_id, issued.session_id);
            assert_ne!(rotated.tokens.access_token, issued.tokens.access_token);

            // Old access token no longer resolves
            let stale = service.lookup(&issued.tokens.access_token).await.unwrap();
            assert!(stale.is_none());

            // Old refresh token is single-use
            let err = service.refresh(&issued.tokens.refresh_token).await.unwrap_err();
            assert!(matches!(err, AppError::Auth(_)));

            // The rotated pair works
            assert!(service.lookup(&rotated.tokens.access_token).await.unwrap().is_some());
            assert!(service.refresh(&rotated.tokens.refresh_token).await.is_ok());
        })
        .await;
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        shared_context::within(ctx("t1"), async {
            let first = service.create(user, false, None, None).await.unwrap();
            let second = service.create(user, false, None, None).await.unwrap();

            let revoked = service.revoke_all(user, RevokeReason::Logout).await.unwrap();
            assert_eq!(revoked, 2);

            // Cached summaries expire via invalidation-on-write or TTL; the
            // repository no longer resolves either token
            service
                .invalidate_lookup(&service.cipher.hmac(&first.tokens.access_token))
                .await
                .unwrap();
            service
                .invalidate_lookup(&service.cipher.hmac(&second.tokens.access_token))
                .await
                .unwrap();
            assert!(service.lookup(&first.tokens.access_token).await.unwrap().is_none());
            assert!(service.lookup(&second.tokens.access_token).await.unwrap().is_none());

            // Their refresh tokens fail too
            let err = service.refresh(&first.tokens.refresh_token).await.unwrap_err();
            assert!(matches!(err, AppError::Auth(_)));
        })
        .await;
    }

    #[tokio::test]
    async fn test_mark_verified_transitions_session() {
        let repo = FakeSessionRepo::default();
        let service = service(repo.clone());
        let user = Uuid::now_v7();

        shared_context::within(ctx("t1"), async {
            let issued = service.create(user, true, None, None).await.unwrap();
            let hash = service.cipher.hmac(&issued.tokens.access_token);

            service.mark_verified(issued.session_id, &hash).await.unwrap();

            let resolved = service.lookup(&issued.tokens.access_token).await.unwrap().unwrap();
            assert!(resolved.is_verified());
        })
        .await;
    }
}
