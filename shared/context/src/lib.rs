//! Request-scoped context for tenant isolation
//!
//! Every operation that touches tenant data runs inside a tenant scope: a
//! task-local binding that pins the tenant id and carries the rest of the
//! per-request state (session, rate-limit observation, circuit observation,
//! cluster identity). The context is an immutable value with copy-on-update
//! semantics; scoped overrides nest and never leak across requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_error::AppError;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use uuid::Uuid;

/// Tenant identifier
///
/// Free-form string id; rows and derived keys are bound to it. Three values
/// are reserved: `system`, `default` and `job`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub const SYSTEM: &'static str = "system";
    pub const DEFAULT: &'static str = "default";
    pub const JOB: &'static str = "job";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn default_tenant() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn job() -> Self {
        Self(Self::JOB.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self.0.as_str(), Self::SYSTEM | Self::DEFAULT | Self::JOB)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Browser login; may perform interactive-only operations
    Session,
    /// Programmatic credential
    ApiKey,
}

/// Session state carried inside the request context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: SessionKind,
    pub mfa_enabled: bool,
    /// None exactly while MFA is enrolled but not yet verified for this session
    pub verified_at: Option<DateTime<Utc>>,
}

impl SessionContext {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn is_interactive(&self) -> bool {
        self.kind == SessionKind::Session
    }
}

/// Outcome of the rate-limit consume for this request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
    /// Milliseconds the request was delayed before continuing
    pub delay: u64,
}

/// Circuit-breaker state as seen by downstream components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub name: String,
    pub state: CircuitState,
}

/// Cluster identity for the executing pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub is_leader: bool,
    pub runner_id: Option<String>,
    pub shard_id: Option<String>,
}

/// Immutable per-request snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub tenant_id: TenantId,
    pub request_id: Uuid,
    pub session: Option<SessionContext>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,
    pub circuit: Option<CircuitInfo>,
    pub cluster: Option<ClusterInfo>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            tenant_id: TenantId::default_tenant(),
            request_id: Uuid::now_v7(),
            session: None,
            ip_address: None,
            user_agent: None,
            rate_limit: None,
            circuit: None,
            cluster: None,
        }
    }
}

impl RequestContext {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            ..Default::default()
        }
    }

    /// Derived context with a different tenant
    pub fn with_tenant(&self, tenant_id: TenantId) -> Self {
        let mut next = self.clone();
        next.tenant_id = tenant_id;
        next
    }

    /// Derived context with a session attached
    pub fn with_session(&self, session: SessionContext) -> Self {
        let mut next = self.clone();
        next.session = Some(session);
        next
    }

    /// Snapshot retaining only fields safe to carry across pods
    pub fn to_serializable(&self) -> SerializableContext {
        SerializableContext {
            tenant_id: self.tenant_id.clone(),
            request_id: self.request_id,
            cluster: self.cluster.clone(),
        }
    }
}

/// Cross-pod trace propagation payload (no session, no client address)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableContext {
    pub tenant_id: TenantId,
    pub request_id: Uuid,
    pub cluster: Option<ClusterInfo>,
}

impl From<SerializableContext> for RequestContext {
    fn from(s: SerializableContext) -> Self {
        Self {
            tenant_id: s.tenant_id,
            request_id: s.request_id,
            cluster: s.cluster,
            ..Default::default()
        }
    }
}

tokio::task_local! {
    static CURRENT: RefCell<RequestContext>;
}

/// Run an effect with the given context bound for its duration
///
/// Scopes nest; the innermost binding wins and is dropped when the effect
/// completes.
pub async fn within<F, T>(ctx: RequestContext, effect: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT.scope(RefCell::new(ctx), effect).await
}

/// Run an effect with only the tenant overridden, keeping the rest of the
/// current context
pub async fn within_tenant<F, T>(tenant_id: TenantId, effect: F) -> T
where
    F: Future<Output = T>,
{
    let ctx = current().with_tenant(tenant_id);
    within(ctx, effect).await
}

/// Current context, or a fresh `default`-tenant context outside any scope
pub fn current() -> RequestContext {
    CURRENT
        .try_with(|c| c.borrow().clone())
        .unwrap_or_default()
}

/// Mutate the current scope's context in place
///
/// No-op outside a scope; overrides made here are visible for the remainder
/// of the enclosing `within` only.
pub fn update(f: impl FnOnce(&mut RequestContext)) {
    let _ = CURRENT.try_with(|c| f(&mut c.borrow_mut()));
}

pub fn tenant_id() -> TenantId {
    CURRENT
        .try_with(|c| c.borrow().tenant_id.clone())
        .unwrap_or_else(|_| TenantId::default_tenant())
}

pub fn request_id() -> Uuid {
    current().request_id
}

/// Session from the current context; fails when the request is anonymous
pub fn session() -> Result<SessionContext, AppError> {
    CURRENT
        .try_with(|c| c.borrow().session.clone())
        .ok()
        .flatten()
        .ok_or_else(|| AppError::Auth("No active session".to_string()))
}

pub fn is_leader() -> bool {
    current().cluster.map(|c| c.is_leader).unwrap_or(false)
}

pub fn shard_id() -> Option<String> {
    current().cluster.and_then(|c| c.shard_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_binds_tenant() {
        let ctx = RequestContext::for_tenant(TenantId::new("acme"));
        let seen = within(ctx, async { tenant_id() }).await;
        assert_eq!(seen.as_str(), "acme");
    }

    #[tokio::test]
    async fn test_default_outside_scope() {
        assert_eq!(tenant_id().as_str(), TenantId::DEFAULT);
        assert!(session().is_err());
    }

    #[tokio::test]
    async fn test_nested_override_is_scoped() {
        let outer = RequestContext::for_tenant(TenantId::new("outer"));
        within(outer, async {
            assert_eq!(tenant_id().as_str(), "outer");

            within_tenant(TenantId::new("inner"), async {
                assert_eq!(tenant_id().as_str(), "inner");
            })
            .await;

            // inner binding dropped
            assert_eq!(tenant_id().as_str(), "outer");
        })
        .await;
    }

    #[tokio::test]
    async fn test_update_mutates_current_scope() {
        let ctx = RequestContext::default();
        within(ctx, async {
            assert!(current().rate_limit.is_none());
            update(|c| {
                c.rate_limit = Some(RateLimitInfo {
                    limit: 100,
                    remaining: 99,
                    reset_after: 60,
                    delay: 0,
                })
            });
            assert_eq!(current().rate_limit.unwrap().remaining, 99);
        })
        .await;
    }

    #[tokio::test]
    async fn test_session_accessor() {
        let session_ctx = SessionContext {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            kind: SessionKind::Session,
            mfa_enabled: false,
            verified_at: Some(Utc::now()),
        };
        let ctx = RequestContext::default().with_session(session_ctx.clone());

        within(ctx, async {
            let s = session().unwrap();
            assert_eq!(s.id, session_ctx.id);
            assert!(s.is_verified());
        })
        .await;
    }

    #[test]
    fn test_serializable_drops_session_and_client() {
        let ctx = RequestContext {
            session: Some(SessionContext {
                id: Uuid::now_v7(),
                user_id: Uuid::now_v7(),
                kind: SessionKind::Session,
                mfa_enabled: true,
                verified_at: None,
            }),
            ip_address: Some("10.1.2.3".to_string()),
            ..Default::default()
        };

        let snapshot = ctx.to_serializable();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("10.1.2.3"));

        let restored: RequestContext = snapshot.into();
        assert!(restored.session.is_none());
        assert_eq!(restored.tenant_id, ctx.tenant_id);
        assert_eq!(restored.request_id, ctx.request_id);
    }

    #[test]
    fn test_reserved_tenants() {
        assert!(TenantId::system().is_reserved());
        assert!(TenantId::default_tenant().is_reserved());
        assert!(TenantId::job().is_reserved());
        assert!(!TenantId::new("acme").is_reserved());
    }
}
