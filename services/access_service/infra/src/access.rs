// Access plane infrastructure implementations
pub mod app_repository;
pub mod audit;
pub mod audit_log_repository;
pub mod auth_flow;
pub mod mfa_secret_repository;
pub mod mfa_service;
pub mod oauth_account_repository;
pub mod oauth_client;
pub mod permission_repository;
pub mod policy_service;
pub mod provisioning;
pub mod replay_guard;
pub mod session_repository;
pub mod session_service;
pub mod user_repository;

// Re-export for convenience
pub use app_repository::PgAppRepository;
pub use audit::AuditSink;
pub use audit_log_repository::PgAuditLogRepository;
pub use auth_flow::AuthFlowServiceImpl;
pub use mfa_secret_repository::PgMfaSecretRepository;
pub use mfa_service::MfaServiceImpl;
pub use oauth_account_repository::PgOAuthAccountRepository;
pub use oauth_client::{OAuthClient, OAuthUser, ProviderTokens};
pub use permission_repository::PgPermissionRepository;
pub use policy_service::PolicyServiceImpl;
pub use provisioning::ProvisioningServiceImpl;
pub use replay_guard::ReplayGuard;
pub use session_repository::{PgRefreshTokenRepository, PgSessionRepository};
pub use session_service::SessionServiceImpl;
pub use user_repository::PgUserRepository;
