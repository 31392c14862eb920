use access_service_api::handlers::AppState;
use access_service_api::{build_router, openapi};
use access_service_infra::access::{
    AuditSink, AuthFlowServiceImpl, MfaServiceImpl, OAuthClient, PgAppRepository,
    PgAuditLogRepository, PgMfaSecretRepository, PgOAuthAccountRepository, PgPermissionRepository,
    PgSessionRepository, PgUserRepository, PolicyServiceImpl, ProvisioningServiceImpl, ReplayGuard,
    SessionServiceImpl,
};
use shared_breaker::BreakerRegistry;
use shared_cache::{InvalidationHub, SharedStore};
use shared_config::StoreBackend;
use shared_crypto::{Keyring, TenantCipher};
use shared_events::EventBus;
use shared_rate_limit::RateLimitService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Access service starting");

    // Load configuration
    let config = Arc::new(shared_config::Config::from_env().expect("Failed to load configuration"));
    tracing::info!("Configuration loaded");

    // Master key and tenant cipher
    let keyring = Keyring::from_base64(&config.encryption_key)
        .expect("ENCRYPTION_KEY must be 32 base64-encoded bytes");
    let cipher = TenantCipher::new(keyring);

    // Database
    let db_pool = shared_db::init_pool(&config.database_url, 5)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connected");

    // Distributed store + invalidation hub
    let redis_url = match config.store_backend {
        StoreBackend::Redis => config.redis_url.as_deref(),
        StoreBackend::Memory => None,
    };
    let store = SharedStore::from_config(redis_url).await;
    let hub = InvalidationHub::start(store.clone())
        .await
        .expect("Failed to start cache invalidation hub");

    // Event bus
    let bus = EventBus::connect(config.nats_url.as_deref())
        .await
        .expect("Failed to connect event bus");

    // Rate limiting
    let rate_limits = RateLimitService::from_config(redis_url).await;

    // Repositories
    let users = Arc::new(PgUserRepository::new(db_pool.clone()));
    let sessions_repo = Arc::new(PgSessionRepository::new(db_pool.clone()));
    let accounts = Arc::new(PgOAuthAccountRepository::new(db_pool.clone()));
    let mfa_secrets = Arc::new(PgMfaSecretRepository::new(db_pool.clone()));
    let permissions = Arc::new(PgPermissionRepository::new(db_pool.clone()));
    let apps = Arc::new(PgAppRepository::new(db_pool.clone()));
    let audit = AuditSink::new(Arc::new(PgAuditLogRepository::new(db_pool.clone())));

    // Replay guard with its cleanup fiber
    let replay = ReplayGuard::new(store.clone());
    let _replay_gc = replay.spawn_gc();

    // Circuit breakers with idle GC
    let breakers = BreakerRegistry::new();
    let _breaker_gc = breakers.spawn_gc();

    // Services
    let mfa = Arc::new(MfaServiceImpl::new(
        mfa_secrets,
        cipher.clone(),
        replay,
        audit.clone(),
        store.clone(),
        &config.app_name,
        Duration::from_secs(config.mfa_cache_seconds),
    ));
    mfa.attach_invalidation(&hub).await;

    let sessions = Arc::new(SessionServiceImpl::new(
        sessions_repo,
        cipher.clone(),
        mfa.clone(),
        audit.clone(),
        store.clone(),
        config.access_token_seconds,
        config.refresh_token_seconds,
        Duration::from_secs(config.session_cache_seconds),
    ));
    sessions.attach_invalidation(&hub).await;

    let policy = Arc::new(PolicyServiceImpl::new(
        users.clone(),
        permissions,
        audit.clone(),
        bus.clone(),
        store.clone(),
        Duration::from_secs(300),
    ));
    policy.attach_invalidation(&hub).await;
    policy
        .subscribe_invalidations()
        .await
        .expect("Failed to subscribe policy invalidations");

    let oauth = Arc::new(
        OAuthClient::new(Arc::clone(&config), breakers.clone())
            .expect("Failed to build OAuth client"),
    );

    let flow = Arc::new(AuthFlowServiceImpl::new(
        oauth,
        sessions.clone(),
        mfa.clone(),
        users.clone(),
        accounts,
        cipher,
        store.clone(),
        audit.clone(),
        config.oauth_state_seconds,
        config.refresh_token_seconds as u64,
    ));

    let provisioning = Arc::new(ProvisioningServiceImpl::new(apps, policy.clone(), bus, audit));

    let state = AppState {
        flow,
        sessions,
        mfa,
        policy,
        provisioning,
        users,
        rate_limits,
        config: Arc::clone(&config),
    };
    tracing::info!("Services initialized");

    let app = build_router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Access service listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}
