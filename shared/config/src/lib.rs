use serde::Deserialize;

/// Backend selection for the distributed cache and rate-limit stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Master encryption key, base64-encoded 32 bytes (required)
    pub encryption_key: String,

    /// Public base URL of the API (drives the Secure cookie flag)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Application name (used in TOTP provisioning URIs and outbound User-Agent)
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Cache / rate-limit store backend
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Redis URL (required when store_backend = redis)
    pub redis_url: Option<String>,

    /// NATS URL for the event bus (optional; events are dropped when absent)
    pub nats_url: Option<String>,

    /// Access token lifetime in seconds (default: 900 = 15 minutes)
    #[serde(default = "default_access_token_seconds")]
    pub access_token_seconds: i64,

    /// Refresh token lifetime in seconds (default: 2592000 = 30 days)
    #[serde(default = "default_refresh_token_seconds")]
    pub refresh_token_seconds: i64,

    /// OAuth state cookie lifetime in seconds (default: 600 = 10 minutes)
    #[serde(default = "default_oauth_state_seconds")]
    pub oauth_state_seconds: i64,

    /// Session lookup cache TTL in seconds
    #[serde(default = "default_session_cache_seconds")]
    pub session_cache_seconds: u64,

    /// MFA posture cache TTL in seconds. Bounds the grace period during which
    /// a session created before enrollment still passes MFA-gated checks.
    #[serde(default = "default_mfa_cache_seconds")]
    pub mfa_cache_seconds: u64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    // Per-provider OAuth credentials
    pub oauth_google_client_id: Option<String>,
    pub oauth_google_client_secret: Option<String>,
    pub oauth_github_client_id: Option<String>,
    pub oauth_github_client_secret: Option<String>,
    pub oauth_microsoft_client_id: Option<String>,
    pub oauth_microsoft_client_secret: Option<String>,
    pub oauth_microsoft_tenant_id: Option<String>,
    pub oauth_apple_client_id: Option<String>,
    pub oauth_apple_team_id: Option<String>,
    pub oauth_apple_key_id: Option<String>,
    pub oauth_apple_private_key: Option<String>,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_app_name() -> String {
    "ParametricPortal".to_string()
}

fn default_access_token_seconds() -> i64 {
    900 // 15 minutes
}

fn default_refresh_token_seconds() -> i64 {
    2_592_000 // 30 days
}

fn default_oauth_state_seconds() -> i64 {
    600 // 10 minutes
}

fn default_session_cache_seconds() -> u64 {
    300 // 5 minutes
}

fn default_mfa_cache_seconds() -> u64 {
    300 // 5 minutes
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Credentials for a single OAuth provider
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Microsoft directory tenant, Apple team id
    pub directory: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .set_default("database_url", "")?
            .set_default("encryption_key", "")?
            .add_source(config::Environment::default());

        builder.build()?.try_deserialize::<Config>()
    }

    /// True when the public base URL is HTTPS (drives the Secure cookie flag)
    pub fn is_https(&self) -> bool {
        self.api_base_url.starts_with("https://")
    }

    /// Credentials for a provider, if configured
    ///
    /// Apple has no static secret; the team/key/private-key triple stands in
    /// and the OAuth client builds the signed assertion at exchange time.
    pub fn provider_credentials(&self, provider: &str) -> Option<ProviderCredentials> {
        let (id, secret, directory) = match provider {
            "google" => (
                self.oauth_google_client_id.clone(),
                self.oauth_google_client_secret.clone(),
                None,
            ),
            "github" => (
                self.oauth_github_client_id.clone(),
                self.oauth_github_client_secret.clone(),
                None,
            ),
            "microsoft" => (
                self.oauth_microsoft_client_id.clone(),
                self.oauth_microsoft_client_secret.clone(),
                self.oauth_microsoft_tenant_id.clone(),
            ),
            "apple" => (
                self.oauth_apple_client_id.clone(),
                self.oauth_apple_private_key.clone(),
                self.oauth_apple_team_id.clone(),
            ),
            _ => return None,
        };

        Some(ProviderCredentials {
            client_id: id?,
            client_secret: secret?,
            directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_https() {
        let mut config = test_config();
        assert!(!config.is_https());
        config.api_base_url = "https://portal.example.com".to_string();
        assert!(config.is_https());
    }

    #[test]
    fn test_provider_credentials_missing() {
        let config = test_config();
        assert!(config.provider_credentials("google").is_none());
        assert!(config.provider_credentials("unknown").is_none());
    }

    #[test]
    fn test_provider_credentials_present() {
        let mut config = test_config();
        config.oauth_google_client_id = Some("cid".to_string());
        config.oauth_google_client_secret = Some("secret".to_string());

        let creds = config.provider_credentials("google").unwrap();
        assert_eq!(creds.client_id, "cid");
        assert_eq!(creds.client_secret, "secret");
        assert!(creds.directory.is_none());
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            encryption_key: String::new(),
            api_base_url: default_api_base_url(),
            app_name: default_app_name(),
            store_backend: StoreBackend::Memory,
            redis_url: None,
            nats_url: None,
            access_token_seconds: default_access_token_seconds(),
            refresh_token_seconds: default_refresh_token_seconds(),
            oauth_state_seconds: default_oauth_state_seconds(),
            session_cache_seconds: default_session_cache_seconds(),
            mfa_cache_seconds: default_mfa_cache_seconds(),
            host: default_host(),
            port: default_port(),
            oauth_google_client_id: None,
            oauth_google_client_secret: None,
            oauth_github_client_id: None,
            oauth_github_client_secret: None,
            oauth_microsoft_client_id: None,
            oauth_microsoft_client_secret: None,
            oauth_microsoft_tenant_id: None,
            oauth_apple_client_id: None,
            oauth_apple_team_id: None,
            oauth_apple_key_id: None,
            oauth_apple_private_key: None,
        }
    }
}
