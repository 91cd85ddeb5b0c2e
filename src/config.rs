use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_APPLE_VERIFY_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";
const DEFAULT_APPLE_SANDBOX_URL: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
const DEFAULT_GOOGLE_PLAY_API_BASE: &str = "https://androidpublisher.googleapis.com";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub domain: String,
    pub host: String,
    pub port: u16,
    /// `PRODUCTION`/`PROD` switch on secure cookies, HSTS and the smaller body limit.
    pub environment: String,

    // Security
    pub session_secret: Secret<String>,
    pub email_secret: Secret<String>,
    pub key_signing_secret: Secret<String>,

    // Stripe
    pub stripe_secret_key: Secret<String>,
    pub stripe_public_key: String,
    pub stripe_api_base: String,

    // App Store receipt validation
    pub apple_shared_secret: Option<Secret<String>>,
    pub apple_verify_url: String,
    pub apple_sandbox_url: String,

    // Google Play receipt validation
    pub google_public_key: Option<String>,
    pub google_play_api_token: Option<Secret<String>>,
    pub google_package_name: Option<String>,
    pub google_play_api_base: String,

    // Downloads
    pub speed_test_bucket: Option<String>,
    pub client_files: ClientFiles,

    /// Window the per-route brute-force limits apply to.
    pub brute_force_window_secs: u64,
    /// Take the client address from the proxy's `X-Forwarded-For` hop.
    pub trust_proxy: bool,
}

/// Download locations for the desktop clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFiles {
    pub mac_app: Option<String>,
    pub mac_update: Option<String>,
    pub windows_app: Option<String>,
    pub windows_update: Option<String>,
}

impl ClientFiles {
    pub fn url(&self, name: &str) -> Option<&str> {
        match name {
            "mac-app" => self.mac_app.as_deref(),
            "mac-update" => self.mac_update.as_deref(),
            "windows-app" => self.windows_app.as_deref(),
            "windows-update" => self.windows_update.as_deref(),
            _ => None,
        }
    }
}

fn is_production(environment: &str) -> bool {
    environment.eq_ignore_ascii_case("production") || environment.eq_ignore_ascii_case("prod")
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let environment: String = config
            .get("environment")
            .unwrap_or_else(|_| "LOCAL".to_string());
        let trust_proxy = config
            .get("trust_proxy")
            .unwrap_or_else(|_| is_production(&environment));

        Ok(Self {
            database_url: config.get("database_url")?,
            domain: config.get("domain")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port").unwrap_or(3000),
            environment,

            session_secret: Secret::new(config.get("session_secret")?),
            email_secret: Secret::new(config.get("email_secret")?),
            key_signing_secret: Secret::new(config.get("key_signing_secret")?),

            stripe_secret_key: Secret::new(config.get("stripe_secret_key")?),
            stripe_public_key: config.get("stripe_public_key")?,
            stripe_api_base: config
                .get("stripe_api_base")
                .unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string()),

            apple_shared_secret: config
                .get::<String>("apple_shared_secret")
                .ok()
                .map(Secret::new),
            apple_verify_url: config
                .get("apple_verify_url")
                .unwrap_or_else(|_| DEFAULT_APPLE_VERIFY_URL.to_string()),
            apple_sandbox_url: config
                .get("apple_sandbox_url")
                .unwrap_or_else(|_| DEFAULT_APPLE_SANDBOX_URL.to_string()),

            google_public_key: config.get("google_public_key").ok(),
            google_play_api_token: config
                .get::<String>("google_play_api_token")
                .ok()
                .map(Secret::new),
            google_package_name: config.get("google_package_name").ok(),
            google_play_api_base: config
                .get("google_play_api_base")
                .unwrap_or_else(|_| DEFAULT_GOOGLE_PLAY_API_BASE.to_string()),

            speed_test_bucket: config.get("speed_test_bucket").ok(),
            client_files: ClientFiles {
                mac_app: config.get("client_files.mac_app").ok(),
                mac_update: config.get("client_files.mac_update").ok(),
                windows_app: config.get("client_files.windows_app").ok(),
                windows_update: config.get("client_files.windows_update").ok(),
            },

            brute_force_window_secs: config.get("brute_force_window_secs").unwrap_or(3600),
            trust_proxy,
        })
    }

    pub fn is_production(&self) -> bool {
        is_production(&self.environment)
    }

    pub fn brute_force_window(&self) -> Duration {
        Duration::from_secs(self.brute_force_window_secs.max(1))
    }

    /// Maximum accepted request body size in bytes.
    pub fn body_limit(&self) -> usize {
        if self.is_production() {
            1024 * 1024
        } else {
            3 * 1024 * 1024
        }
    }
}
