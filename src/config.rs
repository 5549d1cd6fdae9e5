//! Application configuration loaded from environment variables.
//!
//! Secrets (Gemini key, gateway credentials, callback secret) are injected as
//! environment variables by the deployment and cached in memory at startup.

use std::env;
use std::time::Duration;

/// Credits granted to every new account at registration.
pub const TRIAL_CREDITS: i64 = 3;

/// Sessions with no run, no live stream and no request for this long are
/// evicted.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often idle sessions are looked for.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-stage timeout for the analysis pipeline.
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 60;

/// Which balance store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL (CORS origin and payment redirect target)
    pub frontend_url: String,
    /// Public URL of this API (used to build the gateway callback URL)
    pub api_url: String,
    /// Firebase/GCP project ID (Firestore database and ID token audience)
    pub firebase_project_id: String,
    /// Server port
    pub port: u16,
    /// Balance store backend
    pub store_backend: StoreBackend,
    /// Gemini model used for match extraction
    pub gemini_extraction_model: String,
    /// Gemini model used for predictions
    pub gemini_prediction_model: String,
    /// Upper bound for each external pipeline stage
    pub stage_timeout: Duration,
    /// Credit purchases immediately without contacting the gateway
    pub payment_test_mode: bool,
    /// Accept credentialed CORS requests from local dev servers
    pub allow_dev_origins: bool,

    // --- Secrets ---
    /// Gemini API key
    pub gemini_api_key: String,
    /// Payment gateway API key
    pub shopier_api_key: String,
    /// Payment gateway API secret
    pub shopier_api_secret: String,
    /// Shared secret used to sign gateway callbacks
    pub payment_callback_secret: Vec<u8>,
    /// Bearer token for administrative endpoints
    pub admin_api_token: String,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            firebase_project_id: "test-project".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            gemini_extraction_model: "gemini-2.5-flash".to_string(),
            gemini_prediction_model: "gemini-2.5-pro".to_string(),
            stage_timeout: Duration::from_secs(5),
            payment_test_mode: false,
            allow_dev_origins: true,
            gemini_api_key: "test_gemini_key".to_string(),
            shopier_api_key: "test_shopier_key".to_string(),
            shopier_api_secret: "test_shopier_secret".to_string(),
            payment_callback_secret: b"test_callback_secret_32_bytes!!!".to_vec(),
            admin_api_token: "test_admin_token".to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development, a `.env` file is read if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let store_backend = match env::var("BALANCE_STORE")
            .unwrap_or_else(|_| "firestore".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "firestore" => StoreBackend::Firestore,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid(
                    "BALANCE_STORE",
                    format!("unknown backend '{other}'"),
                ))
            }
        };

        let stage_timeout_secs = match env::var("STAGE_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::Invalid("STAGE_TIMEOUT_SECS", format!("not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_STAGE_TIMEOUT_SECS,
        };

        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        // Local dev servers are trusted only when the frontend itself is local
        let allow_dev_origins = match env::var("ALLOW_DEV_ORIGINS") {
            Ok(raw) => raw.trim().eq_ignore_ascii_case("true"),
            Err(_) => is_local_http_origin(&frontend_url),
        };

        Ok(Self {
            allow_dev_origins,
            frontend_url,
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            firebase_project_id: env::var("FIREBASE_PROJECT_ID")
                .map_err(|_| ConfigError::Missing("FIREBASE_PROJECT_ID"))?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend,
            gemini_extraction_model: env::var("GEMINI_EXTRACTION_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            gemini_prediction_model: env::var("GEMINI_PREDICTION_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-pro".to_string()),
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            payment_test_mode: env::var("PAYMENT_TEST_MODE")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),

            gemini_api_key: required_secret("GEMINI_API_KEY")?,
            shopier_api_key: required_secret("SHOPIER_API_KEY")?,
            shopier_api_secret: required_secret("SHOPIER_API_SECRET")?,
            payment_callback_secret: required_secret("PAYMENT_CALLBACK_SECRET")?.into_bytes(),
            admin_api_token: required_secret("ADMIN_API_TOKEN")?,
        })
    }
}

/// Whether `origin` is plain HTTP on the loopback host (any port).
pub fn is_local_http_origin(origin: &str) -> bool {
    match url::Url::parse(origin) {
        Ok(url) => {
            url.scheme() == "http"
                && matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
                && url.username().is_empty()
                && url.password().is_none()
        }
        Err(_) => false,
    }
}

fn required_secret(name: &'static str) -> Result<String, ConfigError> {
    let value = env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))?;
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
