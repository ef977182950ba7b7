use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "brl";
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (realtime notification channel)
    pub redis_url: String,

    /// JWT signing secret (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    pub jwt_expiration: usize,

    /// Refresh token lifetime in seconds
    pub refresh_token_expiration: usize,

    /// Server bind host
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment: development, test, production
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool sizing and timeouts (seconds)
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Payment gateway secret key
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Secret used to verify payment webhook signatures
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Webhook signature timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Outbound HTTP timeout for the payment gateway (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Frontend base URL used to build redirect and email links
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// ISO currency code for checkout sessions
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Transactional email API endpoint; delivery disabled when unset
    #[serde(default)]
    pub email_api_url: Option<String>,

    /// Transactional email API key
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for outgoing mail
    #[serde(default = "default_email_from")]
    pub email_from: String,

    /// Outbound HTTP timeout for the email API (seconds)
    #[serde(default = "default_email_timeout_secs")]
    pub email_timeout_secs: u64,

    /// Directory where uploaded images are stored
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Public base URL under which uploads are served
    #[serde(default = "default_upload_base_url")]
    pub upload_base_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}
fn default_gateway_timeout_secs() -> u64 {
    15
}
fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_email_from() -> String {
    "Varanda da Conveniencia <no-reply@varanda.example>".to_string()
}
fn default_email_timeout_secs() -> u64 {
    10
}
fn default_upload_dir() -> String {
    "public/img".to_string()
}
fn default_upload_base_url() -> String {
    "/img".to_string()
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let environment = env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    if environment == "production" && secret == DEV_DEFAULT_JWT_SECRET {
        return Err(ValidationError::new("default_jwt_secret_in_production"));
    }
    Ok(())
}

impl AppConfig {
    /// Programmatic constructor used by tests and tools.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: String,
        redis_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        refresh_token_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            jwt_expiration,
            refresh_token_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            frontend_url: default_frontend_url(),
            currency: default_currency(),
            email_api_url: None,
            email_api_key: None,
            email_from: default_email_from(),
            email_timeout_secs: default_email_timeout_secs(),
            upload_dir: default_upload_dir(),
            upload_base_url: default_upload_base_url(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Load configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables (in that order).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", environment.clone())?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("jwt_expiration", 1800)?
        .set_default("refresh_token_expiration", 7 * 24 * 3600)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?;

    if environment != "production" {
        builder = builder
            .set_default("database_url", "sqlite://varanda.db?mode=rwc")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    let env_file = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));

    let settings = builder
        .add_source(File::from(default_file).required(false))
        .add_source(File::from(env_file).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("varanda_api={log_level},tower_http=info")));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
