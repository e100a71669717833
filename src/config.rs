use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_COUPON_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_COUPON_CACHE_CAPACITY: usize = 500;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Shared secret for MercadoPago webhook signature verification.
    /// When unset every webhook delivery is rejected with 401.
    #[serde(default)]
    pub mercadopago_webhook_secret: Option<String>,

    /// MercadoPago API access token for fetching payment details
    #[serde(default)]
    pub mercadopago_access_token: Option<String>,

    /// MercadoPago API base URL (overridable for tests)
    #[serde(default = "default_mercadopago_base_url")]
    pub mercadopago_base_url: String,

    /// Email delivery API key; when unset confirmation emails are logged only
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Email delivery API base URL
    #[serde(default = "default_email_api_base_url")]
    pub email_api_base_url: String,

    /// Sender address for outbound notifications
    #[serde(default = "default_email_from")]
    pub email_from: String,

    /// Back-office address that receives new-order notifications
    #[serde(default)]
    pub order_notification_email: Option<String>,

    /// TTL for cached coupon reads, in seconds
    #[serde(default = "default_coupon_cache_ttl")]
    pub coupon_cache_ttl_secs: u64,

    /// Maximum number of cached coupon entries
    #[serde(default = "default_coupon_cache_capacity")]
    pub coupon_cache_capacity: usize,
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

fn default_mercadopago_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_email_api_base_url() -> String {
    "https://api.resend.com".to_string()
}

fn default_email_from() -> String {
    "pedidos@storefront.cl".to_string()
}

fn default_coupon_cache_ttl() -> u64 {
    DEFAULT_COUPON_CACHE_TTL_SECS
}

fn default_coupon_cache_capacity() -> usize {
    DEFAULT_COUPON_CACHE_CAPACITY
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Warn-level checks that do not abort startup: the webhook path rejects
    /// deliveries by itself when the secret is absent.
    pub fn report_missing_integrations(&self) {
        if self.mercadopago_webhook_secret.is_none() {
            tracing::warn!(
                "MERCADOPAGO webhook secret not configured; all webhook deliveries will be rejected"
            );
        }
        if self.mercadopago_access_token.is_none() {
            tracing::warn!(
                "MercadoPago access token not configured; payment detail lookups will fail"
            );
        }
        if self.email_api_key.is_none() {
            info!("Email API key not configured; confirmation emails will be logged only");
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
