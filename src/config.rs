use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PAYMENT_LOCK_TTL_SECS: u64 = 60;
const DEFAULT_REFERRER_BONUS: i64 = 100;
const DEFAULT_REFEREE_BONUS: i64 = 25;
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_RAZORPAY_BASE_URL: &str = "https://api.razorpay.com/v1";

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
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
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

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// How long a checkout payment lock excludes a second attempt
    #[serde(default = "default_payment_lock_ttl_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub payment_lock_ttl_secs: u64,

    /// Wallet credit for the user whose referral code was used
    #[serde(default = "default_referrer_bonus")]
    #[validate(range(min = 0))]
    pub referrer_bonus: i64,

    /// Wallet credit for the newly referred user on their first order
    #[serde(default = "default_referee_bonus")]
    #[validate(range(min = 0))]
    pub referee_bonus: i64,

    /// ISO currency code sent to the payment gateway
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    #[serde(default)]
    pub razorpay_key_id: String,

    #[serde(default)]
    pub razorpay_key_secret: String,

    #[serde(default = "default_razorpay_base_url")]
    pub razorpay_base_url: String,

    #[serde(default = "default_address_page_size")]
    #[validate(range(min = 1))]
    pub address_page_size: u64,

    #[serde(default = "default_orders_page_size")]
    #[validate(range(min = 1))]
    pub orders_page_size: u64,

    #[serde(default = "default_admin_orders_page_size")]
    #[validate(range(min = 1))]
    pub admin_orders_page_size: u64,
}

impl AppConfig {
    /// Builds a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            payment_lock_ttl_secs: DEFAULT_PAYMENT_LOCK_TTL_SECS,
            referrer_bonus: DEFAULT_REFERRER_BONUS,
            referee_bonus: DEFAULT_REFEREE_BONUS,
            currency: default_currency(),
            razorpay_key_id: String::new(),
            razorpay_key_secret: String::new(),
            razorpay_base_url: default_razorpay_base_url(),
            address_page_size: default_address_page_size(),
            orders_page_size: default_orders_page_size(),
            admin_orders_page_size: default_admin_orders_page_size(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn payment_lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_lock_ttl_secs as i64)
    }

    pub fn referral_bonus(&self) -> ReferralBonus {
        ReferralBonus {
            referrer: self.referrer_bonus,
            referee: self.referee_bonus,
        }
    }
}

/// Amounts credited when a referred user places their first order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferralBonus {
    pub referrer: i64,
    pub referee: i64,
}

impl Default for ReferralBonus {
    fn default() -> Self {
        Self {
            referrer: DEFAULT_REFERRER_BONUS,
            referee: DEFAULT_REFEREE_BONUS,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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
fn default_payment_lock_ttl_secs() -> u64 {
    DEFAULT_PAYMENT_LOCK_TTL_SECS
}
fn default_referrer_bonus() -> i64 {
    DEFAULT_REFERRER_BONUS
}
fn default_referee_bonus() -> i64 {
    DEFAULT_REFEREE_BONUS
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_razorpay_base_url() -> String {
    DEFAULT_RAZORPAY_BASE_URL.to_string()
}
fn default_address_page_size() -> u64 {
    4
}
fn default_orders_page_size() -> u64 {
    5
}
fn default_admin_orders_page_size() -> u64 {
    10
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
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
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.razorpay_key_id.is_empty() {
        info!("Razorpay key id not configured; gateway order creation will be rejected upstream");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}
