use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_PRODUCT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_PRODUCT_CACHE_CAPACITY: usize = 1000;
const DEFAULT_CART_RETENTION_DAYS: i64 = 30;
const DEFAULT_CART_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_EXTERNAL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_CART_COOKIE: &str = "cart_session";

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_lowercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a lowercase 3-letter ISO code".into());
        Err(err)
    }
}

/// Application configuration with validation.
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

    /// Application environment ("development", "production", "test")
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

    /// Public base URL used to build checkout success/cancel callbacks
    #[serde(default)]
    pub public_url: Option<String>,

    /// Platform-provided deployment URL, used when no public URL is set
    #[serde(default)]
    pub deployment_url: Option<String>,

    /// Currency reported for carts that resolve no items
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// Secret key for the payments platform API
    pub stripe_secret_key: String,

    /// Base URL of the payments platform API (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Webhook signing secret; unset disables signature verification in
    /// development, and production refuses unverified deliveries
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Allowed skew for webhook timestamps, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub stripe_webhook_tolerance_secs: u64,

    /// TTL for cached product resolutions, in seconds
    #[serde(default = "default_product_cache_ttl")]
    pub product_cache_ttl_secs: u64,

    /// Maximum number of cached product resolutions
    #[serde(default = "default_product_cache_capacity")]
    pub product_cache_capacity: usize,

    /// Retention window for user-less cart rows, in days
    #[serde(default = "default_cart_retention_days")]
    pub cart_retention_days: i64,

    /// Interval between expired-cart sweeps, in seconds
    #[serde(default = "default_cart_sweep_interval")]
    pub cart_sweep_interval_secs: u64,

    /// Timeout applied to every call to the payments platform, in seconds
    #[serde(default = "default_external_timeout")]
    pub external_timeout_secs: u64,

    /// Name of the cart session cookie
    #[serde(default = "default_cart_cookie_name")]
    pub cart_cookie_name: String,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Minimal constructor used by tests and embedding callers.
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
        stripe_secret_key: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            public_url: None,
            deployment_url: None,
            default_currency: default_currency(),
            stripe_secret_key: stripe_secret_key.into(),
            stripe_api_base: default_stripe_api_base(),
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance(),
            product_cache_ttl_secs: default_product_cache_ttl(),
            product_cache_capacity: default_product_cache_capacity(),
            cart_retention_days: default_cart_retention_days(),
            cart_sweep_interval_secs: default_cart_sweep_interval(),
            external_timeout_secs: default_external_timeout(),
            cart_cookie_name: default_cart_cookie_name(),
            cors_allowed_origins: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Base URL for checkout callback targets: the configured public URL,
    /// falling back to the deployment URL, then localhost for development.
    pub fn checkout_base_url(&self) -> String {
        self.public_url
            .clone()
            .or_else(|| self.deployment_url.clone())
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn product_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.product_cache_ttl_secs)
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    /// Max age for the cart cookie; matches the cart retention window.
    pub fn cart_cookie_max_age_secs(&self) -> i64 {
        self.cart_retention_days * 24 * 60 * 60
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_product_cache_ttl() -> u64 {
    DEFAULT_PRODUCT_CACHE_TTL_SECS
}

fn default_product_cache_capacity() -> usize {
    DEFAULT_PRODUCT_CACHE_CAPACITY
}

fn default_cart_retention_days() -> i64 {
    DEFAULT_CART_RETENTION_DAYS
}

fn default_cart_sweep_interval() -> u64 {
    DEFAULT_CART_SWEEP_INTERVAL_SECS
}

fn default_external_timeout() -> u64 {
    DEFAULT_EXTERNAL_TIMEOUT_SECS
}

fn default_cart_cookie_name() -> String {
    DEFAULT_CART_COOKIE.to_string()
}

/// Initialize the tracing subscriber. Honors `RUST_LOG` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init();
    }
}

/// Loads configuration from `config/` files and `APP__`-prefixed environment
/// variables, then validates it.
///
/// `stripe_secret_key` has no default; it must come from a config file or the
/// environment so a placeholder key never reaches production by accident.
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
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:",
            "127.0.0.1",
            18080,
            "test",
            "sk_test_123",
        )
    }

    #[test]
    fn checkout_base_url_prefers_public_url() {
        let mut cfg = test_config();
        cfg.public_url = Some("https://shop.example.com/".to_string());
        cfg.deployment_url = Some("https://deploy.example.com".to_string());
        assert_eq!(cfg.checkout_base_url(), "https://shop.example.com");
    }

    #[test]
    fn checkout_base_url_falls_back_to_deployment_url() {
        let mut cfg = test_config();
        cfg.deployment_url = Some("https://deploy.example.com".to_string());
        assert_eq!(cfg.checkout_base_url(), "https://deploy.example.com");
    }

    #[test]
    fn checkout_base_url_defaults_to_localhost() {
        assert_eq!(test_config().checkout_base_url(), "http://localhost:3000");
    }

    #[test]
    fn currency_validation_rejects_uppercase() {
        let mut cfg = test_config();
        cfg.default_currency = "USD".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cookie_max_age_matches_retention() {
        let cfg = test_config();
        assert_eq!(cfg.cart_cookie_max_age_secs(), 30 * 24 * 60 * 60);
    }
}
