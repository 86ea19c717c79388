use chrono::FixedOffset;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const CONFIG_DIR: &str = "config";

/// Payment gateway credentials and endpoints.
///
/// Injected into the gateway adapter at construction; never read from
/// ambient/static state.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Base URL of the provider's payment page.
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Merchant terminal code issued by the provider (`vnp_TmnCode`).
    #[serde(default)]
    pub merchant_code: String,

    /// Shared HMAC secret for request signing and callback verification.
    #[validate(length(min = 16))]
    #[serde(default = "default_gateway_secret")]
    pub hash_secret: String,

    /// URL the provider redirects the shopper back to.
    #[serde(default = "default_gateway_return_url")]
    pub return_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            merchant_code: String::new(),
            hash_secret: default_gateway_secret(),
            return_url: default_gateway_return_url(),
        }
    }
}

/// Membership tier thresholds and discount rates.
///
/// Thresholds are cumulative completed-order spend within the current
/// business-timezone calendar month, in VND.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct TierConfig {
    #[serde(default = "default_silver_threshold")]
    pub silver_threshold: Decimal,
    #[serde(default = "default_gold_threshold")]
    pub gold_threshold: Decimal,
    #[serde(default = "default_diamond_threshold")]
    pub diamond_threshold: Decimal,

    /// Discount rates as fractions (0.03 = 3%).
    #[serde(default = "default_silver_rate")]
    pub silver_rate: Decimal,
    #[serde(default = "default_gold_rate")]
    pub gold_rate: Decimal,
    #[serde(default = "default_diamond_rate")]
    pub diamond_rate: Decimal,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            silver_threshold: default_silver_threshold(),
            gold_threshold: default_gold_threshold(),
            diamond_threshold: default_diamond_threshold(),
            silver_rate: default_silver_rate(),
            gold_rate: default_gold_rate(),
            diamond_rate: default_diamond_rate(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Application environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on connect.
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections.
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections.
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds).
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Log SQL statements at debug level.
    #[serde(default)]
    pub db_sqlx_logging: bool,

    /// Business timezone as a fixed UTC offset in hours. Month boundaries
    /// for tier recompute and "today" windows for revenue reporting are
    /// taken in this timezone, not UTC.
    #[validate(range(min = -12, max = 14))]
    #[serde(default = "default_business_tz_offset_hours")]
    pub business_tz_offset_hours: i32,

    /// Orders at or above this subtotal ship free.
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Flat shipping fee below the free-shipping threshold.
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,

    /// Completed orders younger than this many days cannot be hard-deleted.
    #[serde(default = "default_order_retention_days")]
    pub order_retention_days: i64,

    /// Tier thresholds and discount rates.
    #[validate]
    #[serde(default)]
    pub tier: TierConfig,

    /// Payment gateway credentials.
    #[validate]
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Build a configuration with defaults for everything except the
    /// database URL. Useful for tests and embedded consumers.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_sqlx_logging: false,
            business_tz_offset_hours: default_business_tz_offset_hours(),
            free_shipping_threshold: default_free_shipping_threshold(),
            shipping_fee: default_shipping_fee(),
            order_retention_days: default_order_retention_days(),
            tier: TierConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    /// Load configuration from `config/default.toml`, the per-environment
    /// file selected by `APP_ENV`, and `APP_`-prefixed environment
    /// variables, in increasing precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let cfg = Config::builder()
            .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
            .add_source(File::with_name(&format!("{CONFIG_DIR}/{environment}")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let app: AppConfig = cfg.try_deserialize()?;
        app.validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(environment = %app.environment, "configuration loaded");
        Ok(app)
    }

    /// The configured business timezone as a `chrono` offset.
    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.business_tz_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
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

fn default_business_tz_offset_hours() -> i32 {
    7 // Indochina Time, the business operating region
}

fn default_free_shipping_threshold() -> Decimal {
    dec!(500_000)
}

fn default_shipping_fee() -> Decimal {
    dec!(35_000)
}

fn default_order_retention_days() -> i64 {
    30
}

fn default_silver_threshold() -> Decimal {
    dec!(1_000_000)
}

fn default_gold_threshold() -> Decimal {
    dec!(3_000_000)
}

fn default_diamond_threshold() -> Decimal {
    dec!(5_000_000)
}

fn default_silver_rate() -> Decimal {
    dec!(0.03)
}

fn default_gold_rate() -> Decimal {
    dec!(0.05)
}

fn default_diamond_rate() -> Decimal {
    dec!(0.10)
}

fn default_gateway_base_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

fn default_gateway_secret() -> String {
    // Development-only placeholder; production deployments must override.
    "savora_dev_gateway_secret_key".to_string()
}

fn default_gateway_return_url() -> String {
    "http://localhost:8080/checkout/gateway-return".to_string()
}
