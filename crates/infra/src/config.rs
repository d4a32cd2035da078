//! Application configuration.
//!
//! Values come from an optional TOML file named by `CARDVAULT_CONFIG`, then
//! environment variables override individual keys. The result is validated
//! once at startup.

use std::path::Path;
use std::time::Duration as StdDuration;

use serde::Deserialize;
use thiserror::Error;

use cardvault_core::Secret;
use cardvault_gateway::{GatewayConfig, Merchant, RetryPolicy};
use cardvault_sales::TransitionPolicy;

use crate::services::ShopSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.message().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub base_url: String,
    pub pid: String,
    pub key: Secret,
    pub notify_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// Accepted `type` values at checkout.
    pub channels: Vec<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            pid: String::new(),
            key: Secret::new(""),
            notify_url: String::new(),
            return_url: String::new(),
            timeout_secs: 10,
            max_retries: 2,
            channels: vec!["alipay".to_string(), "wxpay".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShopSection {
    pub order_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub refund_reason_min_len: usize,
    pub allow_refund_resubmission: bool,
    pub manual_handoff_ttl_secs: u64,
}

impl Default for ShopSection {
    fn default() -> Self {
        Self {
            order_ttl_secs: 900,
            sweep_interval_secs: 60,
            refund_reason_min_len: 5,
            allow_refund_resubmission: false,
            manual_handoff_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: Secret,
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub gateway: GatewaySection,
    pub shop: ShopSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: Secret::new(""),
            bind_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            gateway: GatewaySection::default(),
            shop: ShopSection::default(),
        }
    }
}

impl AppConfig {
    /// File (if `CARDVAULT_CONFIG` is set), then process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CARDVAULT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = get("JWT_SECRET") {
            self.jwt_secret = Secret::new(v);
        }
        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("REDIS_URL") {
            self.redis_url = Some(v);
        }

        let gw = &mut self.gateway;
        if let Some(v) = get("GATEWAY_BASE_URL") {
            gw.base_url = v;
        }
        if let Some(v) = get("GATEWAY_PID") {
            gw.pid = v;
        }
        if let Some(v) = get("GATEWAY_KEY") {
            gw.key = Secret::new(v);
        }
        if let Some(v) = get("NOTIFY_URL") {
            gw.notify_url = v;
        }
        if let Some(v) = get("RETURN_URL") {
            gw.return_url = v;
        }
        if let Some(v) = get("GATEWAY_TIMEOUT_SECS") {
            gw.timeout_secs = parse_num("GATEWAY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("GATEWAY_MAX_RETRIES") {
            gw.max_retries = parse_num("GATEWAY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("PAYMENT_CHANNELS") {
            gw.channels = v
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }

        let shop = &mut self.shop;
        if let Some(v) = get("ORDER_TTL_SECS") {
            shop.order_ttl_secs = parse_num("ORDER_TTL_SECS", &v)?;
        }
        if let Some(v) = get("SWEEP_INTERVAL_SECS") {
            shop.sweep_interval_secs = parse_num("SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("REFUND_REASON_MIN_LEN") {
            shop.refund_reason_min_len = parse_num("REFUND_REASON_MIN_LEN", &v)?;
        }
        if let Some(v) = get("ALLOW_REFUND_RESUBMISSION") {
            shop.allow_refund_resubmission = parse_bool("ALLOW_REFUND_RESUBMISSION", &v)?;
        }
        if let Some(v) = get("MANUAL_HANDOFF_TTL_SECS") {
            shop.manual_handoff_ttl_secs = parse_num("MANUAL_HANDOFF_TTL_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let gw = &self.gateway;
        if gw.pid.trim().is_empty() {
            return Err(ConfigError::Validation("GATEWAY_PID must be set".to_string()));
        }
        if gw.key.is_empty() {
            return Err(ConfigError::Validation("GATEWAY_KEY must be set".to_string()));
        }
        for (name, url) in [
            ("GATEWAY_BASE_URL", &gw.base_url),
            ("NOTIFY_URL", &gw.notify_url),
            ("RETURN_URL", &gw.return_url),
        ] {
            check_url(name, url)?;
        }
        if gw.channels.is_empty() {
            return Err(ConfigError::Validation("PAYMENT_CHANNELS must not be empty".to_string()));
        }
        if gw.timeout_secs == 0 {
            return Err(ConfigError::Validation("GATEWAY_TIMEOUT_SECS must be positive".to_string()));
        }

        let shop = &self.shop;
        for (name, value) in [
            ("ORDER_TTL_SECS", shop.order_ttl_secs),
            ("SWEEP_INTERVAL_SECS", shop.sweep_interval_secs),
            ("MANUAL_HANDOFF_TTL_SECS", shop.manual_handoff_ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let gw = &self.gateway;
        GatewayConfig {
            base_url: gw.base_url.clone(),
            merchant: Merchant::new(gw.pid.clone(), gw.key.clone()),
            notify_url: gw.notify_url.clone(),
            return_url: gw.return_url.clone(),
            timeout: StdDuration::from_secs(gw.timeout_secs),
            retry: RetryPolicy::with_max_retries(gw.max_retries),
        }
    }

    pub fn shop_settings(&self) -> ShopSettings {
        let shop = &self.shop;
        ShopSettings {
            order_ttl: secs(shop.order_ttl_secs),
            sweep_interval: secs(shop.sweep_interval_secs),
            manual_handoff_ttl: secs(shop.manual_handoff_ttl_secs),
            refund_claim_ttl: secs(self.refund_call_budget_secs()),
            payment_channels: self.gateway.channels.clone(),
            policy: TransitionPolicy {
                refund_reason_min_len: shop.refund_reason_min_len,
                allow_refund_resubmission: shop.allow_refund_resubmission,
            },
        }
    }
}

impl AppConfig {
    /// Upper bound on one gateway refund call including retries, doubled.
    /// A refund claim older than this belongs to a caller that died.
    fn refund_call_budget_secs(&self) -> u64 {
        let gw = &self.gateway;
        let attempts = u64::try_from(gw.max_retries).unwrap_or(u64::MAX).saturating_add(1);
        gw.timeout_secs.saturating_mul(attempts).saturating_mul(2).max(60)
    }
}

fn secs(n: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(n).unwrap_or(i64::MAX / 1_000))
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{name} must be a non-negative integer, got '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Validation(format!("{name} must be a boolean, got '{value}'"))),
    }
}

fn check_url(name: &str, url: &str) -> Result<(), ConfigError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::Validation(format!("{name} must be an http(s) URL")))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!("{name} has no valid host")));
    }
    Ok(())
}
