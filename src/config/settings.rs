use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PaymentError;
use crate::transactions::Currency;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub phonepe: PhonePeConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
    #[serde(default)]
    pub pg_url: Option<String>,
    #[serde(default)]
    pub pg_schema: Option<String>,
    #[serde(default)]
    pub pg_pool_size: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/payments.db".to_string(),
            pg_url: None,
            pg_schema: None,
            pg_pool_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Public origin used to build redirect URLs handed to providers.
    pub base_url: String,
    pub support_email: String,
    /// Where the failure page's "try again" link points.
    pub retry_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            support_email: "support@example.com".to_string(),
            retry_path: "/pricing".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_currency")]
    pub currency: Currency,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Maximum accepted age of a webhook signature timestamp.
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,
}

fn default_stripe_currency() -> Currency {
    Currency::Cad
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance_secs() -> i64 {
    300
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            currency: default_stripe_currency(),
            api_base: default_stripe_api_base(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhonePeEnvironment {
    Sandbox,
    Production,
}

impl PhonePeEnvironment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "uat" | "preprod" => Some(PhonePeEnvironment::Sandbox),
            "production" | "prod" => Some(PhonePeEnvironment::Production),
            _ => None,
        }
    }

    pub fn default_auth_url(self) -> &'static str {
        match self {
            PhonePeEnvironment::Sandbox => {
                "https://api-preprod.phonepe.com/apis/pg-sandbox/v1/oauth/token"
            }
            PhonePeEnvironment::Production => {
                "https://api.phonepe.com/apis/identity-manager/v1/oauth/token"
            }
        }
    }

    pub fn default_pg_base(self) -> &'static str {
        match self {
            PhonePeEnvironment::Sandbox => "https://api-preprod.phonepe.com/apis/pg-sandbox",
            PhonePeEnvironment::Production => "https://api.phonepe.com/apis/pg",
        }
    }
}

impl Default for PhonePeEnvironment {
    fn default() -> Self {
        Self::Sandbox
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhonePeConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_version: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub environment: PhonePeEnvironment,
    /// Overrides the environment's OAuth token endpoint.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Overrides the environment's PG API base.
    #[serde(default)]
    pub pg_base: Option<String>,
    #[serde(default)]
    pub callback_username: Option<String>,
    #[serde(default)]
    pub callback_password: Option<String>,
    /// Seconds before a PhonePe checkout link expires.
    #[serde(default)]
    pub expire_after_secs: Option<u64>,
}

impl PhonePeConfig {
    pub fn auth_url(&self) -> String {
        self.auth_url
            .clone()
            .unwrap_or_else(|| self.environment.default_auth_url().to_string())
    }

    pub fn pg_base(&self) -> String {
        self.pg_base
            .clone()
            .unwrap_or_else(|| self.environment.default_pg_base().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    pub pending_expiry_minutes: i64,
    pub reconcile_interval_secs: u64,
    pub provider_timeout_secs: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            pending_expiry_minutes: 30,
            reconcile_interval_secs: 60,
            provider_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsConfig {
    pub cache_ttl_secs: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: i64,
    pub window_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 30,
            window_secs: 60,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, PaymentError> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let parsed: Settings = toml::from_str(&content)
                    .map_err(|e| PaymentError::Config(format!("{}: {}", path, e)))?;
                tracing::info!("Loaded configuration from {}", path);
                parsed
            }
            None => {
                tracing::info!("No config file found, using defaults and environment");
                Settings::default()
            }
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }

    /// Environment variables win over the config file.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), PaymentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| PaymentError::Config(format!("invalid SERVER_PORT `{}`", v)))?;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.storage.pg_url = Some(v);
        }
        if let Some(v) = get("DATABASE_SCHEMA") {
            self.storage.pg_schema = Some(v);
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = get("APP_BASE_URL") {
            self.app.base_url = v;
        }
        if let Some(v) = get("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = Some(v);
        }
        if let Some(v) = get("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = Some(v);
        }
        if let Some(v) = get("STRIPE_CURRENCY") {
            self.stripe.currency = Currency::parse(&v)
                .ok_or_else(|| PaymentError::Config(format!("unsupported STRIPE_CURRENCY `{}`", v)))?;
        }
        if let Some(v) = get("PHONEPE_CLIENT_ID") {
            self.phonepe.client_id = Some(v);
        }
        if let Some(v) = get("PHONEPE_CLIENT_SECRET") {
            self.phonepe.client_secret = Some(v);
        }
        if let Some(v) = get("PHONEPE_CLIENT_VERSION") {
            self.phonepe.client_version = Some(v);
        }
        if let Some(v) = get("PHONEPE_MERCHANT_ID") {
            self.phonepe.merchant_id = Some(v);
        }
        if let Some(v) = get("PHONEPE_ENV") {
            self.phonepe.environment = PhonePeEnvironment::parse(&v)
                .ok_or_else(|| PaymentError::Config(format!("unknown PHONEPE_ENV `{}`", v)))?;
        }
        if let Some(v) = get("PHONEPE_CALLBACK_USERNAME") {
            self.phonepe.callback_username = Some(v);
        }
        if let Some(v) = get("PHONEPE_CALLBACK_PASSWORD") {
            self.phonepe.callback_password = Some(v);
        }
        Ok(())
    }
}
