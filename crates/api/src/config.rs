//! Server configuration loaded from the environment

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Placeholder Stripe key used in development when none is configured
pub const PLACEHOLDER_STRIPE_KEY: &str = "sk_test_placeholder_key";

const DEFAULT_ALLOWED_ORIGINS: &str = "https://www.adultsplaystore.com,http://localhost:3000,\
     http://localhost:3001,http://localhost:3002,http://localhost:5173";
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_STORAGE_BUCKET: &str = "flirty-chat-a045e.firebasestorage.app";
const DEFAULT_STORAGE_PROJECT: &str = "flirty-chat-a045e";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";

/// Prefix of per-package Stripe price overrides, e.g. `STRIPE_PRICE_STARTER`
const PRICE_OVERRIDE_PREFIX: &str = "STRIPE_PRICE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    pub database_url: String,
    pub database_max_connections: u32,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// (package id, price id) pairs from `STRIPE_PRICE_<PACKAGE_ID>`
    pub price_overrides: Vec<(String, String)>,

    // LLM
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub openai_model: String,

    // Storage
    pub storage_bucket: String,
    pub storage_project_id: String,
    pub storage_credentials_path: Option<String>,
    pub storage_service_account: Option<String>,

    pub frontend_url: String,
    pub vendor_timeout: Duration,
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = Environment::parse(get("ENVIRONMENT").as_deref());

        let bind_address = match get("BIND_ADDRESS") {
            Some(addr) => addr,
            None => format!(
                "{}:{}",
                get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                get("PORT").unwrap_or_else(|| "8000".to_string())
            ),
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let database_max_connections = parse_number(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?;

        let stripe_secret_key = match (get("STRIPE_SECRET_KEY"), environment) {
            (Some(key), _) => key,
            (None, Environment::Production) => {
                return Err(ConfigError::Missing("STRIPE_SECRET_KEY"));
            }
            (None, Environment::Development) => {
                tracing::warn!("STRIPE_SECRET_KEY not set, using placeholder key for development");
                PLACEHOLDER_STRIPE_KEY.to_string()
            }
        };

        let stripe_webhook_secret = get("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        if stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, all webhook deliveries will be rejected");
        }

        let mut price_overrides: Vec<(String, String)> = vars
            .iter()
            .filter_map(|(name, value)| {
                let package = name.strip_prefix(PRICE_OVERRIDE_PREFIX)?;
                Some((package.to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();
        price_overrides.sort();

        let vendor_timeout_secs = parse_number(get("VENDOR_TIMEOUT_SECS"), "VENDOR_TIMEOUT_SECS", 30)?;
        if vendor_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "VENDOR_TIMEOUT_SECS",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            environment,
            bind_address,
            allowed_origins,
            database_url,
            database_max_connections,
            stripe_secret_key,
            stripe_webhook_secret,
            price_overrides,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_api_base: get("OPENAI_API_BASE")
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            storage_bucket: get("STORAGE_BUCKET")
                .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
            storage_project_id: get("STORAGE_PROJECT_ID")
                .unwrap_or_else(|| DEFAULT_STORAGE_PROJECT.to_string()),
            storage_credentials_path: get("GOOGLE_APPLICATION_CREDENTIALS"),
            storage_service_account: get("STORAGE_SERVICE_ACCOUNT"),
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            vendor_timeout: Duration::from_secs(vendor_timeout_secs),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Checkout success redirect used when the client does not send one
    pub fn default_success_url(&self) -> String {
        format!(
            "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.frontend_url
        )
    }

    /// Checkout cancel redirect used when the client does not send one
    pub fn default_cancel_url(&self) -> String {
        format!("{}/payment/cancel", self.frontend_url)
    }

    /// Where the front end should send the user after a cancelled payment
    pub fn game_url(&self) -> String {
        format!("{}/game", self.frontend_url)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("bind_address", &self.bind_address)
            .field("allowed_origins", &self.allowed_origins)
            .field("database_url", &"[redacted]")
            .field("stripe_secret_key", &"[redacted]")
            .field("stripe_webhook_secret", &"[redacted]")
            .field("price_overrides", &self.price_overrides)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "[redacted]"))
            .field("openai_api_base", &self.openai_api_base)
            .field("openai_model", &self.openai_model)
            .field("storage_bucket", &self.storage_bucket)
            .field("storage_project_id", &self.storage_project_id)
            .field("frontend_url", &self.frontend_url)
            .field("vendor_timeout", &self.vendor_timeout)
            .finish()
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
    }
}
