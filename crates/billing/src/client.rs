//! Stripe client wrapper

use std::future::Future;
use std::time::Duration;

use crate::error::{BillingError, BillingResult};

/// Default upper bound for any single Stripe call
pub const DEFAULT_VENDOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe credentials and call limits
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            timeout: DEFAULT_VENDOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Placeholder keys are accepted in development so the server can boot without Stripe
    pub fn is_placeholder(&self) -> bool {
        self.secret_key.ends_with("_placeholder_key")
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[redacted]")
            .field("webhook_secret", &"[redacted]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Thin wrapper around the async-stripe client that bounds every call with a timeout
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Run a Stripe request, failing with `VendorTimeout` if it exceeds the configured limit
    pub async fn call<T, F>(&self, request: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "Stripe request timed out"
                );
                Err(BillingError::VendorTimeout(self.config.timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        assert!(StripeConfig::new("sk_test_placeholder_key", "").is_placeholder());
        assert!(!StripeConfig::new("sk_test_51abc", "whsec_x").is_placeholder());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = StripeConfig::new("sk_live_secret", "whsec_secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk_live_secret"));
        assert!(!printed.contains("whsec_secret"));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let client = StripeClient::new(
            StripeConfig::new("sk_test_placeholder_key", "")
                .with_timeout(Duration::from_millis(10)),
        );
        let result: BillingResult<()> = client
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BillingError::VendorTimeout(_))));
    }
}
