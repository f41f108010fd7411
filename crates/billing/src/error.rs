//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Package {0} has no Stripe price configured")]
    PackageNotProvisioned(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid package catalog: {0}")]
    InvalidCatalog(String),

    #[error("Checkout session creation failed: {0}")]
    CheckoutCreationFailed(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Stripe call timed out after {0} seconds")]
    VendorTimeout(u64),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("No user linked to Stripe customer {0}")]
    CustomerNotLinked(String),

    #[error("Webhook event {0} is still being processed")]
    EventInProgress(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for BillingError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BillingError::Database(format!("migration failed: {}", err))
    }
}

impl BillingError {
    /// Whether the payment vendor should redeliver a webhook that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Database(_)
                | BillingError::CustomerNotLinked(_)
                | BillingError::EventInProgress(_)
        )
    }
}
