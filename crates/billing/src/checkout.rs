//! Stripe Checkout session creation
//!
//! Resolves a package from the catalog, picks the checkout mode and attaches
//! the metadata the webhook handler needs to credit the purchase later. The
//! metadata, not a fresh catalog lookup, is what reconciliation trusts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use stripe::{
    CheckoutSessionId, CheckoutSessionMode, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentMethodTypes,
    CreateCheckoutSessionSubscriptionData, Customer, ListCustomers, ListSubscriptions,
    Subscription,
};
use url::Url;

use crate::catalog::{Package, PackageCatalog};
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Metadata keys shared with the webhook handler
pub mod metadata {
    pub const KIND: &str = "kind";
    pub const PACKAGE_ID: &str = "package_id";
    pub const USER_ID: &str = "user_id";
    pub const AMOUNT: &str = "amount";
    pub const INTERVAL: &str = "interval";

    pub const KIND_CURRENCY: &str = "currency";
    pub const KIND_SUBSCRIPTION: &str = "subscription";
}

/// Vendor-hosted checkout page reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// Caller input for a new checkout
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub package_id: String,
    pub customer_email: Option<String>,
    pub user_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// One-off payment
    Payment,
    Subscription,
}

/// Fully-resolved request handed to the payment vendor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorCheckoutParams {
    pub price_ref: String,
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub client_reference_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// A vendor subscription belonging to a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerSubscription {
    pub id: String,
    pub status: String,
    /// Unix timestamp
    pub current_period_end: i64,
}

/// Payment vendor operations used by checkout
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: VendorCheckoutParams,
    ) -> BillingResult<CheckoutSession>;

    /// Payment status of an existing session (`paid`, `unpaid`, `no_payment_required`)
    async fn session_payment_status(&self, session_id: &str) -> BillingResult<String>;

    async fn customer_subscriptions(&self, email: &str) -> BillingResult<Vec<CustomerSubscription>>;
}

/// Stripe-backed gateway
pub struct StripeCheckoutGateway {
    stripe: StripeClient,
}

impl StripeCheckoutGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

#[async_trait]
impl CheckoutGateway for StripeCheckoutGateway {
    async fn create_checkout_session(
        &self,
        params: VendorCheckoutParams,
    ) -> BillingResult<CheckoutSession> {
        let mut create = CreateCheckoutSession::new();
        create.success_url = Some(params.success_url.as_str());
        create.cancel_url = Some(params.cancel_url.as_str());
        create.customer_email = params.customer_email.as_deref();
        create.client_reference_id = params.client_reference_id.as_deref();
        create.payment_method_types = Some(vec![
            CreateCheckoutSessionPaymentMethodTypes::Card,
            CreateCheckoutSessionPaymentMethodTypes::Ideal,
        ]);
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(params.price_ref.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.metadata = Some(params.metadata.clone());

        match params.mode {
            CheckoutMode::Payment => {
                create.mode = Some(CheckoutSessionMode::Payment);
            }
            CheckoutMode::Subscription => {
                create.mode = Some(CheckoutSessionMode::Subscription);
                // Copied onto the subscription so later subscription events carry user_id
                create.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(params.metadata.clone()),
                    ..Default::default()
                });
            }
        }

        let session = self
            .stripe
            .call(stripe::CheckoutSession::create(self.stripe.inner(), create))
            .await?;

        let redirect_url = session.url.ok_or_else(|| {
            BillingError::StripeApi(format!("checkout session {} has no url", session.id))
        })?;

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            redirect_url,
        })
    }

    async fn session_payment_status(&self, session_id: &str) -> BillingResult<String> {
        let id = session_id
            .parse::<CheckoutSessionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid session ID: {}", e)))?;

        let session = self
            .stripe
            .call(stripe::CheckoutSession::retrieve(
                self.stripe.inner(),
                &id,
                &[],
            ))
            .await?;

        Ok(session.payment_status.as_str().to_string())
    }

    async fn customer_subscriptions(&self, email: &str) -> BillingResult<Vec<CustomerSubscription>> {
        let mut list_customers = ListCustomers::new();
        list_customers.email = Some(email);

        let customers = self
            .stripe
            .call(Customer::list(self.stripe.inner(), &list_customers))
            .await?;

        let Some(customer) = customers.data.into_iter().next() else {
            return Ok(Vec::new());
        };

        let mut list_subscriptions = ListSubscriptions::new();
        list_subscriptions.customer = Some(customer.id.clone());

        let subscriptions = self
            .stripe
            .call(Subscription::list(self.stripe.inner(), &list_subscriptions))
            .await?;

        Ok(subscriptions
            .data
            .into_iter()
            .map(|sub| CustomerSubscription {
                id: sub.id.to_string(),
                status: sub.status.as_str().to_string(),
                current_period_end: sub.current_period_end,
            })
            .collect())
    }
}

/// Builds checkout sessions for catalog packages
pub struct CheckoutService {
    catalog: Arc<PackageCatalog>,
    gateway: Arc<dyn CheckoutGateway>,
}

impl CheckoutService {
    pub fn new(catalog: Arc<PackageCatalog>, gateway: Arc<dyn CheckoutGateway>) -> Self {
        Self { catalog, gateway }
    }

    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }

    /// Create a vendor checkout session for a package
    ///
    /// Fails with `PackageNotProvisioned` before any vendor call when the package
    /// has no Stripe price. Vendor failures are not retried.
    pub async fn create_session(&self, request: CheckoutRequest) -> BillingResult<CheckoutSession> {
        let package = self.catalog.get_package(&request.package_id)?;
        let price_ref = package.require_price_ref()?;

        validate_redirect_url("success_url", &request.success_url)?;
        validate_redirect_url("cancel_url", &request.cancel_url)?;

        let user_id = request
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        // The webhook credits coins to this user, there is nobody else to credit
        if user_id.is_none() && !package.kind().is_subscription() {
            return Err(BillingError::InvalidInput(format!(
                "user_id is required to buy {}",
                package.id
            )));
        }
        let customer_email = request
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty());

        let mode = if package.kind().is_subscription() {
            CheckoutMode::Subscription
        } else {
            CheckoutMode::Payment
        };

        let params = VendorCheckoutParams {
            price_ref: price_ref.to_string(),
            mode,
            success_url: request.success_url.clone(),
            cancel_url: request.cancel_url.clone(),
            customer_email: customer_email.map(str::to_string),
            client_reference_id: user_id.map(str::to_string),
            metadata: checkout_metadata(package, user_id),
        };

        let session = self
            .gateway
            .create_checkout_session(params)
            .await
            .map_err(|e| {
                tracing::error!(
                    package_id = %package.id,
                    error = %e,
                    "Failed to create checkout session"
                );
                match e {
                    BillingError::CheckoutCreationFailed(msg) => {
                        BillingError::CheckoutCreationFailed(msg)
                    }
                    other => BillingError::CheckoutCreationFailed(other.to_string()),
                }
            })?;

        tracing::info!(
            package_id = %package.id,
            user_id = ?user_id,
            session_id = %session.session_id,
            mode = ?mode,
            "Created checkout session"
        );

        Ok(session)
    }

    pub async fn payment_status(&self, session_id: &str) -> BillingResult<String> {
        if session_id.trim().is_empty() {
            return Err(BillingError::InvalidInput("session_id is required".to_string()));
        }
        self.gateway.session_payment_status(session_id).await
    }

    pub async fn customer_subscriptions(&self, email: &str) -> BillingResult<Vec<CustomerSubscription>> {
        self.gateway.customer_subscriptions(email).await
    }
}

/// Metadata attached to the vendor session, read back by the webhook handler
pub fn checkout_metadata(package: &Package, user_id: Option<&str>) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    meta.insert(metadata::PACKAGE_ID.to_string(), package.id.clone());
    if let Some(user_id) = user_id {
        meta.insert(metadata::USER_ID.to_string(), user_id.to_string());
    }

    match (package.currency_amount(), package.interval()) {
        (Some(amount), _) => {
            meta.insert(metadata::KIND.to_string(), metadata::KIND_CURRENCY.to_string());
            meta.insert(metadata::AMOUNT.to_string(), amount.to_string());
        }
        (None, Some(interval)) => {
            meta.insert(
                metadata::KIND.to_string(),
                metadata::KIND_SUBSCRIPTION.to_string(),
            );
            meta.insert(metadata::INTERVAL.to_string(), interval.to_string());
        }
        (None, None) => {}
    }

    meta
}

fn validate_redirect_url(field: &str, value: &str) -> BillingResult<()> {
    let parsed = Url::parse(value)
        .map_err(|e| BillingError::InvalidInput(format!("{} is not an absolute URL: {}", field, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(BillingError::InvalidInput(format!(
            "{} must be an http(s) URL with a host",
            field
        )));
    }

    Ok(())
}
