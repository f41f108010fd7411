//! Package listing, checkout and Stripe webhook routes

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use luckychat_billing::{
    BillingInterval, CheckoutRequest, CustomerSubscription, LedgerRecord, Package, PackageKind,
    PackageOffer, ReconciliationResult,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CoinPackageResponse {
    pub id: String,
    pub name: String,
    pub coins: i64,
    /// Minor units (cents)
    pub price: i64,
    pub price_eur: f64,
    pub original_price_eur: Option<f64>,
    pub is_popular: bool,
    pub bonus_description: Option<String>,
    pub stripe_price_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PremiumPackageResponse {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub price_eur: f64,
    pub interval: BillingInterval,
    pub features: Vec<String>,
    pub stripe_price_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    pub success: bool,
    pub coin_packages: Vec<CoinPackageResponse>,
    pub premium_packages: Vec<PremiumPackageResponse>,
}

/// Package type as sent by the shop front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Coins,
    PremiumMonthly,
    PremiumYearly,
}

impl PackageType {
    fn matches(self, kind: PackageKind) -> bool {
        matches!(
            (self, kind),
            (PackageType::Coins, PackageKind::CurrencyBundle)
                | (PackageType::PremiumMonthly, PackageKind::SubscriptionMonthly)
                | (PackageType::PremiumYearly, PackageKind::SubscriptionYearly)
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub package_id: String,
    pub package_type: PackageType,
    pub user_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub result: ReconciliationResult,
}

#[derive(Debug, Deserialize)]
pub struct PaymentSuccessQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentCancelResponse {
    pub success: bool,
    pub message: &'static str,
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<CustomerSubscription>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List coin bundles and premium plans
pub async fn list_packages(State(state): State<AppState>) -> Json<PackagesResponse> {
    let catalog = &state.billing.catalog;

    let coin_packages = catalog.currency_bundles().filter_map(coin_package).collect();
    let premium_packages = catalog.subscriptions().filter_map(premium_package).collect();

    Json(PackagesResponse {
        success: true,
        coin_packages,
        premium_packages,
    })
}

/// Create a Stripe Checkout session for a package
///
/// Purchases without a `user_id` are attributed to the current user, so the
/// webhook always has a ledger record to credit.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let Json(req) = payload?;

    let package_id = req.package_id.trim();
    if package_id.is_empty() {
        return Err(ApiError::Validation(
            "package_id and package_type are required".to_string(),
        ));
    }

    let package = state.billing.catalog.get_package(package_id)?;
    if !req.package_type.matches(package.kind()) {
        return Err(ApiError::Validation(format!(
            "Package {} is not of type {:?}",
            package.id, req.package_type
        )));
    }

    let user_id = req
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or(auth_user.sub);

    let request = CheckoutRequest {
        package_id: package.id.clone(),
        customer_email: req.customer_email,
        user_id: Some(user_id),
        success_url: req
            .success_url
            .unwrap_or_else(|| state.config.default_success_url()),
        cancel_url: req
            .cancel_url
            .unwrap_or_else(|| state.config.default_cancel_url()),
    };

    let session = state.billing.checkout.create_session(request).await?;

    Ok(Json(CheckoutResponse {
        success: true,
        checkout_url: session.redirect_url,
        session_id: session.session_id,
    }))
}

/// Handle Stripe webhook events
///
/// The body must be the exact bytes Stripe signed.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Missing stripe-signature header".to_string()))?;

    let result = state.billing.webhooks.handle(&body, signature).await?;

    Ok(Json(WebhookResponse {
        status: "success",
        result,
    }))
}

/// Report the payment status of a completed checkout
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<PaymentSuccessQuery>,
) -> Json<PaymentStatusResponse> {
    match state.billing.checkout.payment_status(&query.session_id).await {
        Ok(payment_status) => Json(PaymentStatusResponse {
            success: true,
            message: Some("Payment successful!".to_string()),
            session_id: Some(query.session_id),
            payment_status: Some(payment_status),
            error: None,
        }),
        Err(e) => {
            tracing::warn!(session_id = %query.session_id, error = %e, "Failed to verify payment");
            Json(PaymentStatusResponse {
                success: false,
                message: None,
                session_id: None,
                payment_status: None,
                error: Some(e.to_string()),
            })
        }
    }
}

pub async fn payment_cancel(State(state): State<AppState>) -> Json<PaymentCancelResponse> {
    Json(PaymentCancelResponse {
        success: false,
        message: "Payment was cancelled",
        redirect_url: state.config.game_url(),
    })
}

/// Stripe subscriptions of the customer with this email
pub async fn customer_subscriptions(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Json<SubscriptionsResponse> {
    let subscriptions = state
        .billing
        .checkout
        .customer_subscriptions(&email)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list customer subscriptions");
            Vec::new()
        });

    Json(SubscriptionsResponse { subscriptions })
}

/// Balance and subscription state of the current user
pub async fn wallet(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<LedgerRecord>> {
    let record = state.billing.reconciler.wallet(&auth_user.sub).await?;
    Ok(Json(record))
}

// =============================================================================
// Helpers
// =============================================================================

fn to_eur(minor_units: i64) -> f64 {
    minor_units as f64 / 100.0
}

fn coin_package(package: &Package) -> Option<CoinPackageResponse> {
    let PackageOffer::CurrencyBundle {
        currency_amount,
        original_price_minor_units,
        is_popular,
        bonus_description,
    } = &package.offer
    else {
        return None;
    };

    Some(CoinPackageResponse {
        id: package.id.clone(),
        name: package.display_name.clone(),
        coins: *currency_amount,
        price: package.price_minor_units,
        price_eur: to_eur(package.price_minor_units),
        original_price_eur: original_price_minor_units.map(to_eur),
        is_popular: *is_popular,
        bonus_description: bonus_description.clone(),
        stripe_price_id: package.vendor_price_ref.clone(),
    })
}

fn premium_package(package: &Package) -> Option<PremiumPackageResponse> {
    let PackageOffer::Subscription { interval, features } = &package.offer else {
        return None;
    };

    Some(PremiumPackageResponse {
        id: package.id.clone(),
        name: package.display_name.clone(),
        price: package.price_minor_units,
        price_eur: to_eur(package.price_minor_units),
        interval: *interval,
        features: features.clone(),
        stripe_price_id: package.vendor_price_ref.clone(),
    })
}
