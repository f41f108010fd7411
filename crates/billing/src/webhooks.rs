//! Stripe webhook handling
//!
//! Verifies signed Stripe deliveries, classifies them into ledger actions and
//! hands those to the [`EntitlementReconciler`]. Classification is pure; all
//! I/O happens in [`WebhookHandler::handle`].

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::checkout::metadata;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{EventClaim, LedgerStore};
use crate::reconciler::EntitlementReconciler;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a signature timestamp
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// The header has the form `t=<unix>,v1=<hex>[,v1=<hex>...]`. The expected
/// signature is HMAC-SHA256 over `"{t}.{payload}"` keyed with the endpoint
/// secret. Any `v1` entry may match.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    if secret.is_empty() {
        tracing::error!("Webhook secret is not configured, rejecting delivery");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // Untrusted timestamps may sit at the ends of the i64 range
    let skew = now.abs_diff(timestamp);
    if skew > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(timestamp, now, skew, "Webhook timestamp outside tolerance");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        tracing::warn!(candidates = signatures.len(), "Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Build a `Stripe-Signature` header for `payload`, as Stripe would send it
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// The subset of a Stripe event this service reads
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// Stripe event types with ledger effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEventType {
    CheckoutSessionCompleted,
    InvoicePaymentSucceeded,
    CustomerSubscriptionDeleted,
    Other(String),
}

impl From<&str> for StripeEventType {
    fn from(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Ledger change requested by a verified event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WebhookAction {
    GrantCurrency {
        user_id: String,
        amount: i64,
        package_id: String,
    },
    LinkCustomer {
        customer_ref: String,
        user_id: String,
        tier: Option<String>,
    },
    ActivateSubscription {
        customer_ref: String,
        user_id: Option<String>,
        tier: Option<String>,
    },
    DeactivateSubscription {
        customer_ref: String,
        user_id: Option<String>,
    },
}

/// Outcome reported back to Stripe
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub success: bool,
    pub event_id: String,
    pub event_type: String,
    pub action: Option<WebhookAction>,
    pub duplicate: bool,
}

/// Map an event to the ledger action it requests.
///
/// `Ok(None)` means the event is acknowledged without any ledger change:
/// either the type is not handled or it lacks the fields the action needs.
pub fn classify(envelope: &WebhookEnvelope) -> BillingResult<Option<WebhookAction>> {
    let object = &envelope.data.object;
    let meta = event_metadata(object);

    match StripeEventType::from(envelope.event_type.as_str()) {
        StripeEventType::CheckoutSessionCompleted => classify_checkout(envelope, object, &meta),
        StripeEventType::InvoicePaymentSucceeded => {
            let Some(customer_ref) = customer_ref(object) else {
                tracing::warn!(event_id = %envelope.id, "Invoice event without customer");
                return Ok(None);
            };
            Ok(Some(WebhookAction::ActivateSubscription {
                customer_ref,
                user_id: non_empty(&meta, metadata::USER_ID),
                tier: non_empty(&meta, metadata::PACKAGE_ID),
            }))
        }
        StripeEventType::CustomerSubscriptionDeleted => {
            let Some(customer_ref) = customer_ref(object) else {
                tracing::warn!(event_id = %envelope.id, "Subscription event without customer");
                return Ok(None);
            };
            Ok(Some(WebhookAction::DeactivateSubscription {
                customer_ref,
                user_id: non_empty(&meta, metadata::USER_ID),
            }))
        }
        StripeEventType::Other(event_type) => {
            tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
            Ok(None)
        }
    }
}

fn classify_checkout(
    envelope: &WebhookEnvelope,
    object: &Value,
    meta: &HashMap<String, String>,
) -> BillingResult<Option<WebhookAction>> {
    let Some(user_id) = non_empty(meta, metadata::USER_ID) else {
        tracing::warn!(event_id = %envelope.id, "Checkout completed without user_id metadata");
        return Ok(None);
    };
    let package_id = non_empty(meta, metadata::PACKAGE_ID);

    match meta.get(metadata::KIND).map(String::as_str) {
        Some(metadata::KIND_CURRENCY) => {
            let (Some(package_id), Some(raw_amount)) =
                (package_id, non_empty(meta, metadata::AMOUNT))
            else {
                tracing::warn!(event_id = %envelope.id, "Currency checkout missing package or amount");
                return Ok(None);
            };
            let amount: i64 = raw_amount.parse().map_err(|_| {
                BillingError::InvalidInput(format!("invalid currency amount '{}'", raw_amount))
            })?;
            if amount <= 0 {
                return Err(BillingError::InvalidInput(format!(
                    "currency amount must be positive, got {}",
                    amount
                )));
            }
            Ok(Some(WebhookAction::GrantCurrency {
                user_id,
                amount,
                package_id,
            }))
        }
        Some(metadata::KIND_SUBSCRIPTION) => match customer_ref(object) {
            Some(customer_ref) => Ok(Some(WebhookAction::LinkCustomer {
                customer_ref,
                user_id,
                tier: package_id,
            })),
            None => {
                tracing::warn!(event_id = %envelope.id, "Subscription checkout without customer");
                Ok(None)
            }
        },
        other => {
            tracing::warn!(event_id = %envelope.id, kind = ?other, "Checkout completed with unknown kind");
            Ok(None)
        }
    }
}

/// String metadata from the event object; invoices carry it on `subscription_details`
fn event_metadata(object: &Value) -> HashMap<String, String> {
    let candidates = [
        object.get("metadata"),
        object
            .get("subscription_details")
            .and_then(|details| details.get("metadata")),
    ];

    let mut merged = HashMap::new();
    for map in candidates.into_iter().flatten().filter_map(Value::as_object) {
        for (key, value) in map {
            if let Some(text) = value.as_str() {
                merged.entry(key.clone()).or_insert_with(|| text.to_string());
            }
        }
    }
    merged
}

/// `customer` is either an id string or an expanded object
fn customer_ref(object: &Value) -> Option<String> {
    let customer = object.get("customer")?;
    customer
        .as_str()
        .or_else(|| customer.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn non_empty(meta: &HashMap<String, String>, key: &str) -> Option<String> {
    meta.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    webhook_secret: String,
    reconciler: EntitlementReconciler,
}

impl WebhookHandler {
    pub fn new(webhook_secret: impl Into<String>, reconciler: EntitlementReconciler) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            reconciler,
        }
    }

    /// Verify the signature and parse the event envelope
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEnvelope> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;

        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })
    }

    /// Verify, classify, deduplicate and reconcile one delivery
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> BillingResult<ReconciliationResult> {
        let envelope = self.verify_event(payload, signature)?;
        let action = classify(&envelope)?;

        let mut result = ReconciliationResult {
            success: true,
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            action: action.clone(),
            duplicate: false,
        };

        let Some(action) = action else {
            tracing::info!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Webhook acknowledged without ledger changes"
            );
            return Ok(result);
        };

        let ledger = self.reconciler.ledger();
        match ledger
            .claim_event(&envelope.id, &envelope.event_type)
            .await?
        {
            EventClaim::Claimed => {}
            EventClaim::AlreadyProcessed => {
                tracing::info!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "Duplicate webhook event"
                );
                result.duplicate = true;
                return Ok(result);
            }
            EventClaim::InProgress => {
                // Not acknowledged, so Stripe redelivers once the claim settles or expires
                tracing::warn!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "Webhook event already being processed"
                );
                return Err(BillingError::EventInProgress(envelope.id.clone()));
            }
        }

        tracing::info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Processing Stripe webhook event"
        );

        let outcome = self.apply(&envelope.id, &action).await;

        // Successful grants record the outcome in their own transaction. A
        // grant that lost its claim must not touch the other delivery's row.
        let recorded = match &outcome {
            Ok(()) => matches!(action, WebhookAction::GrantCurrency { .. }),
            Err(BillingError::EventInProgress(_)) => true,
            Err(_) => false,
        };
        if !recorded {
            let error_message = outcome.as_ref().err().map(|e| e.to_string());
            if let Err(e) = ledger
                .finish_event(&envelope.id, error_message.as_deref())
                .await
            {
                tracing::error!(
                    event_id = %envelope.id,
                    error = %e,
                    "Failed to record webhook outcome"
                );
            }
        }

        outcome.map_err(|e| {
            tracing::error!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                error = %e,
                retryable = e.is_retryable(),
                "Webhook reconciliation failed"
            );
            e
        })?;

        Ok(result)
    }

    async fn apply(&self, event_id: &str, action: &WebhookAction) -> BillingResult<()> {
        match action {
            WebhookAction::GrantCurrency {
                user_id,
                amount,
                package_id,
            } => {
                self.reconciler
                    .grant_currency_for_event(event_id, user_id, *amount, package_id)
                    .await?;
            }
            WebhookAction::LinkCustomer {
                customer_ref,
                user_id,
                tier,
            } => {
                self.reconciler
                    .link_customer(customer_ref, user_id, tier.as_deref())
                    .await?;
            }
            WebhookAction::ActivateSubscription {
                customer_ref,
                user_id,
                tier,
            } => {
                self.reconciler
                    .activate_subscription(customer_ref, user_id.as_deref(), tier.as_deref())
                    .await?;
            }
            WebhookAction::DeactivateSubscription {
                customer_ref,
                user_id,
            } => {
                self.reconciler
                    .deactivate_subscription(customer_ref, user_id.as_deref())
                    .await?;
            }
        }
        Ok(())
    }
}
