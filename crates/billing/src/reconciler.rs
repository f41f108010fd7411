//! Entitlement reconciliation
//!
//! Applies verified webhook outcomes to the user ledger: coin grants for
//! currency bundles and the premium flag for subscriptions.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{CustomerLink, LedgerRecord, LedgerStore};

/// Tier recorded when a subscription is activated without a known package
pub const DEFAULT_SUBSCRIPTION_TIER: &str = "premium";

/// Mutates ledger records in response to verified payment events
#[derive(Clone)]
pub struct EntitlementReconciler {
    ledger: Arc<dyn LedgerStore>,
}

impl EntitlementReconciler {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Credit `amount` coins to `user_id`
    pub async fn grant_currency(
        &self,
        user_id: &str,
        amount: i64,
        package_id: &str,
    ) -> BillingResult<LedgerRecord> {
        check_grant(user_id, amount)?;

        let record = self.ledger.add_currency(user_id, amount).await?;
        log_grant(user_id, package_id, amount, &record);

        Ok(record)
    }

    /// Credit coins for a claimed webhook event, marking the event processed in
    /// the same atomic write
    pub async fn grant_currency_for_event(
        &self,
        event_id: &str,
        user_id: &str,
        amount: i64,
        package_id: &str,
    ) -> BillingResult<LedgerRecord> {
        check_grant(user_id, amount)?;

        let record = self
            .ledger
            .add_currency_for_event(event_id, user_id, amount)
            .await?;
        log_grant(user_id, package_id, amount, &record);

        Ok(record)
    }

    /// Remember which user owns a Stripe customer so later subscription events resolve
    pub async fn link_customer(
        &self,
        customer_ref: &str,
        user_id: &str,
        tier: Option<&str>,
    ) -> BillingResult<()> {
        let link = CustomerLink {
            customer_ref: customer_ref.to_string(),
            user_id: user_id.to_string(),
            tier: tier.map(str::to_string),
        };
        self.ledger.link_customer(&link).await?;

        tracing::info!(
            customer_ref = %customer_ref,
            user_id = %user_id,
            tier = ?tier,
            "Linked Stripe customer"
        );
        Ok(())
    }

    /// Turn the premium flag on for the user behind `customer_ref`
    pub async fn activate_subscription(
        &self,
        customer_ref: &str,
        fallback_user_id: Option<&str>,
        fallback_tier: Option<&str>,
    ) -> BillingResult<LedgerRecord> {
        let link = self.resolve_customer(customer_ref, fallback_user_id).await?;
        let tier = link
            .tier
            .as_deref()
            .or(fallback_tier)
            .unwrap_or(DEFAULT_SUBSCRIPTION_TIER);

        let record = self
            .ledger
            .set_subscription(&link.user_id, true, Some(tier))
            .await?;

        tracing::info!(
            customer_ref = %customer_ref,
            user_id = %link.user_id,
            tier = %tier,
            "Subscription activated"
        );
        Ok(record)
    }

    /// Turn the premium flag off for the user behind `customer_ref`
    pub async fn deactivate_subscription(
        &self,
        customer_ref: &str,
        fallback_user_id: Option<&str>,
    ) -> BillingResult<LedgerRecord> {
        let link = self.resolve_customer(customer_ref, fallback_user_id).await?;

        let record = self
            .ledger
            .set_subscription(&link.user_id, false, None)
            .await?;

        tracing::info!(
            customer_ref = %customer_ref,
            user_id = %link.user_id,
            "Subscription deactivated"
        );
        Ok(record)
    }

    /// Ledger record for `user_id`, or a zero record if the user never purchased
    pub async fn wallet(&self, user_id: &str) -> BillingResult<LedgerRecord> {
        Ok(self
            .ledger
            .get_record(user_id)
            .await?
            .unwrap_or_else(|| LedgerRecord::empty(user_id)))
    }

    async fn resolve_customer(
        &self,
        customer_ref: &str,
        fallback_user_id: Option<&str>,
    ) -> BillingResult<CustomerLink> {
        if let Some(link) = self.ledger.find_customer(customer_ref).await? {
            return Ok(link);
        }

        match fallback_user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(user_id) => Ok(CustomerLink {
                customer_ref: customer_ref.to_string(),
                user_id: user_id.to_string(),
                tier: None,
            }),
            None => {
                tracing::warn!(
                    customer_ref = %customer_ref,
                    "No user linked to Stripe customer"
                );
                Err(BillingError::CustomerNotLinked(customer_ref.to_string()))
            }
        }
    }
}

fn check_grant(user_id: &str, amount: i64) -> BillingResult<()> {
    if user_id.trim().is_empty() {
        return Err(BillingError::InvalidInput(
            "user_id is required to grant currency".to_string(),
        ));
    }
    if amount <= 0 {
        return Err(BillingError::InvalidInput(format!(
            "grant amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn log_grant(user_id: &str, package_id: &str, amount: i64, record: &LedgerRecord) {
    tracing::info!(
        user_id = %user_id,
        package_id = %package_id,
        amount,
        new_balance = record.currency_balance,
        "Granted currency"
    );
}
