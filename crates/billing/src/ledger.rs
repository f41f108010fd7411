//! User ledger storage
//!
//! Per-user coin balances and premium flags, the Stripe customer links used to
//! resolve subscription events, and the processed-event table used for
//! webhook deduplication. Every mutation is a single atomic operation at the
//! storage layer so concurrent webhook deliveries never lose an update.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{BillingError, BillingResult};

/// Durable balance and subscription state of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LedgerRecord {
    pub user_id: String,
    pub currency_balance: i64,
    /// Audit counter, never decreases
    pub total_currency_earned: i64,
    pub subscription_active: bool,
    pub subscription_tier: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl LedgerRecord {
    /// Zero record returned for users who have never purchased anything
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            currency_balance: 0,
            total_currency_earned: 0,
            subscription_active: false,
            subscription_tier: None,
            last_updated: OffsetDateTime::now_utc(),
        }
    }
}

/// Stripe customer to internal user mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CustomerLink {
    pub customer_ref: String,
    pub user_id: String,
    pub tier: Option<String>,
}

/// Outcome of trying to claim a webhook event for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    /// This delivery owns processing
    Claimed,
    /// Already reconciled successfully
    AlreadyProcessed,
    /// Another delivery is processing it right now
    InProgress,
}

/// Storage for ledger records, customer links and processed webhook events
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_record(&self, user_id: &str) -> BillingResult<Option<LedgerRecord>>;

    /// Atomically add `amount` to balance and lifetime earnings, creating the record if absent
    async fn add_currency(&self, user_id: &str, amount: i64) -> BillingResult<LedgerRecord>;

    async fn set_subscription(
        &self,
        user_id: &str,
        active: bool,
        tier: Option<&str>,
    ) -> BillingResult<LedgerRecord>;

    async fn link_customer(&self, link: &CustomerLink) -> BillingResult<()>;

    async fn find_customer(&self, customer_ref: &str) -> BillingResult<Option<CustomerLink>>;

    /// Claim exclusive processing of a webhook event id.
    /// Events that previously failed may be claimed again.
    async fn claim_event(&self, event_id: &str, event_type: &str) -> BillingResult<EventClaim>;

    /// Record the outcome of a claimed event; `error` is `None` on success
    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()>;

    /// Grant currency for a claimed event and mark the event processed, all or nothing.
    ///
    /// Fails with [`BillingError::EventInProgress`] and grants nothing when
    /// `event_id` is not currently claimed.
    async fn add_currency_for_event(
        &self,
        event_id: &str,
        user_id: &str,
        amount: i64,
    ) -> BillingResult<LedgerRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventStatus {
    Processing,
    Success,
    Error(String),
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, LedgerRecord>,
    customers: HashMap<String, CustomerLink>,
    events: HashMap<String, EventStatus>,
}

impl MemoryState {
    fn add_currency(&mut self, user_id: &str, amount: i64) -> BillingResult<LedgerRecord> {
        if amount < 0 {
            return Err(BillingError::InvalidInput(format!(
                "cannot grant negative amount {}",
                amount
            )));
        }

        let record = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| LedgerRecord::empty(user_id));

        record.currency_balance = record
            .currency_balance
            .checked_add(amount)
            .ok_or_else(|| BillingError::Database("currency balance overflow".to_string()))?;
        record.total_currency_earned = record.total_currency_earned.saturating_add(amount);
        record.last_updated = OffsetDateTime::now_utc();

        Ok(record.clone())
    }
}

/// Ledger kept in process memory, for development and tests
///
/// One mutex guards all state, so each operation is atomic.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<MemoryState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of webhook events ever claimed
    pub async fn claimed_event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_record(&self, user_id: &str) -> BillingResult<Option<LedgerRecord>> {
        Ok(self.state.lock().await.records.get(user_id).cloned())
    }

    async fn add_currency(&self, user_id: &str, amount: i64) -> BillingResult<LedgerRecord> {
        self.state.lock().await.add_currency(user_id, amount)
    }

    async fn set_subscription(
        &self,
        user_id: &str,
        active: bool,
        tier: Option<&str>,
    ) -> BillingResult<LedgerRecord> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| LedgerRecord::empty(user_id));

        record.subscription_active = active;
        record.subscription_tier = tier.map(str::to_string);
        record.last_updated = OffsetDateTime::now_utc();

        Ok(record.clone())
    }

    async fn link_customer(&self, link: &CustomerLink) -> BillingResult<()> {
        self.state
            .lock()
            .await
            .customers
            .insert(link.customer_ref.clone(), link.clone());
        Ok(())
    }

    async fn find_customer(&self, customer_ref: &str) -> BillingResult<Option<CustomerLink>> {
        Ok(self.state.lock().await.customers.get(customer_ref).cloned())
    }

    async fn claim_event(&self, event_id: &str, _event_type: &str) -> BillingResult<EventClaim> {
        let mut state = self.state.lock().await;
        match state.events.get(event_id) {
            Some(EventStatus::Success) => Ok(EventClaim::AlreadyProcessed),
            Some(EventStatus::Processing) => Ok(EventClaim::InProgress),
            Some(EventStatus::Error(_)) | None => {
                state
                    .events
                    .insert(event_id.to_string(), EventStatus::Processing);
                Ok(EventClaim::Claimed)
            }
        }
    }

    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()> {
        let status = match error {
            None => EventStatus::Success,
            Some(message) => EventStatus::Error(message.to_string()),
        };
        self.state
            .lock()
            .await
            .events
            .insert(event_id.to_string(), status);
        Ok(())
    }

    async fn add_currency_for_event(
        &self,
        event_id: &str,
        user_id: &str,
        amount: i64,
    ) -> BillingResult<LedgerRecord> {
        let mut state = self.state.lock().await;
        if state.events.get(event_id) != Some(&EventStatus::Processing) {
            return Err(BillingError::EventInProgress(event_id.to_string()));
        }

        let record = state.add_currency(user_id, amount)?;
        state
            .events
            .insert(event_id.to_string(), EventStatus::Success);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_currency_creates_record() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.get_record("u1").await.unwrap().is_none());

        let record = ledger.add_currency("u1", 500).await.unwrap();
        assert_eq!(record.currency_balance, 500);
        assert_eq!(record.total_currency_earned, 500);
        assert!(!record.subscription_active);
    }

    #[tokio::test]
    async fn test_add_currency_accumulates() {
        let ledger = InMemoryLedger::new();
        ledger.add_currency("u1", 500).await.unwrap();
        let record = ledger.add_currency("u1", 1200).await.unwrap();
        assert_eq!(record.currency_balance, 1700);
        assert_eq!(record.total_currency_earned, 1700);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_grants_are_not_lost() {
        let ledger = std::sync::Arc::new(InMemoryLedger::new());
        let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for amount in [500_i64, 1200] {
            let ledger = ledger.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                ledger.add_currency("u1", amount).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = ledger.get_record("u1").await.unwrap().unwrap();
        assert_eq!(record.currency_balance, 1700);
        assert_eq!(record.total_currency_earned, 1700);
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.add_currency("u1", -5).await.is_err());
        assert!(ledger.get_record("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_flag_keeps_balance() {
        let ledger = InMemoryLedger::new();
        ledger.add_currency("u1", 500).await.unwrap();

        let record = ledger
            .set_subscription("u1", true, Some("premium_monthly"))
            .await
            .unwrap();
        assert!(record.subscription_active);
        assert_eq!(record.subscription_tier.as_deref(), Some("premium_monthly"));
        assert_eq!(record.currency_balance, 500);

        let record = ledger.set_subscription("u1", false, None).await.unwrap();
        assert!(!record.subscription_active);
        assert!(record.subscription_tier.is_none());
    }

    #[tokio::test]
    async fn test_event_claim_lifecycle() {
        let ledger = InMemoryLedger::new();

        assert_eq!(
            ledger.claim_event("evt_1", "invoice.payment_succeeded").await.unwrap(),
            EventClaim::Claimed
        );
        assert_eq!(
            ledger.claim_event("evt_1", "invoice.payment_succeeded").await.unwrap(),
            EventClaim::InProgress
        );

        ledger.finish_event("evt_1", Some("db down")).await.unwrap();
        assert_eq!(
            ledger.claim_event("evt_1", "invoice.payment_succeeded").await.unwrap(),
            EventClaim::Claimed,
            "failed events can be retried"
        );

        ledger.finish_event("evt_1", None).await.unwrap();
        assert_eq!(
            ledger.claim_event("evt_1", "invoice.payment_succeeded").await.unwrap(),
            EventClaim::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_event_grant_commits_with_outcome() {
        let ledger = InMemoryLedger::new();
        ledger
            .claim_event("evt_grant", "checkout.session.completed")
            .await
            .unwrap();

        let record = ledger
            .add_currency_for_event("evt_grant", "u1", 500)
            .await
            .unwrap();
        assert_eq!(record.currency_balance, 500);
        assert_eq!(
            ledger
                .claim_event("evt_grant", "checkout.session.completed")
                .await
                .unwrap(),
            EventClaim::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_event_grant_requires_claim() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.add_currency_for_event("evt_unclaimed", "u1", 500).await,
            Err(BillingError::EventInProgress(_))
        ));

        ledger
            .claim_event("evt_done", "checkout.session.completed")
            .await
            .unwrap();
        ledger.finish_event("evt_done", None).await.unwrap();
        assert!(ledger
            .add_currency_for_event("evt_done", "u1", 500)
            .await
            .is_err());
        assert!(ledger.get_record("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_event_grant_leaves_claim_open() {
        let ledger = InMemoryLedger::new();
        ledger
            .claim_event("evt_neg", "checkout.session.completed")
            .await
            .unwrap();
        assert!(ledger
            .add_currency_for_event("evt_neg", "u1", -5)
            .await
            .is_err());
        assert_eq!(
            ledger
                .claim_event("evt_neg", "checkout.session.completed")
                .await
                .unwrap(),
            EventClaim::InProgress
        );
    }

    #[tokio::test]
    async fn test_customer_links() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.find_customer("cus_1").await.unwrap().is_none());

        let link = CustomerLink {
            customer_ref: "cus_1".to_string(),
            user_id: "u1".to_string(),
            tier: Some("premium_yearly".to_string()),
        };
        ledger.link_customer(&link).await.unwrap();
        assert_eq!(ledger.find_customer("cus_1").await.unwrap(), Some(link));
    }
}
