//! PostgreSQL ledger store

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{CustomerLink, EventClaim, LedgerRecord, LedgerStore};

/// Events stuck in "processing" longer than this may be claimed again
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

const RECORD_COLUMNS: &str = "user_id, currency_balance, total_currency_earned, \
     subscription_active, subscription_tier, last_updated";

fn grant_sql() -> String {
    format!(
        r#"
        INSERT INTO user_ledger (user_id, currency_balance, total_currency_earned, last_updated)
        VALUES ($1, $2, $2, NOW())
        ON CONFLICT (user_id) DO UPDATE SET
            currency_balance = user_ledger.currency_balance + EXCLUDED.currency_balance,
            total_currency_earned = user_ledger.total_currency_earned + EXCLUDED.total_currency_earned,
            last_updated = NOW()
        RETURNING {}
        "#,
        RECORD_COLUMNS
    )
}

fn check_grant_amount(amount: i64) -> BillingResult<()> {
    if amount < 0 {
        return Err(BillingError::InvalidInput(format!(
            "cannot grant negative amount {}",
            amount
        )));
    }
    Ok(())
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> BillingResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Database pool created");
    Ok(pool)
}

/// Apply the ledger schema migrations
pub async fn run_migrations(pool: &PgPool) -> BillingResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Ledger migrations applied");
    Ok(())
}

/// Ledger store backed by PostgreSQL.
///
/// Balance changes are single-statement upserts, so concurrent grants for the
/// same user serialize on the row lock instead of racing a read-modify-write.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_record(&self, user_id: &str) -> BillingResult<Option<LedgerRecord>> {
        let record = sqlx::query_as::<_, LedgerRecord>(&format!(
            "SELECT {} FROM user_ledger WHERE user_id = $1",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn add_currency(&self, user_id: &str, amount: i64) -> BillingResult<LedgerRecord> {
        check_grant_amount(amount)?;

        let record = sqlx::query_as::<_, LedgerRecord>(&grant_sql())
            .bind(user_id)
            .bind(amount)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, amount, error = %e, "Failed to grant currency");
                BillingError::Database(e.to_string())
            })?;

        Ok(record)
    }

    async fn set_subscription(
        &self,
        user_id: &str,
        active: bool,
        tier: Option<&str>,
    ) -> BillingResult<LedgerRecord> {
        let record = sqlx::query_as::<_, LedgerRecord>(&format!(
            r#"
            INSERT INTO user_ledger (user_id, subscription_active, subscription_tier, last_updated)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                subscription_active = EXCLUDED.subscription_active,
                subscription_tier = EXCLUDED.subscription_tier,
                last_updated = NOW()
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(active)
        .bind(tier)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user_id, active, error = %e, "Failed to update subscription flag");
            BillingError::Database(e.to_string())
        })?;

        Ok(record)
    }

    async fn link_customer(&self, link: &CustomerLink) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customer_links (customer_ref, user_id, tier)
            VALUES ($1, $2, $3)
            ON CONFLICT (customer_ref) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                tier = EXCLUDED.tier
            "#,
        )
        .bind(&link.customer_ref)
        .bind(&link.user_id)
        .bind(&link.tier)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_customer(&self, customer_ref: &str) -> BillingResult<Option<CustomerLink>> {
        let link = sqlx::query_as::<_, CustomerLink>(
            "SELECT customer_ref, user_id, tier FROM customer_links WHERE customer_ref = $1",
        )
        .bind(customer_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn claim_event(&self, event_id: &str, event_type: &str) -> BillingResult<EventClaim> {
        // Only one concurrent delivery gets a row back. Failed events and
        // events stuck in processing past the timeout can be reclaimed.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (event_id, event_type, status, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE webhook_events.status = 'error'
               OR (webhook_events.status = 'processing'
                   AND webhook_events.processing_started_at < NOW() - make_interval(mins => $3))
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(event_id = %event_id, error = %e, "Failed to claim webhook event");
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_some() {
            return Ok(EventClaim::Claimed);
        }

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM webhook_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status {
            Some((status,)) if status == "success" => EventClaim::AlreadyProcessed,
            _ => EventClaim::InProgress,
        })
    }

    async fn finish_event(&self, event_id: &str, error: Option<&str>) -> BillingResult<()> {
        let status = if error.is_some() { "error" } else { "success" };

        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, error_message = $3, processed_at = NOW()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(event_id = %event_id, error = %e, "Failed to record webhook outcome");
            BillingError::Database(e.to_string())
        })?;

        Ok(())
    }

    async fn add_currency_for_event(
        &self,
        event_id: &str,
        user_id: &str,
        amount: i64,
    ) -> BillingResult<LedgerRecord> {
        check_grant_amount(amount)?;

        // Grant and outcome commit together so a crash can neither lose nor repeat the grant
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'success', error_message = NULL, processed_at = NOW()
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(event_id = %event_id, error = %e, "Failed to record webhook outcome");
            BillingError::Database(e.to_string())
        })?;

        if marked.rows_affected() == 0 {
            tracing::warn!(event_id = %event_id, "Webhook event no longer claimed, skipping grant");
            return Err(BillingError::EventInProgress(event_id.to_string()));
        }

        let record = sqlx::query_as::<_, LedgerRecord>(&grant_sql())
            .bind(user_id)
            .bind(amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, amount, error = %e, "Failed to grant currency");
                BillingError::Database(e.to_string())
            })?;

        tx.commit().await?;

        Ok(record)
    }
}
