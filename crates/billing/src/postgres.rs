//! Postgres store implementations
//!
//! Atomicity comes from the database: `INSERT .. ON CONFLICT` claims and
//! upserts-by-unique-key are the only coordination between handler instances.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{BillingCycle, SubscriptionStatus};
use crate::store::{
    CreditStore, NewLedgerEntry, ProcessedEventStore, SubscriptionRecord, SubscriptionStore,
    UserSettingsStore,
};
use crate::tier::Tier;

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn upsert(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, provider, provider_subscription_id, provider_customer_id,
                status, billing_cycle, current_period_start, current_period_end,
                cancel_at_period_end, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (provider, provider_subscription_id) DO UPDATE SET
                status = EXCLUDED.status,
                billing_cycle = EXCLUDED.billing_cycle,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                provider_customer_id = EXCLUDED.provider_customer_id,
                updated_at = NOW()
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.provider)
        .bind(&record.provider_subscription_id)
        .bind(&record.provider_customer_id)
        .bind(record.status.as_str())
        .bind(record.billing_cycle.as_str())
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_provider_id(
        &self,
        provider: &str,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<(
            Uuid,
            String,
            String,
            String,
            String,
            String,
            String,
            Option<OffsetDateTime>,
            Option<OffsetDateTime>,
            bool,
        )> = sqlx::query_as(
            r#"
            SELECT id, user_id, provider, provider_subscription_id, provider_customer_id,
                   status, billing_cycle, current_period_start, current_period_end,
                   cancel_at_period_end
            FROM subscriptions
            WHERE provider = $1 AND provider_subscription_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                id,
                user_id,
                provider,
                provider_subscription_id,
                provider_customer_id,
                status,
                billing_cycle,
                current_period_start,
                current_period_end,
                cancel_at_period_end,
            )| SubscriptionRecord {
                id,
                user_id,
                provider,
                provider_subscription_id,
                provider_customer_id,
                status: SubscriptionStatus::from_str_lossy(&status),
                billing_cycle: BillingCycle::from_str_lossy(&billing_cycle),
                current_period_start,
                current_period_end,
                cancel_at_period_end,
            },
        ))
    }
}

#[derive(Clone)]
pub struct PgProcessedEventStore {
    pool: PgPool,
}

impl PgProcessedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for PgProcessedEventStore {
    async fn mark_processed(&self, event_id: &str) -> BillingResult<bool> {
        // First-writer-wins: the RETURNING row exists only for the insert
        // that claimed the id. Concurrent duplicates serialize here.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO processed_webhook_events (id, event_id, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }
}

#[derive(Clone)]
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    async fn append(&self, entry: &NewLedgerEntry) -> BillingResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO credit_ledger (id, user_id, delta, reason, memo, external_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(id)
        .bind(&entry.user_id)
        .bind(entry.delta)
        .bind(entry.reason.as_str())
        .bind(&entry.memo)
        .bind(&entry.external_ref)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn balance(&self, user_id: &str) -> BillingResult<i64> {
        let (balance,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM credit_ledger WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn set_grant_rate(&self, user_id: &str, credits_per_month: i64) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_credit_grants (user_id, credits_per_month, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                credits_per_month = EXCLUDED.credits_per_month,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(credits_per_month)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgUserSettingsStore {
    pool: PgPool,
}

impl PgUserSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserSettingsStore for PgUserSettingsStore {
    async fn upsert_tier(&self, user_id: &str, tier: Tier) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_billing_settings (user_id, tier, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
