//! Store ports
//!
//! All cross-request coordination goes through durable stores with atomic
//! check-and-set / upsert-by-unique-key semantics; an in-process structure is
//! insufficient once more than one handler instance exists. The ports keep
//! the pipeline testable with substitute implementations.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::credits::CreditReason;
use crate::error::BillingResult;
use crate::events::{BillingCycle, SubscriptionStatus};
use crate::tier::Tier;

/// A persisted subscription row. At most one live row per
/// (provider, provider_subscription_id); rows are upserted, never deleted.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub provider: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// A new append-only credit ledger entry.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: String,
    pub delta: i64,
    pub reason: CreditReason,
    pub memo: String,
    pub external_ref: Option<String>,
}

/// Subscription rows, keyed by provider subscription id.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or update by (provider, provider_subscription_id).
    async fn upsert(&self, record: &SubscriptionRecord) -> BillingResult<()>;

    async fn find_by_provider_id(
        &self,
        provider: &str,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;
}

/// Durable at-most-once gate keyed by provider event id.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically record `event_id` if absent. Returns true on first claim,
    /// false when the id was already recorded (duplicate delivery).
    async fn mark_processed(&self, event_id: &str) -> BillingResult<bool>;
}

/// Append-only credit ledger plus the recurring grant-rate record.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Append an entry; prior entries are never mutated.
    async fn append(&self, entry: &NewLedgerEntry) -> BillingResult<Uuid>;

    /// Running sum of all deltas for a user. Zero when no entries exist.
    async fn balance(&self, user_id: &str) -> BillingResult<i64>;

    /// Record the recurring monthly grant rate consulted by the scheduled
    /// refresh job.
    async fn set_grant_rate(&self, user_id: &str, credits_per_month: i64) -> BillingResult<()>;
}

/// User-settings projection holding the derived tier.
#[async_trait]
pub trait UserSettingsStore: Send + Sync {
    async fn upsert_tier(&self, user_id: &str, tier: Tier) -> BillingResult<()>;
}
