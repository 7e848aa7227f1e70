//! Subscription state machine
//!
//! Applies canonical subscription events to persisted subscription rows and
//! keeps the user-settings tier projection in sync. Ordering across requests
//! is not assumed; the idempotency guard upstream is what makes duplicate
//! deliveries safe.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::credits::{CreditReason, PRO_MONTHLY_CREDITS};
use crate::error::{BillingError, BillingResult};
use crate::events::{SubscriptionEvent, SubscriptionEventKind, SubscriptionStatus};
use crate::store::{
    CreditStore, NewLedgerEntry, SubscriptionRecord, SubscriptionStore, UserSettingsStore,
};
use crate::tier::resolve_tier;

pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    credits: Arc<dyn CreditStore>,
    settings: Arc<dyn UserSettingsStore>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        credits: Arc<dyn CreditStore>,
        settings: Arc<dyn UserSettingsStore>,
    ) -> Self {
        Self {
            subscriptions,
            credits,
            settings,
        }
    }

    /// Apply one canonical subscription event and re-derive the owning
    /// user's tier into the settings projection.
    pub async fn apply(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        validate_period(event)?;

        let record = match event.kind {
            SubscriptionEventKind::Created => Some(self.handle_created(provider, event).await?),
            SubscriptionEventKind::Updated => self.handle_updated(provider, event).await?,
            SubscriptionEventKind::Cancelled => self.handle_cancelled(provider, event).await?,
            SubscriptionEventKind::PaymentSucceeded => {
                self.handle_payment_succeeded(provider, event).await?
            }
            SubscriptionEventKind::PaymentFailed => {
                self.handle_payment_failed(provider, event).await?
            }
        };

        // Tier is recomputed from the stored row, not from the event alone,
        // and persisted to the settings projection. Dropped events (unknown
        // subscription id) leave the projection untouched.
        if let Some(record) = record {
            let tier = resolve_tier(record.status, record.current_period_end, now);
            self.settings.upsert_tier(&record.user_id, tier).await?;

            tracing::info!(
                user_id = %record.user_id,
                subscription_id = %record.provider_subscription_id,
                status = %record.status,
                tier = %tier,
                "Subscription event applied"
            );
        }

        Ok(())
    }

    /// created: insert the row, grant the initial monthly credit allotment,
    /// and record the recurring grant rate for future refreshes.
    async fn handle_created(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<SubscriptionRecord> {
        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id: event.user_id.clone(),
            provider: provider.to_string(),
            provider_subscription_id: event.provider_subscription_id.clone(),
            provider_customer_id: event.provider_customer_id.clone(),
            status: event.status,
            billing_cycle: event.billing_cycle,
            current_period_start: event.current_period_start,
            current_period_end: event.current_period_end,
            cancel_at_period_end: event.cancel_at_period_end,
        };
        self.subscriptions.upsert(&record).await?;

        self.credits
            .append(&NewLedgerEntry {
                user_id: event.user_id.clone(),
                delta: PRO_MONTHLY_CREDITS,
                reason: CreditReason::SubscriptionGrant,
                memo: "Initial subscription credit grant".to_string(),
                external_ref: Some(event.provider_subscription_id.clone()),
            })
            .await?;
        self.credits
            .set_grant_rate(&event.user_id, PRO_MONTHLY_CREDITS)
            .await?;

        Ok(record)
    }

    /// updated: upsert the existing row with the event's status, period and
    /// cancel flag. An unknown subscription id is logged and dropped;
    /// nothing useful can be retried for it.
    async fn handle_updated(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let Some(mut record) = self.find(provider, event).await? else {
            return Ok(None);
        };

        record.status = event.status;
        record.billing_cycle = event.billing_cycle;
        record.current_period_start = event.current_period_start;
        record.current_period_end = event.current_period_end;
        record.cancel_at_period_end = event.cancel_at_period_end;
        if !event.provider_customer_id.is_empty() {
            record.provider_customer_id = event.provider_customer_id.clone();
        }

        self.subscriptions.upsert(&record).await?;
        Ok(Some(record))
    }

    /// cancelled: mark the row cancelled at period end. Access is NOT
    /// revoked here; the tier resolver keeps the user pro until the paid
    /// period elapses.
    async fn handle_cancelled(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let Some(mut record) = self.find(provider, event).await? else {
            return Ok(None);
        };

        record.status = SubscriptionStatus::Cancelled;
        record.cancel_at_period_end = true;

        self.subscriptions.upsert(&record).await?;
        Ok(Some(record))
    }

    /// payment_succeeded: back to active, period bounds refreshed to the new
    /// billing period when the event carries them.
    async fn handle_payment_succeeded(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let Some(mut record) = self.find(provider, event).await? else {
            return Ok(None);
        };

        record.status = SubscriptionStatus::Active;
        if event.current_period_start.is_some() {
            record.current_period_start = event.current_period_start;
        }
        if event.current_period_end.is_some() {
            record.current_period_end = event.current_period_end;
        }

        self.subscriptions.upsert(&record).await?;
        Ok(Some(record))
    }

    /// payment_failed: past_due, period bounds untouched.
    async fn handle_payment_failed(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let Some(mut record) = self.find(provider, event).await? else {
            return Ok(None);
        };

        record.status = SubscriptionStatus::PastDue;

        self.subscriptions.upsert(&record).await?;
        Ok(Some(record))
    }

    async fn find(
        &self,
        provider: &str,
        event: &SubscriptionEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let found = self
            .subscriptions
            .find_by_provider_id(provider, &event.provider_subscription_id)
            .await?;

        if found.is_none() {
            tracing::warn!(
                subscription_id = %event.provider_subscription_id,
                event_kind = %event.kind,
                "Subscription not found for event - dropping"
            );
        }

        Ok(found)
    }
}

/// Data-model invariant: period_end >= period_start when both are present.
fn validate_period(event: &SubscriptionEvent) -> BillingResult<()> {
    if let (Some(start), Some(end)) = (event.current_period_start, event.current_period_end) {
        if end < start {
            return Err(BillingError::InvalidPayload(format!(
                "period_end {end} precedes period_start {start}"
            )));
        }
    }
    Ok(())
}
