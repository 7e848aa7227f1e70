//! End-to-end pipeline scenarios
//!
//! Runs the full webhook pipeline (verify -> normalize -> replay filter ->
//! idempotency -> dispatch) against in-memory store substitutes:
//! - Idempotency (ING-I01 to ING-I03)
//! - Replay window (ING-R01 to ING-R03)
//! - Signature / payload rejection (ING-S01 to ING-S03)
//! - Subscription lifecycle (ING-L01 to ING-L05)
//! - Credit packs (ING-C01 to ING-C03)

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};
use crate::events::{EventNormalizer, SubscriptionStatus};
use crate::paddle::PaddleNormalizer;
use crate::signature::SignatureVerifier;
use crate::store::{
    CreditStore, NewLedgerEntry, ProcessedEventStore, SubscriptionRecord, SubscriptionStore,
    UserSettingsStore,
};
use crate::subscriptions::SubscriptionService;
use crate::tier::Tier;
use crate::webhooks::{WebhookHandler, WebhookOutcome};

const SECRET: &str = "whsec_scenario_test";

// ============================================================================
// In-memory store substitutes
// ============================================================================

#[derive(Default)]
struct MemSubscriptionStore {
    rows: Mutex<HashMap<(String, String), SubscriptionRecord>>,
}

#[async_trait]
impl SubscriptionStore for MemSubscriptionStore {
    async fn upsert(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        self.rows.lock().unwrap().insert(
            (
                record.provider.clone(),
                record.provider_subscription_id.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn find_by_provider_id(
        &self,
        provider: &str,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(provider.to_string(), provider_subscription_id.to_string()))
            .cloned())
    }
}

#[derive(Default)]
struct MemProcessedEventStore {
    seen: Mutex<HashSet<String>>,
}

#[async_trait]
impl ProcessedEventStore for MemProcessedEventStore {
    async fn mark_processed(&self, event_id: &str) -> BillingResult<bool> {
        Ok(self.seen.lock().unwrap().insert(event_id.to_string()))
    }
}

#[derive(Default)]
struct MemCreditStore {
    entries: Mutex<Vec<NewLedgerEntry>>,
    rates: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl CreditStore for MemCreditStore {
    async fn append(&self, entry: &NewLedgerEntry) -> BillingResult<uuid::Uuid> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(uuid::Uuid::new_v4())
    }

    async fn balance(&self, user_id: &str) -> BillingResult<i64> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.delta)
            .sum())
    }

    async fn set_grant_rate(&self, user_id: &str, credits_per_month: i64) -> BillingResult<()> {
        self.rates
            .lock()
            .unwrap()
            .insert(user_id.to_string(), credits_per_month);
        Ok(())
    }
}

#[derive(Default)]
struct MemUserSettingsStore {
    tiers: Mutex<HashMap<String, Tier>>,
}

#[async_trait]
impl UserSettingsStore for MemUserSettingsStore {
    async fn upsert_tier(&self, user_id: &str, tier: Tier) -> BillingResult<()> {
        self.tiers.lock().unwrap().insert(user_id.to_string(), tier);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    handler: WebhookHandler,
    subscriptions: Arc<MemSubscriptionStore>,
    processed: Arc<MemProcessedEventStore>,
    credits: Arc<MemCreditStore>,
    settings: Arc<MemUserSettingsStore>,
    now: OffsetDateTime,
}

impl Harness {
    fn new() -> Self {
        let subscriptions = Arc::new(MemSubscriptionStore::default());
        let processed = Arc::new(MemProcessedEventStore::default());
        let credits = Arc::new(MemCreditStore::default());
        let settings = Arc::new(MemUserSettingsStore::default());

        let normalizer: Arc<dyn EventNormalizer> = Arc::new(PaddleNormalizer::new());
        let service = SubscriptionService::new(
            subscriptions.clone(),
            credits.clone(),
            settings.clone(),
        );
        let handler = WebhookHandler::new(
            SignatureVerifier::new(SECRET),
            normalizer,
            processed.clone(),
            service,
            credits.clone(),
        );

        Self {
            handler,
            subscriptions,
            processed,
            credits,
            settings,
            now: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        }
    }

    fn sign(&self, body: &str) -> String {
        let ts = self.now.unix_timestamp().to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(ts.as_bytes());
        mac.update(b":");
        mac.update(body.as_bytes());
        format!("ts={};h1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    async fn deliver(&self, body: &str) -> BillingResult<WebhookOutcome> {
        let signature = self.sign(body);
        self.handler
            .handle(body.as_bytes(), &signature, self.now)
            .await
    }

    fn rfc3339(&self, at: OffsetDateTime) -> String {
        at.format(&Rfc3339).unwrap()
    }

    fn subscription(&self, id: &str) -> Option<SubscriptionRecord> {
        self.subscriptions
            .rows
            .lock()
            .unwrap()
            .get(&("paddle".to_string(), id.to_string()))
            .cloned()
    }

    fn tier_of(&self, user_id: &str) -> Option<Tier> {
        self.settings.tiers.lock().unwrap().get(user_id).copied()
    }

    fn ledger_len(&self) -> usize {
        self.credits.entries.lock().unwrap().len()
    }
}

fn created_body(event_id: Option<&str>, occurred_at: &str, period_end: &str) -> String {
    let event_id_field = match event_id {
        Some(id) => format!(r#""event_id": "{id}","#),
        None => String::new(),
    };
    format!(
        r#"{{
            {event_id_field}
            "event_type": "subscription.created",
            "occurred_at": "{occurred_at}",
            "data": {{
                "id": "sub_abc",
                "customer_id": "ctm_xyz",
                "status": "active",
                "billing_cycle": {{"interval": "month", "frequency": 1}},
                "current_billing_period": {{
                    "starts_at": "{occurred_at}",
                    "ends_at": "{period_end}"
                }},
                "custom_data": {{"userId": "u1"}}
            }}
        }}"#
    )
}

fn lifecycle_body(event_type: &str, event_id: &str, status: &str) -> String {
    format!(
        r#"{{
            "event_id": "{event_id}",
            "event_type": "{event_type}",
            "data": {{
                "id": "sub_abc",
                "customer_id": "ctm_xyz",
                "status": "{status}",
                "custom_data": {{"userId": "u1"}}
            }}
        }}"#
    )
}

// ============================================================================
// ING-I01..I03: idempotency
// ============================================================================
mod idempotency {
    use super::*;

    // ING-I01: first mark returns true, 100 repeats return false
    #[tokio::test]
    async fn first_mark_claims_every_repeat_is_duplicate() {
        let store = MemProcessedEventStore::default();
        assert!(store.mark_processed("evt_123").await.unwrap());
        for i in 0..100 {
            assert!(
                !store.mark_processed("evt_123").await.unwrap(),
                "repeat {i} must report duplicate"
            );
        }
    }

    // ING-I02: same event delivered twice - second is a safe no-op
    #[tokio::test]
    async fn duplicate_delivery_mutates_once() {
        let h = Harness::new();
        let body = created_body(
            Some("evt_123"),
            &h.rfc3339(h.now),
            &h.rfc3339(h.now + Duration::days(30)),
        );

        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
        let entries_after_first = h.ledger_len();
        assert_eq!(entries_after_first, 1, "one grant entry after first delivery");

        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.ledger_len(), entries_after_first, "no second mutation");
    }

    // ING-I03: missing event id bypasses the guard entirely
    #[tokio::test]
    async fn legacy_event_without_id_is_never_deduplicated() {
        let h = Harness::new();
        let body = created_body(
            None,
            &h.rfc3339(h.now),
            &h.rfc3339(h.now + Duration::days(30)),
        );

        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
        assert!(h.processed.seen.lock().unwrap().is_empty());
    }
}

// ============================================================================
// ING-R01..R03: replay window
// ============================================================================
mod replay_window {
    use super::*;

    // ING-R01: six-minute-old event with a valid signature - rejected, state unchanged
    #[tokio::test]
    async fn stale_event_is_rejected_without_mutation() {
        let h = Harness::new();
        let occurred = h.now - Duration::minutes(6);
        let body = created_body(
            Some("evt_old"),
            &h.rfc3339(occurred),
            &h.rfc3339(h.now + Duration::days(30)),
        );

        let outcome = h.deliver(&body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Stale);
        assert_eq!(outcome.reason(), "too_old");
        assert!(h.subscription("sub_abc").is_none());
        assert_eq!(h.ledger_len(), 0);
        // Rejected before the idempotency check: a later fresh redelivery
        // would not be mistaken for a duplicate
        assert!(h.processed.seen.lock().unwrap().is_empty());
    }

    // ING-R02: future-dated event - accepted regardless of magnitude
    #[tokio::test]
    async fn future_timestamp_is_accepted() {
        let h = Harness::new();
        let body = created_body(
            Some("evt_future"),
            &h.rfc3339(h.now + Duration::days(1)),
            &h.rfc3339(h.now + Duration::days(31)),
        );
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
    }

    // ING-R03: event with no occurred_at - accepted unconditionally
    #[tokio::test]
    async fn absent_timestamp_is_accepted() {
        let h = Harness::new();
        let body = lifecycle_body("subscription.updated", "evt_nots", "active");
        // Unknown subscription id: logged and dropped, still acknowledged
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
    }
}

// ============================================================================
// ING-S01..S03: signature / payload rejection
// ============================================================================
mod rejection {
    use super::*;

    // ING-S01: invalid signature - 401 path, no store touched
    #[tokio::test]
    async fn invalid_signature_touches_nothing() {
        let h = Harness::new();
        let body = created_body(
            Some("evt_123"),
            &h.rfc3339(h.now),
            &h.rfc3339(h.now + Duration::days(30)),
        );

        let result = h
            .handler
            .handle(body.as_bytes(), "ts=1700000000;h1=deadbeef", h.now)
            .await;
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        assert!(h.subscription("sub_abc").is_none());
        assert_eq!(h.ledger_len(), 0);
        assert!(h.processed.seen.lock().unwrap().is_empty());
    }

    // ING-S02: authenticated but unparseable body - same invalid-signature path
    #[tokio::test]
    async fn unparseable_payload_reports_invalid_signature() {
        let h = Harness::new();
        let result = h.deliver("{\"not\": \"a paddle event\"}").await;
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        assert!(h.processed.seen.lock().unwrap().is_empty());
    }

    // ING-S03: missing userId - acknowledged and discarded, never retried
    #[tokio::test]
    async fn missing_user_id_is_discarded_not_500() {
        let h = Harness::new();
        let body = r#"{
            "event_id": "evt_nouser",
            "event_type": "subscription.created",
            "data": {"id": "sub_abc", "customer_id": "ctm_xyz", "status": "active"}
        }"#;

        let outcome = h.deliver(body).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Discarded {
                reason: "missing_user_id".to_string()
            }
        );
        assert!(h.subscription("sub_abc").is_none());
    }
}

// ============================================================================
// ING-L01..L05: subscription lifecycle
// ============================================================================
mod lifecycle {
    use super::*;

    async fn create_subscription(h: &Harness) {
        let body = created_body(
            Some("evt_create"),
            &h.rfc3339(h.now),
            &h.rfc3339(h.now + Duration::days(30)),
        );
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
    }

    // ING-L01: created - row inserted, credits granted, rate recorded, tier pro
    #[tokio::test]
    async fn created_grants_credits_and_pro_tier() {
        let h = Harness::new();
        create_subscription(&h).await;

        let record = h.subscription("sub_abc").unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.user_id, "u1");
        assert_eq!(
            h.credits.balance("u1").await.unwrap(),
            crate::credits::PRO_MONTHLY_CREDITS
        );
        assert_eq!(
            h.credits.rates.lock().unwrap().get("u1").copied(),
            Some(crate::credits::PRO_MONTHLY_CREDITS)
        );
        assert_eq!(h.tier_of("u1"), Some(Tier::Pro));
    }

    // ING-L02: cancelled - access persists until period end
    #[tokio::test]
    async fn cancelled_keeps_pro_until_period_end() {
        let h = Harness::new();
        create_subscription(&h).await;

        let body = lifecycle_body("subscription.canceled", "evt_cancel", "canceled");
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);

        let record = h.subscription("sub_abc").unwrap();
        assert_eq!(record.status, SubscriptionStatus::Cancelled);
        assert!(record.cancel_at_period_end);
        // Period end is 30 days out: still pro
        assert_eq!(h.tier_of("u1"), Some(Tier::Pro));
    }

    // ING-L03: payment_failed - past_due, periods untouched
    #[tokio::test]
    async fn payment_failed_marks_past_due_without_period_change() {
        let h = Harness::new();
        create_subscription(&h).await;
        let before = h.subscription("sub_abc").unwrap();

        let body = r#"{
            "event_id": "evt_fail",
            "event_type": "transaction.payment_failed",
            "data": {
                "id": "txn_f",
                "subscription_id": "sub_abc",
                "customer_id": "ctm_xyz",
                "custom_data": {"userId": "u1"}
            }
        }"#;
        assert_eq!(h.deliver(body).await.unwrap(), WebhookOutcome::Processed);

        let record = h.subscription("sub_abc").unwrap();
        assert_eq!(record.status, SubscriptionStatus::PastDue);
        assert_eq!(record.current_period_end, before.current_period_end);
        // Grace: period end still in the future, so tier stays pro
        assert_eq!(h.tier_of("u1"), Some(Tier::Pro));
    }

    // ING-L04: payment_succeeded - back to active with refreshed period bounds
    #[tokio::test]
    async fn payment_succeeded_refreshes_period() {
        let h = Harness::new();
        create_subscription(&h).await;

        let new_start = h.rfc3339(h.now + Duration::days(30));
        let new_end = h.rfc3339(h.now + Duration::days(60));
        let body = format!(
            r#"{{
                "event_id": "evt_pay",
                "event_type": "transaction.completed",
                "data": {{
                    "id": "txn_p",
                    "subscription_id": "sub_abc",
                    "customer_id": "ctm_xyz",
                    "billing_period": {{"starts_at": "{new_start}", "ends_at": "{new_end}"}},
                    "custom_data": {{"userId": "u1"}}
                }}
            }}"#
        );
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);

        let record = h.subscription("sub_abc").unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.current_period_end, Some(h.now + Duration::days(60)));
        // Renewal payment grants no extra credits
        assert_eq!(h.ledger_len(), 1);
    }

    // ING-L05: updated for an unknown subscription - logged and dropped
    #[tokio::test]
    async fn update_for_unknown_subscription_is_dropped() {
        let h = Harness::new();
        let body = lifecycle_body("subscription.updated", "evt_upd", "active");
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
        assert!(h.subscription("sub_abc").is_none());
        assert!(h.tier_of("u1").is_none(), "projection untouched on drop");
    }
}

// ============================================================================
// ING-C01..C03: credit packs
// ============================================================================
mod credit_packs {
    use super::*;

    fn pack_body(event_id: &str, pack_id: &str) -> String {
        format!(
            r#"{{
                "event_id": "{event_id}",
                "event_type": "transaction.completed",
                "data": {{
                    "id": "txn_1",
                    "custom_data": {{"userId": "u1", "type": "credit_pack", "packId": "{pack_id}"}}
                }}
            }}"#
        )
    }

    // ING-C01: pack_75 purchase - balance increases by exactly 75, reason purchase
    #[tokio::test]
    async fn pack_purchase_credits_exact_amount() {
        let h = Harness::new();
        let outcome = h.deliver(&pack_body("evt_p75", "pack_75")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        assert_eq!(h.credits.balance("u1").await.unwrap(), 75);
        let entries = h.credits.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason.as_str(), "purchase");
        assert_eq!(entries[0].external_ref.as_deref(), Some("txn_1"));
    }

    // ING-C02: unknown pack - discarded, balance untouched
    #[tokio::test]
    async fn unknown_pack_is_discarded_without_credit() {
        let h = Harness::new();
        let outcome = h.deliver(&pack_body("evt_bad", "pack_999")).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Discarded {
                reason: "unknown_credit_pack".to_string()
            }
        );
        assert_eq!(h.credits.balance("u1").await.unwrap(), 0);
    }

    // ING-C03: duplicate purchase event - credited once
    #[tokio::test]
    async fn duplicate_purchase_credits_once() {
        let h = Harness::new();
        let body = pack_body("evt_p25", "pack_25");
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(h.deliver(&body).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.credits.balance("u1").await.unwrap(), 25);
    }
}

// ============================================================================
// Unhandled event kinds are acknowledged
// ============================================================================
#[tokio::test]
async fn unhandled_event_kind_is_ignored() {
    let h = Harness::new();
    let body = r#"{"event_type": "customer.updated", "data": {"id": "ctm_1"}}"#;
    assert_eq!(h.deliver(body).await.unwrap(), WebhookOutcome::Ignored);
    assert!(h.processed.seen.lock().unwrap().is_empty());
}
