//! Webhook ingestion pipeline
//!
//! Verification, normalization, replay filtering, idempotency and dispatch
//! for inbound billing notifications. The sequence is fixed: nothing parses
//! an unauthenticated body, and a stale replayed duplicate is reported as
//! "too old", never as "duplicate".

use std::sync::Arc;

use time::OffsetDateTime;

use crate::credits::{require_pack_credits, CreditReason};
use crate::error::{BillingError, BillingResult};
use crate::events::{CanonicalEvent, EventNormalizer, OneTimePaymentEvent};
use crate::replay::{event_age_ms, is_timestamp_valid};
use crate::signature::SignatureVerifier;
use crate::store::{CreditStore, NewLedgerEntry, ProcessedEventStore};
use crate::subscriptions::SubscriptionService;

/// Terminal disposition of one webhook delivery.
///
/// Everything here is acknowledged with 200 upstream; only errors that can
/// plausibly be fixed by provider redelivery surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event authenticated, fresh, first-seen, and applied.
    Processed,
    /// Idempotency guard saw the event id before. Safe no-op.
    Duplicate,
    /// Origination time outside the replay window. Not processed and not
    /// re-attempted by this service.
    Stale,
    /// Well-formed event of a kind this engine has no handler for.
    /// Acknowledged, per the provider's delivery contract.
    Ignored,
    /// Structurally invalid forever (missing userId, unknown or missing
    /// pack). Acknowledged so the provider's retry loop stops; flagged in
    /// the logs for operators.
    Discarded { reason: String },
}

impl WebhookOutcome {
    pub fn reason(&self) -> &str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Stale => "too_old",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Discarded { reason } => reason,
        }
    }
}

/// Webhook handler for billing-provider events.
///
/// Constructed once at process startup with its provider adapter and stores
/// passed in explicitly; there is no module-level singleton.
pub struct WebhookHandler {
    verifier: SignatureVerifier,
    normalizer: Arc<dyn EventNormalizer>,
    processed_events: Arc<dyn ProcessedEventStore>,
    subscriptions: SubscriptionService,
    credits: Arc<dyn CreditStore>,
}

impl WebhookHandler {
    pub fn new(
        verifier: SignatureVerifier,
        normalizer: Arc<dyn EventNormalizer>,
        processed_events: Arc<dyn ProcessedEventStore>,
        subscriptions: SubscriptionService,
        credits: Arc<dyn CreditStore>,
    ) -> Self {
        Self {
            verifier,
            normalizer,
            processed_events,
            subscriptions,
            credits,
        }
    }

    /// Run one raw delivery through the full pipeline.
    ///
    /// `Err(WebhookSignatureInvalid)` is the only authentication failure;
    /// callers map it to 401 with no state touched. Store failures bubble as
    /// `Err` for a 500 so the provider redelivers.
    pub async fn handle(
        &self,
        body: &[u8],
        signature_header: &str,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        // 1. Authenticate before anything parses the body.
        self.verifier.verify(body, signature_header)?;

        // 2. Normalize into the canonical shape.
        let event = match self.normalizer.normalize(body) {
            Ok(event) => event,
            // An authenticated provider never sends an unparseable body;
            // report it the same way as a bad signature.
            Err(BillingError::InvalidPayload(detail)) => {
                tracing::warn!(
                    provider = self.normalizer.provider(),
                    detail = %detail,
                    "Webhook payload failed schema parsing"
                );
                return Err(BillingError::WebhookSignatureInvalid);
            }
            Err(BillingError::UnsupportedEvent(kind)) => {
                // Track which event kinds arrive without a handler
                tracing::info!(
                    provider = self.normalizer.provider(),
                    event_type = %kind,
                    "Received unhandled event type - acknowledged without processing"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            // Missing userId / packId: redelivery can never fix these.
            // Acknowledge and flag instead of inviting a retry storm.
            Err(e @ (BillingError::MissingUserId | BillingError::MissingPackId)) => {
                tracing::error!(
                    provider = self.normalizer.provider(),
                    error = %e,
                    "Discarding webhook payload that can never become valid"
                );
                return Ok(WebhookOutcome::Discarded {
                    reason: discard_reason(&e),
                });
            }
            Err(e) => return Err(e),
        };

        // 3. Replay window, before the idempotency check.
        if !is_timestamp_valid(event.occurred_at(), now) {
            let age_ms = event
                .occurred_at()
                .map(|ts| event_age_ms(ts, now))
                .unwrap_or_default();
            tracing::warn!(
                event_id = event.event_id().unwrap_or("<none>"),
                event_kind = event.kind_str(),
                age_ms = %age_ms,
                "Webhook event too old - rejected by replay window"
            );
            return Ok(WebhookOutcome::Stale);
        }

        // 4. Idempotency guard. Legacy events without an id bypass it.
        if let Some(event_id) = event.event_id() {
            if !self.processed_events.mark_processed(event_id).await? {
                tracing::info!(
                    event_id = %event_id,
                    event_kind = event.kind_str(),
                    "Duplicate webhook event - no further mutation"
                );
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        tracing::info!(
            event_id = event.event_id().unwrap_or("<none>"),
            event_kind = event.kind_str(),
            "Processing webhook event"
        );

        // 5. Dispatch over the closed event set.
        let applied = match &event {
            CanonicalEvent::Subscription(sub) => {
                self.subscriptions
                    .apply(self.normalizer.provider(), sub, now)
                    .await
            }
            CanonicalEvent::OneTimePayment(payment) => self.apply_one_time(payment).await,
        };

        match applied {
            Ok(()) => Ok(WebhookOutcome::Processed),
            // Unknown pack or an invariant-violating payload: forever
            // invalid, so acknowledge and flag rather than 500.
            Err(
                e @ (BillingError::UnknownCreditPack(_) | BillingError::InvalidPayload(_)),
            ) => {
                tracing::error!(
                    event_id = event.event_id().unwrap_or("<none>"),
                    error = %e,
                    "Discarding webhook event that can never become valid"
                );
                Ok(WebhookOutcome::Discarded {
                    reason: discard_reason(&e),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Credit-pack purchase: validate against the fixed catalog and append a
    /// purchase entry to the ledger.
    async fn apply_one_time(&self, payment: &OneTimePaymentEvent) -> BillingResult<()> {
        let credits = require_pack_credits(&payment.pack_id)?;

        self.credits
            .append(&NewLedgerEntry {
                user_id: payment.user_id.clone(),
                delta: credits,
                reason: CreditReason::Purchase,
                memo: format!("Credit pack purchase: {}", payment.pack_id),
                external_ref: payment.transaction_id.clone(),
            })
            .await?;

        tracing::info!(
            user_id = %payment.user_id,
            pack_id = %payment.pack_id,
            credits = credits,
            "Credit pack purchase applied"
        );

        Ok(())
    }
}

fn discard_reason(err: &BillingError) -> String {
    match err {
        BillingError::MissingUserId => "missing_user_id".to_string(),
        BillingError::MissingPackId => "missing_pack_id".to_string(),
        BillingError::UnknownCreditPack(_) => "unknown_credit_pack".to_string(),
        BillingError::InvalidPayload(_) => "invalid_payload".to_string(),
        other => other.to_string(),
    }
}
