//! Paddle event normalization
//!
//! Maps Paddle's webhook payloads onto the canonical event model. Parsing is
//! schema-first: each event kind deserializes into an explicit struct and
//! yields either a fully typed canonical event or a typed error.

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingCycle, CanonicalEvent, EventNormalizer, OneTimePaymentEvent, SubscriptionEvent,
    SubscriptionEventKind, SubscriptionStatus,
};

/// Custom-data discriminator marking a transaction as a credit-pack purchase.
const CREDIT_PACK_TYPE: &str = "credit_pack";

/// Outer envelope common to every Paddle notification.
#[derive(Debug, Deserialize)]
struct PaddleEnvelope {
    #[serde(default)]
    event_id: Option<String>,
    event_type: String,
    #[serde(default)]
    occurred_at: Option<String>,
    data: serde_json::Value,
}

/// `data` object for subscription lifecycle events.
#[derive(Debug, Deserialize)]
struct PaddleSubscription {
    id: String,
    customer_id: String,
    status: String,
    #[serde(default)]
    billing_cycle: Option<PaddleBillingCycle>,
    #[serde(default)]
    current_billing_period: Option<PaddleBillingPeriod>,
    #[serde(default)]
    scheduled_change: Option<PaddleScheduledChange>,
    #[serde(default)]
    custom_data: Option<PaddleCustomData>,
}

#[derive(Debug, Deserialize)]
struct PaddleBillingCycle {
    interval: String,
}

#[derive(Debug, Deserialize)]
struct PaddleBillingPeriod {
    #[serde(default)]
    starts_at: Option<String>,
    #[serde(default)]
    ends_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaddleScheduledChange {
    action: String,
}

/// `data` object for transaction events.
#[derive(Debug, Deserialize)]
struct PaddleTransaction {
    id: String,
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    billing_period: Option<PaddleBillingPeriod>,
    #[serde(default)]
    custom_data: Option<PaddleCustomData>,
}

#[derive(Debug, Deserialize)]
struct PaddleCustomData {
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(rename = "packId", default)]
    pack_id: Option<String>,
}

/// Normalizer for Paddle webhook payloads.
#[derive(Debug, Clone, Default)]
pub struct PaddleNormalizer;

impl PaddleNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl EventNormalizer for PaddleNormalizer {
    fn provider(&self) -> &'static str {
        "paddle"
    }

    fn normalize(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let envelope: PaddleEnvelope = serde_json::from_slice(body)
            .map_err(|e| BillingError::InvalidPayload(format!("envelope: {e}")))?;

        let occurred_at = parse_occurred_at(envelope.occurred_at.as_deref())?;

        match envelope.event_type.as_str() {
            "subscription.created" => {
                normalize_subscription(envelope, occurred_at, SubscriptionEventKind::Created)
            }
            // Paddle reports pauses, resumes, trials and dunning through
            // subscription.updated-style events; the canonical status carries
            // the specifics.
            "subscription.updated"
            | "subscription.activated"
            | "subscription.paused"
            | "subscription.resumed"
            | "subscription.trialing"
            | "subscription.past_due" => {
                normalize_subscription(envelope, occurred_at, SubscriptionEventKind::Updated)
            }
            "subscription.canceled" => {
                normalize_subscription(envelope, occurred_at, SubscriptionEventKind::Cancelled)
            }
            "transaction.completed" => normalize_transaction(envelope, occurred_at),
            "transaction.payment_failed" => {
                normalize_payment_failed(envelope, occurred_at)
            }
            other => Err(BillingError::UnsupportedEvent(other.to_string())),
        }
    }
}

fn normalize_subscription(
    envelope: PaddleEnvelope,
    occurred_at: Option<OffsetDateTime>,
    kind: SubscriptionEventKind,
) -> BillingResult<CanonicalEvent> {
    let data: PaddleSubscription = serde_json::from_value(envelope.data)
        .map_err(|e| BillingError::InvalidPayload(format!("subscription data: {e}")))?;

    let user_id = require_user_id(data.custom_data.as_ref())?;

    let (period_start, period_end) = match &data.current_billing_period {
        Some(period) => (
            parse_occurred_at(period.starts_at.as_deref())?,
            parse_occurred_at(period.ends_at.as_deref())?,
        ),
        None => (None, None),
    };

    let cancel_at_period_end = kind == SubscriptionEventKind::Cancelled
        || data
            .scheduled_change
            .as_ref()
            .is_some_and(|change| change.action == "cancel");

    Ok(CanonicalEvent::Subscription(SubscriptionEvent {
        kind,
        event_id: envelope.event_id,
        occurred_at,
        provider_subscription_id: data.id,
        provider_customer_id: data.customer_id,
        status: map_status(&data.status),
        billing_cycle: map_billing_cycle(data.billing_cycle.as_ref()),
        current_period_start: period_start,
        current_period_end: period_end,
        cancel_at_period_end,
        user_id,
    }))
}

/// A completed transaction is either a credit-pack purchase (discriminated
/// by `custom_data.type`) or a recurring subscription payment.
fn normalize_transaction(
    envelope: PaddleEnvelope,
    occurred_at: Option<OffsetDateTime>,
) -> BillingResult<CanonicalEvent> {
    let data: PaddleTransaction = serde_json::from_value(envelope.data)
        .map_err(|e| BillingError::InvalidPayload(format!("transaction data: {e}")))?;

    let user_id = require_user_id(data.custom_data.as_ref())?;

    let is_credit_pack = data
        .custom_data
        .as_ref()
        .and_then(|cd| cd.kind.as_deref())
        .is_some_and(|kind| kind == CREDIT_PACK_TYPE);

    if is_credit_pack {
        let pack_id = data
            .custom_data
            .as_ref()
            .and_then(|cd| cd.pack_id.clone())
            .ok_or(BillingError::MissingPackId)?;

        return Ok(CanonicalEvent::OneTimePayment(OneTimePaymentEvent {
            event_id: envelope.event_id,
            occurred_at,
            user_id,
            pack_id,
            transaction_id: Some(data.id),
        }));
    }

    let subscription_id = data.subscription_id.ok_or_else(|| {
        BillingError::InvalidPayload("transaction.completed without subscription_id".to_string())
    })?;

    let (period_start, period_end) = match &data.billing_period {
        Some(period) => (
            parse_occurred_at(period.starts_at.as_deref())?,
            parse_occurred_at(period.ends_at.as_deref())?,
        ),
        None => (None, None),
    };

    Ok(CanonicalEvent::Subscription(SubscriptionEvent {
        kind: SubscriptionEventKind::PaymentSucceeded,
        event_id: envelope.event_id,
        occurred_at,
        provider_subscription_id: subscription_id,
        provider_customer_id: data.customer_id.unwrap_or_default(),
        status: SubscriptionStatus::Active,
        billing_cycle: BillingCycle::Monthly,
        current_period_start: period_start,
        current_period_end: period_end,
        cancel_at_period_end: false,
        user_id,
    }))
}

fn normalize_payment_failed(
    envelope: PaddleEnvelope,
    occurred_at: Option<OffsetDateTime>,
) -> BillingResult<CanonicalEvent> {
    let data: PaddleTransaction = serde_json::from_value(envelope.data)
        .map_err(|e| BillingError::InvalidPayload(format!("transaction data: {e}")))?;

    let user_id = require_user_id(data.custom_data.as_ref())?;

    let subscription_id = data.subscription_id.ok_or_else(|| {
        BillingError::InvalidPayload(
            "transaction.payment_failed without subscription_id".to_string(),
        )
    })?;

    Ok(CanonicalEvent::Subscription(SubscriptionEvent {
        kind: SubscriptionEventKind::PaymentFailed,
        event_id: envelope.event_id,
        occurred_at,
        provider_subscription_id: subscription_id,
        provider_customer_id: data.customer_id.unwrap_or_default(),
        status: SubscriptionStatus::PastDue,
        billing_cycle: BillingCycle::Monthly,
        current_period_start: None,
        current_period_end: None,
        cancel_at_period_end: false,
        user_id,
    }))
}

fn require_user_id(custom_data: Option<&PaddleCustomData>) -> BillingResult<String> {
    custom_data
        .and_then(|cd| cd.user_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or(BillingError::MissingUserId)
}

/// Map Paddle's subscription status vocabulary onto the canonical enum.
/// Every unrecognized value collapses to `Expired`; nothing passes through.
fn map_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "paused" => SubscriptionStatus::Paused,
        "canceled" | "cancelled" => SubscriptionStatus::Cancelled,
        _ => SubscriptionStatus::Expired,
    }
}

fn map_billing_cycle(cycle: Option<&PaddleBillingCycle>) -> BillingCycle {
    match cycle.map(|c| c.interval.as_str()) {
        Some("year") | Some("annual") => BillingCycle::Yearly,
        _ => BillingCycle::Monthly,
    }
}

fn parse_occurred_at(raw: Option<&str>) -> BillingResult<Option<OffsetDateTime>> {
    match raw {
        None => Ok(None),
        Some(s) => OffsetDateTime::parse(s, &Rfc3339)
            .map(Some)
            .map_err(|e| BillingError::InvalidPayload(format!("timestamp {s:?}: {e}"))),
    }
}
