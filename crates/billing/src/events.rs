//! Canonical event model
//!
//! Provider-agnostic representation of an inbound billing notification.
//! Event kinds and subscription statuses are closed enums dispatched with
//! exhaustive matches, so adding a kind is a compile-time decision rather
//! than a runtime default branch.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A normalized billing notification. Transient; never persisted.
#[derive(Debug, Clone)]
pub enum CanonicalEvent {
    Subscription(SubscriptionEvent),
    OneTimePayment(OneTimePaymentEvent),
}

impl CanonicalEvent {
    /// Provider event identifier, the idempotency key. Legacy events may
    /// lack one and bypass the guard.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            CanonicalEvent::Subscription(e) => e.event_id.as_deref(),
            CanonicalEvent::OneTimePayment(e) => e.event_id.as_deref(),
        }
    }

    /// Event origination time, judged by the replay window filter.
    pub fn occurred_at(&self) -> Option<OffsetDateTime> {
        match self {
            CanonicalEvent::Subscription(e) => e.occurred_at,
            CanonicalEvent::OneTimePayment(e) => e.occurred_at,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            CanonicalEvent::Subscription(e) => e.kind.as_str(),
            CanonicalEvent::OneTimePayment(_) => "one_time.completed",
        }
    }
}

/// A subscription lifecycle notification.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub kind: SubscriptionEventKind,
    pub event_id: Option<String>,
    pub occurred_at: Option<OffsetDateTime>,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    /// Owning user, carried in the provider's custom data. Its absence in
    /// the raw payload is a normalization error, never a silent default.
    pub user_id: String,
}

/// A one-time purchase of a consumable credit pack.
#[derive(Debug, Clone)]
pub struct OneTimePaymentEvent {
    pub event_id: Option<String>,
    pub occurred_at: Option<OffsetDateTime>,
    pub user_id: String,
    pub pack_id: String,
    /// Provider transaction reference, stored on the ledger entry.
    pub transaction_id: Option<String>,
}

/// The closed set of subscription event kinds this engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEventKind {
    Created,
    Updated,
    Cancelled,
    PaymentSucceeded,
    PaymentFailed,
}

impl SubscriptionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventKind::Created => "subscription.created",
            SubscriptionEventKind::Updated => "subscription.updated",
            SubscriptionEventKind::Cancelled => "subscription.cancelled",
            SubscriptionEventKind::PaymentSucceeded => "subscription.payment_succeeded",
            SubscriptionEventKind::PaymentFailed => "subscription.payment_failed",
        }
    }
}

impl std::fmt::Display for SubscriptionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical subscription status. Provider vocabulary must map onto one of
/// these; nothing passes through unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Parse a stored status string. Unknown values collapse to `Expired`,
    /// the terminal no-access state.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "paused" => SubscriptionStatus::Paused,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Expired,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "yearly" => BillingCycle::Yearly,
            _ => BillingCycle::Monthly,
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Adapter from one provider's webhook payload to the canonical shape.
///
/// The body is already authenticated when this runs. Implementations parse
/// with explicit schemas and return either a fully typed event or a typed
/// error; partially populated events with defaulted fields are not a thing.
pub trait EventNormalizer: Send + Sync {
    fn provider(&self) -> &'static str;

    fn normalize(&self, body: &[u8]) -> crate::error::BillingResult<CanonicalEvent>;
}
