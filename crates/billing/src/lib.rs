// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Budgetly Billing Engine
//!
//! Payment-webhook ingestion and subscription-state engine. Receives
//! at-least-once billing notifications from the payment provider,
//! authenticates them, tolerates duplicate and out-of-order delivery, and
//! mutates subscription and credit state exactly once per logical event.
//!
//! ## Pipeline
//!
//! raw body -> signature verification -> normalization -> replay window ->
//! idempotency guard -> state machine / credit ledger -> tier projection
//!
//! ## Modules
//!
//! - **Signature Verifier**: HMAC-SHA256 authentication of raw payloads
//! - **Event Normalizer**: provider JSON onto the canonical event model
//! - **Replay Filter / Idempotency Guard**: staleness and at-most-once gates
//! - **Subscription State Machine**: persisted subscription transitions
//! - **Credit Ledger**: append-only consumable credit balances
//! - **Tier Resolver**: pure access-tier derivation
//! - **Portal**: user-triggered outbound calls to the provider

pub mod client;
pub mod credits;
pub mod error;
pub mod events;
pub mod paddle;
pub mod portal;
pub mod postgres;
pub mod replay;
pub mod signature;
pub mod store;
pub mod subscriptions;
pub mod tier;
pub mod webhooks;

#[cfg(test)]
mod scenario_tests;

// Client
pub use client::{PaddleClient, PaddleConfig};

// Credits
pub use credits::{pack_credits, CreditReason, PRO_MONTHLY_CREDITS};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    BillingCycle, CanonicalEvent, EventNormalizer, OneTimePaymentEvent, SubscriptionEvent,
    SubscriptionEventKind, SubscriptionStatus,
};

// Paddle
pub use paddle::PaddleNormalizer;

// Portal
pub use portal::{PortalResponse, PortalService};

// Replay
pub use replay::{is_timestamp_valid, REPLAY_TOLERANCE};

// Signature
pub use signature::SignatureVerifier;

// Stores
pub use store::{
    CreditStore, NewLedgerEntry, ProcessedEventStore, SubscriptionRecord, SubscriptionStore,
    UserSettingsStore,
};

// Subscriptions
pub use subscriptions::SubscriptionService;

// Tier
pub use tier::{resolve_tier, Tier};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

use std::sync::Arc;

use sqlx::PgPool;

use postgres::{PgCreditStore, PgProcessedEventStore, PgSubscriptionStore, PgUserSettingsStore};

/// Main billing service wiring the pipeline to its Postgres stores.
///
/// Constructed once at process startup and passed into handlers explicitly.
/// `portal` and `credits` are the library surface for the user-facing API
/// (portal sessions, cancellations, balance reads); the webhook endpoint
/// only touches `webhooks`.
pub struct BillingService {
    pub webhooks: WebhookHandler,
    pub portal: PortalService,
    pub credits: Arc<dyn CreditStore>,
}

impl BillingService {
    /// Create a billing service from environment variables.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::new(PaddleConfig::from_env()?, pool)
    }

    /// Create a billing service with explicit config.
    pub fn new(config: PaddleConfig, pool: PgPool) -> BillingResult<Self> {
        let verifier = SignatureVerifier::new(config.webhook_secret.clone());
        let normalizer: Arc<dyn EventNormalizer> = Arc::new(PaddleNormalizer::new());

        let subscriptions: Arc<dyn SubscriptionStore> =
            Arc::new(PgSubscriptionStore::new(pool.clone()));
        let processed_events: Arc<dyn ProcessedEventStore> =
            Arc::new(PgProcessedEventStore::new(pool.clone()));
        let credits: Arc<dyn CreditStore> = Arc::new(PgCreditStore::new(pool.clone()));
        let settings: Arc<dyn UserSettingsStore> = Arc::new(PgUserSettingsStore::new(pool));

        let subscription_service =
            SubscriptionService::new(subscriptions, credits.clone(), settings);

        let client = PaddleClient::new(config)?;

        Ok(Self {
            webhooks: WebhookHandler::new(
                verifier,
                normalizer,
                processed_events,
                subscription_service,
                credits.clone(),
            ),
            portal: PortalService::new(client),
            credits,
        })
    }
}
