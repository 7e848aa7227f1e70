//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the webhook ingestion pipeline and its stores.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Signature header missing, malformed, or HMAC mismatch. Fail closed.
    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    /// Payload did not parse into a typed canonical event. Reported
    /// upstream as an invalid signature: an authenticated provider never
    /// sends an unparseable body.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Well-formed provider event of a kind this engine does not handle.
    /// Acknowledged and ignored.
    #[error("Unhandled event type: {0}")]
    UnsupportedEvent(String),

    /// `custom_data.userId` absent from the provider payload. The event can
    /// never become valid on redelivery.
    #[error("Webhook payload missing userId in custom data")]
    MissingUserId,

    /// One-time purchase event without a pack identifier.
    #[error("Credit pack purchase missing packId in custom data")]
    MissingPackId,

    /// Pack identifier not present in the fixed catalog.
    #[error("Unknown credit pack: {0}")]
    UnknownCreditPack(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Outbound billing-provider API failure. Surfaced directly, never
    /// retried internally.
    #[error("Provider API error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Provider(err.to_string())
    }
}

