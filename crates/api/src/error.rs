//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use budgetly_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failure on the webhook path. Terminal; the provider's
    /// retry cannot fix a forged or missing signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Internal failure. The provider redelivers on 500.
    #[error("Processing failed: {0}")]
    Internal(String),
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid signature"})),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                // Detail goes to the log, never the wire
                tracing::error!(detail = %detail, "Webhook processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Processing failed"})),
                )
                    .into_response()
            }
        }
    }
}
