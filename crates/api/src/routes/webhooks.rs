//! Payment webhook endpoint

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Signature headers by provider; the first present wins.
const SIGNATURE_HEADERS: [&str; 3] = ["paddle-signature", "x-signature", "x-webhook-signature"];

/// Handle `POST /webhooks/payments`.
///
/// The body stays an opaque byte string until the billing engine has
/// authenticated it. Every non-processed disposition the engine reports
/// (duplicate, stale, ignored, discarded) is still acknowledged with 200 so
/// the provider's retry loop stops; only signature failures (401) and
/// internal errors (500) reach the provider as failures.
pub async fn payments_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!(body_len = body.len(), "Payment webhook received");

    let signature = extract_signature(&headers).ok_or_else(|| {
        tracing::warn!("Payment webhook missing signature header");
        ApiError::InvalidSignature
    })?;

    let outcome = state
        .billing
        .webhooks
        .handle(&body, signature, OffsetDateTime::now_utc())
        .await?;

    tracing::info!(
        disposition = outcome.reason(),
        "Payment webhook acknowledged"
    );

    Ok(Json(json!({"received": true})))
}

fn extract_signature(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn first_present_signature_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", HeaderValue::from_static("second"));
        headers.insert("paddle-signature", HeaderValue::from_static("first"));
        assert_eq!(extract_signature(&headers), Some("first"));

        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-signature", HeaderValue::from_static("third"));
        assert_eq!(extract_signature(&headers), Some("third"));

        assert_eq!(extract_signature(&HeaderMap::new()), None);
    }
}
