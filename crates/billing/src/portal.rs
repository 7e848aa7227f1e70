//! Customer portal and cancellation calls to the billing provider
//!
//! These run outside the webhook path, triggered by user action. They carry
//! the client's request-scoped timeout and are not retried internally;
//! failures surface directly to the caller.

use serde_json::json;

use crate::client::PaddleClient;
use crate::error::{BillingError, BillingResult};

/// Response for a customer portal session request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortalResponse {
    pub url: String,
}

pub struct PortalService {
    client: PaddleClient,
}

impl PortalService {
    pub fn new(client: PaddleClient) -> Self {
        Self { client }
    }

    /// Open a Paddle customer portal session and return its URL.
    pub async fn create_portal_session(
        &self,
        provider_customer_id: &str,
    ) -> BillingResult<PortalResponse> {
        let path = format!("/customers/{provider_customer_id}/portal-sessions");
        let response = self.client.post(&path, &json!({})).await?;
        let url = extract_portal_url(&response)?;

        tracing::info!(
            customer_id = %provider_customer_id,
            "Created customer portal session"
        );

        Ok(PortalResponse { url })
    }

    /// Schedule a subscription cancellation at the end of the current
    /// billing period. The state change lands later via webhook; this call
    /// only instructs the provider.
    pub async fn cancel_at_period_end(&self, provider_subscription_id: &str) -> BillingResult<()> {
        let path = format!("/subscriptions/{provider_subscription_id}/cancel");
        self.client
            .post(&path, &json!({"effective_from": "next_billing_period"}))
            .await?;

        tracing::info!(
            subscription_id = %provider_subscription_id,
            "Requested cancellation at period end"
        );

        Ok(())
    }
}

/// Pull the overview URL out of a Paddle portal-session response.
fn extract_portal_url(response: &serde_json::Value) -> BillingResult<String> {
    response
        .pointer("/data/urls/general/overview")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BillingError::Provider("portal session response missing overview URL".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_url_is_extracted_from_the_session_response() {
        let response = json!({
            "data": {
                "urls": {"general": {"overview": "https://customer-portal.paddle.com/abc"}}
            }
        });
        assert_eq!(
            extract_portal_url(&response).unwrap(),
            "https://customer-portal.paddle.com/abc"
        );
    }

    #[test]
    fn missing_overview_url_is_a_provider_error() {
        let response = json!({"data": {"urls": {}}});
        assert!(matches!(
            extract_portal_url(&response),
            Err(BillingError::Provider(_))
        ));
    }
}
