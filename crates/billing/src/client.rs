//! Paddle API client and configuration

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_API_BASE: &str = "https://api.paddle.com";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Paddle configuration loaded once at process startup and passed into the
/// handler explicitly. No module-level singleton.
#[derive(Debug, Clone)]
pub struct PaddleConfig {
    /// Shared secret for webhook HMAC verification
    pub webhook_secret: String,
    /// API key for outbound calls (portal sessions, cancellations)
    pub api_key: String,
    /// API base URL (sandbox vs live)
    pub api_base_url: String,
}

impl PaddleConfig {
    pub fn from_env() -> BillingResult<Self> {
        let webhook_secret = std::env::var("PADDLE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("PADDLE_WEBHOOK_SECRET not set".to_string()))?;
        let api_key = std::env::var("PADDLE_API_KEY")
            .map_err(|_| BillingError::Config("PADDLE_API_KEY not set".to_string()))?;
        let api_base_url =
            std::env::var("PADDLE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        Ok(Self {
            webhook_secret,
            api_key,
            api_base_url,
        })
    }
}

/// Thin HTTP client for the Paddle API.
///
/// Outbound calls carry an ordinary request-scoped timeout and are not
/// retried internally; failures surface directly to the caller.
#[derive(Clone)]
pub struct PaddleClient {
    config: PaddleConfig,
    http: reqwest::Client,
}

impl PaddleClient {
    pub fn new(config: PaddleConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(PaddleConfig::from_env()?)
    }

    pub fn config(&self) -> &PaddleConfig {
        &self.config
    }

    /// POST a JSON body to a Paddle API path and return the parsed response.
    pub(crate) async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> BillingResult<serde_json::Value> {
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider(format!(
                "Paddle API {path} returned {status}: {detail}"
            )));
        }

        Ok(response.json().await?)
    }
}
