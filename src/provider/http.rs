//! Authenticated JSON transport for the provider queue API

use super::error::{ProviderError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("genledger/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One-shot JSON requests; retries are layered on top by the caller
#[derive(Clone)]
pub struct ProviderHttp {
    client: Client,
    auth: String,
}

impl ProviderHttp {
    pub fn new(config: &HttpConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            auth: format!("Key {}", api_key),
        })
    }

    pub async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url, "GET");
        self.send(self.client.get(url), url).await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        debug!(url, "POST");
        let bytes = serde_json::to_vec(body)?;
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(bytes);
        self.send(request, url).await
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Value> {
        let response = request
            .header(AUTHORIZATION, &self.auth)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        let body = response.bytes().await.map_err(ProviderError::from)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(ProviderError::status(status.as_u16(), url, &text));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("{} ({})", e, url)))
    }
}
