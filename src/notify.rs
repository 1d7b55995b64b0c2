//! Delivery of results and failure messages to the end user

use crate::provider::Asset;
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Notifier configuration error: {0}")]
    Config(String),
}

/// Who receives the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub user_id: u64,
    pub chat_id: Option<i64>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a generated asset. `Ok(false)` means the receiver refused it.
    async fn deliver(
        &self,
        target: &DeliveryTarget,
        asset: &Asset,
        caption: Option<&str>,
    ) -> Result<bool, NotifyError>;

    async fn notify_failure(&self, target: &DeliveryTarget, text: &str) -> Result<bool, NotifyError>;
}

/// Logs deliveries instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(
        &self,
        target: &DeliveryTarget,
        asset: &Asset,
        caption: Option<&str>,
    ) -> Result<bool, NotifyError> {
        match asset {
            Asset::Url { url, .. } => {
                info!(user_id = target.user_id, chat_id = ?target.chat_id, url = %url, caption, "Result delivered")
            }
            Asset::Inline { data, .. } => {
                info!(user_id = target.user_id, chat_id = ?target.chat_id, bytes = data.len(), caption, "Inline result delivered")
            }
        }
        Ok(true)
    }

    async fn notify_failure(&self, target: &DeliveryTarget, text: &str) -> Result<bool, NotifyError> {
        info!(user_id = target.user_id, chat_id = ?target.chat_id, text, "Failure message delivered");
        Ok(true)
    }
}

/// POSTs JSON to a webhook; any 2xx counts as delivered
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, body: Value) -> Result<bool, NotifyError> {
        let bytes = serde_json::to_vec(&body).map_err(|e| NotifyError::Transport(e.to_string()))?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "Webhook rejected notification");
        }
        Ok(status.is_success())
    }
}

/// Webhook payload for a delivered asset
pub fn delivery_body(target: &DeliveryTarget, asset: &Asset, caption: Option<&str>) -> Value {
    let mut body = json!({
        "user_id": target.user_id,
        "chat_id": target.chat_id,
        "caption": caption,
        "file_name": asset.file_name(),
    });
    match asset {
        Asset::Url { url, .. } => {
            body["url"] = json!(url);
        }
        Asset::Inline {
            data, content_type, ..
        } => {
            body["image_base64"] = json!(BASE64_STANDARD.encode(data));
            body["content_type"] = json!(content_type);
        }
    }
    body
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(
        &self,
        target: &DeliveryTarget,
        asset: &Asset,
        caption: Option<&str>,
    ) -> Result<bool, NotifyError> {
        self.post(delivery_body(target, asset, caption)).await
    }

    async fn notify_failure(&self, target: &DeliveryTarget, text: &str) -> Result<bool, NotifyError> {
        self.post(json!({
            "user_id": target.user_id,
            "chat_id": target.chat_id,
            "text": text,
        }))
        .await
    }
}
