//! Outbound operator notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engage_core::AppConfig;
use reqwest::Url;
use serde_json::Value;

use crate::error::PipelineError;

/// Fire-and-forget `send(to, template, params)`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, template: &str, params: &Value) -> Result<(), PipelineError>;
}

/// Posts `{to, template, params}` as JSON to a webhook that renders and
/// delivers the message.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns [`PipelineError::Notify`] if `url` is invalid or the HTTP
    /// client cannot be built.
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, PipelineError> {
        let url = Url::parse(url).map_err(|e| PipelineError::Notify(format!("invalid webhook URL: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Notify(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, to: &str, template: &str, params: &Value) -> Result<(), PipelineError> {
        let body = serde_json::json!({ "to": to, "template": template, "params": params });
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Notify(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Notify(format!("webhook returned {status}")));
        }

        tracing::info!(template, "notification sent");
        Ok(())
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, template: &str, params: &Value) -> Result<(), PipelineError> {
        tracing::info!(to, template, params = %params, "notification (log only)");
        Ok(())
    }
}

/// A webhook notifier when `NOTIFY_WEBHOOK_URL` is set, otherwise
/// [`LogNotifier`].
///
/// # Errors
///
/// Returns [`PipelineError::Notify`] if the webhook notifier cannot be built.
pub fn notifier_from_config(config: &AppConfig) -> Result<Arc<dyn Notifier>, PipelineError> {
    match &config.notify_webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, config.http_timeout_secs)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
