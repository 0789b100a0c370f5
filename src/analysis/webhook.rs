use std::time::Duration;

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::config::WebhookConfig;

/// Outbound call to the external diagnosis service. The service is an opaque
/// black box; callers only get the raw response text back and hand it to the
/// normalizer.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, image: Bytes, content_type: &str) -> anyhow::Result<String>;
}

pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl WebhookClient {
    /// The timeout bounds the whole call; exceeding it is a call failure,
    /// not a hang. No retries here or anywhere upstream.
    pub fn new(cfg: &WebhookConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build webhook http client")?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl AnalysisClient for WebhookClient {
    async fn analyze(&self, image: Bytes, content_type: &str) -> anyhow::Result<String> {
        let mut req = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(image);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = req.send().await.context("analysis webhook request")?;
        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "analysis webhook returned {}",
            status
        );

        let text = resp.text().await.context("read analysis webhook body")?;
        debug!(bytes = text.len(), "analysis webhook responded");
        Ok(text)
    }
}
