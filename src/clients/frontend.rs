//! HTTP client for the chat frontend adapter.
//!
//! The adapter owns the actual chat connection; this layer only asks it to
//! remove previously sent messages when a disclosure expires.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::FrontendConfig;
use crate::services::DisclosureSink;

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Clone)]
pub struct FrontendClient {
    base_url: String,
    client: Client,
}

impl FrontendClient {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .user_agent("Chime/1.0")
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build a client when a base URL is configured; `None` means the caller
    /// should fall back to a non-networked sink.
    #[must_use]
    pub fn from_config(config: &FrontendConfig) -> Option<Self> {
        config.base_url.as_ref().map(|url| {
            Self::new(
                url,
                Duration::from_secs(u64::from(config.request_timeout_seconds)),
            )
        })
    }
}

#[async_trait]
impl DisclosureSink for FrontendClient {
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let url = format!("{}/messages/delete", self.base_url);

        debug!("Requesting deletion of message {message_id} in chat {chat_id}");

        let response = self
            .client
            .post(&url)
            .json(&DeleteMessageRequest {
                chat_id,
                message_id,
            })
            .send()
            .await
            .context("Failed to reach frontend adapter")?;

        response
            .error_for_status()
            .context("Frontend adapter rejected message deletion")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_base_url() {
        let config = FrontendConfig::default();
        assert!(FrontendClient::from_config(&config).is_none());

        let config = FrontendConfig {
            base_url: Some("http://localhost:8081/".to_string()),
            request_timeout_seconds: 5,
        };
        let client = FrontendClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8081");
    }
}
