//! Notification channels.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Fire-and-forget text delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message.
    async fn send(&self, text: &str) -> Result<()>;

    /// Human-readable channel description for logs.
    fn describe(&self) -> String;
}

/// Prints messages to standard output.
#[derive(Debug, Clone, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        println!("{}\n", text);
        Ok(())
    }

    fn describe(&self) -> String {
        "stdout".to_string()
    }
}

/// Telegram notifier configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub timeout_seconds: u64,
}

/// Sends messages through the Telegram Bot API.
pub struct TelegramNotifier {
    config: TelegramConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.config.token);
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            // The URL carries the bot token, keep it out of the error text.
            .map_err(|e| anyhow::anyhow!("Failed to reach Telegram: {}", e.without_url()))?;

        let status = response.status();
        let reply: TelegramResponse = response
            .json()
            .await
            .with_context(|| format!("Unexpected Telegram response ({})", status))?;

        if !reply.ok {
            return Err(anyhow::anyhow!(
                "Telegram rejected message: {}",
                reply.description.unwrap_or_else(|| status.to_string())
            ));
        }

        debug!("Delivered {} chars to chat {}", text.len(), self.config.chat_id);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("telegram chat {}", self.config.chat_id)
    }
}
