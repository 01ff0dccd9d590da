//! # Notification Transports
//!
//! Uniform sink interface for email, SMS and WhatsApp delivery. Real providers
//! sit behind an HTTP webhook; the log transport is for local runs.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.1.0: Registry built from config, log-only mode
//! - 1.0.0: Webhook and log transports

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::models::Channel;
use crate::features::notifications::template::RenderedMessage;

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<()>;
}

/// Posts each message as JSON to a provider webhook
pub struct WebhookTransport {
    channel: Channel,
    url: String,
    client: Client,
}

impl WebhookTransport {
    pub fn new(channel: Channel, url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            channel,
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<()> {
        let payload = json!({
            "channel": self.channel.as_str(),
            "recipient": recipient,
            "subject": message.subject,
            "body": message.body,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{} webhook request failed", self.channel))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "{} webhook returned {}: {}",
                self.channel,
                status,
                body.chars().take(200).collect::<String>()
            ));
        }

        debug!("{} webhook accepted message for {}", self.channel, recipient);
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them
pub struct LogTransport {
    channel: Channel,
}

impl LogTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<()> {
        if message.subject.is_empty() {
            info!("[{}] to {}: {}", self.channel, recipient, message.body);
        } else {
            info!(
                "[{}] to {}: {} | {}",
                self.channel, recipient, message.subject, message.body
            );
        }
        Ok(())
    }
}

/// Channel to transport mapping; a channel without an entry is skipped at dispatch
#[derive(Clone, Default)]
pub struct Transports {
    by_channel: HashMap<Channel, Arc<dyn NotificationTransport>>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel, transport: Arc<dyn NotificationTransport>) {
        self.by_channel.insert(channel, transport);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn NotificationTransport>> {
        self.by_channel.get(&channel).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }

    /// Log transports everywhere in log-only mode, otherwise one webhook per configured URL
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut transports = Transports::new();

        for channel in Channel::ALL {
            if config.notify_log_only {
                transports.register(channel, Arc::new(LogTransport::new(channel)));
                continue;
            }
            match config.webhook_url(channel) {
                Some(url) => {
                    let webhook = WebhookTransport::new(channel, url, config.transport_timeout)?;
                    transports.register(channel, Arc::new(webhook));
                    info!("{} notifications via webhook {}", channel, url);
                }
                None => warn!("No transport configured for {}, channel disabled", channel),
            }
        }

        Ok(transports)
    }
}
