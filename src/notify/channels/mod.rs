//! Notification channels.
//!
//! This module provides the channels a notification can be delivered to:
//! - Discord webhooks
//! - Generic webhooks (HTTP POST of the event JSON)
//! - Email through an HTTP email API
//! - The local log

mod discord;
mod email;
mod log;
mod webhook;

pub use discord::{DiscordChannel, DiscordConfig};
pub use email::{EmailChannel, EmailConfig};
pub use log::{LogChannel, LogConfig};
pub use webhook::{WebhookChannel, WebhookConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::events::NotificationEvent;
use super::DeliveryError;
use crate::civil::CivilClock;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable id, used as the dedupe key.
    fn id(&self) -> &str;

    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Whether this channel wants the event at all.
    fn accepts(&self, _event: &NotificationEvent) -> bool {
        true
    }

    /// Deliver one event.
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

/// Formatting context shared by channels.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub server_name: String,
    pub clock: CivilClock,
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Discord(DiscordConfig),
    Webhook(WebhookConfig),
    Email(EmailConfig),
    Log(LogConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Discord(_) => "discord",
            Self::Webhook(_) => "webhook",
            Self::Email(_) => "email",
            Self::Log(_) => "log",
        }
    }

    /// Channel id; defaults to the type name.
    pub fn id(&self) -> String {
        let explicit = match self {
            Self::Discord(c) => c.id.as_deref(),
            Self::Webhook(c) => c.id.as_deref(),
            Self::Email(c) => c.id.as_deref(),
            Self::Log(c) => c.id.as_deref(),
        };
        explicit.unwrap_or(self.channel_type()).to_string()
    }

    /// Check if the channel is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Discord(c) => c.enabled,
            Self::Webhook(c) => c.enabled,
            Self::Email(c) => c.enabled,
            Self::Log(c) => c.enabled,
        }
    }
}

/// Build every enabled channel.
pub fn build_channels(
    configs: &[ChannelConfig],
    ctx: &ChannelContext,
) -> Result<Vec<Arc<dyn NotificationChannel>>, DeliveryError> {
    let mut seen = HashSet::new();
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    for config in configs.iter().filter(|c| c.is_enabled()) {
        let id = config.id();
        if !seen.insert(id.clone()) {
            return Err(DeliveryError::Config(format!("duplicate channel id: {}", id)));
        }

        let channel: Arc<dyn NotificationChannel> = match config {
            ChannelConfig::Discord(c) => Arc::new(DiscordChannel::new(id, c.clone(), ctx.clone())?),
            ChannelConfig::Webhook(c) => Arc::new(WebhookChannel::new(id, c.clone())?),
            ChannelConfig::Email(c) => Arc::new(EmailChannel::new(id, c.clone(), ctx.clone())?),
            ChannelConfig::Log(_) => Arc::new(LogChannel::new(id, ctx.clone())),
        };
        tracing::info!("Notifier: channel {} ({}) enabled", channel.id(), channel.channel_type());
        channels.push(channel);
    }

    Ok(channels)
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ChannelContext {
        ChannelContext {
            server_name: "Test Network".to_string(),
            clock: CivilClock::default(),
        }
    }

    #[test]
    fn test_channel_config_from_json() {
        let configs: Vec<ChannelConfig> = serde_json::from_str(
            r#"[
                {"type": "discord", "webhook_url": "https://discord.test/api/webhooks/1/x"},
                {"type": "webhook", "id": "ops", "url": "https://hooks.test/status"},
                {"type": "log", "enabled": false}
            ]"#,
        )
        .unwrap();

        assert_eq!(configs[0].id(), "discord");
        assert_eq!(configs[1].id(), "ops");
        assert!(!configs[2].is_enabled());

        let channels = build_channels(&configs, &ctx()).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].channel_type(), "discord");
        assert_eq!(channels[1].id(), "ops");
    }

    #[test]
    fn test_duplicate_channel_ids_rejected() {
        let configs = vec![
            ChannelConfig::Log(LogConfig::default()),
            ChannelConfig::Log(LogConfig::default()),
        ];
        assert!(matches!(
            build_channels(&configs, &ctx()),
            Err(DeliveryError::Config(_))
        ));
    }
}
