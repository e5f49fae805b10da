//! Generic webhook notification channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{default_enabled, NotificationChannel};
use crate::notify::events::NotificationEvent;
use crate::notify::DeliveryError;

/// Webhook channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Webhook URL.
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

/// Generic webhook notification channel.
pub struct WebhookChannel {
    id: String,
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(id: String, config: WebhookConfig) -> Result<Self, DeliveryError> {
        if config.url.is_empty() {
            return Err(DeliveryError::Config("webhook url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;

        Ok(Self { id, config, client })
    }

    /// Build the JSON payload.
    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        json!({
            "event_type": event.event_type(),
            "timestamp": event.timestamp().to_rfc3339(),
            "data": event,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.config.url).json(&self.build_payload(event));
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(Duration::from_secs(self.config.timeout_secs))
            } else {
                DeliveryError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status(status.as_u16(), body));
        }

        debug!("Webhook {} notified: {}", self.id, event.event_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::KnownStatus;
    use crate::notify::TransitionEvent;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_payload_shape() {
        let channel = WebhookChannel::new(
            "ops".to_string(),
            WebhookConfig {
                id: None,
                enabled: true,
                url: "https://hooks.test/status".to_string(),
                bearer_token: None,
                timeout_secs: 5,
            },
        )
        .unwrap();

        let payload = channel.build_payload(&NotificationEvent::StatusChange(TransitionEvent {
            new_status: KnownStatus::Online,
            player_count: 12,
            max_players: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }));

        assert_eq!(payload["event_type"], "status_change");
        assert_eq!(payload["data"]["new_status"], "online");
        assert_eq!(payload["data"]["player_count"], 12);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let channel = WebhookChannel::new(
            "ops".to_string(),
            WebhookConfig {
                id: None,
                enabled: true,
                url: "http://256.256.256.256/hook".to_string(),
                bearer_token: Some("secret".to_string()),
                timeout_secs: 1,
            },
        )
        .unwrap();

        let event = NotificationEvent::StatusChange(TransitionEvent {
            new_status: KnownStatus::Offline,
            player_count: 0,
            max_players: 0,
            timestamp: Utc::now(),
        });
        assert!(channel.deliver(&event).await.is_err());
    }
}
