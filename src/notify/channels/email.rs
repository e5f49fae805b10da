//! Email notification channel using an HTTP email API.
//!
//! Speaks the Resend-style `POST /emails` interface with a bearer API key.
//! Only status changes are mailed; stats summaries are skipped.

use askama::Template;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{default_enabled, ChannelContext, NotificationChannel};
use crate::notify::events::{NotificationEvent, TransitionEvent};
use crate::notify::DeliveryError;

/// Email channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    /// Sender address, e.g. `Status <status@example.net>`.
    pub from_address: String,
    /// Recipient email addresses.
    pub to_addresses: Vec<String>,
}

fn default_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

/// HTML body of a status email. Interpolated values are HTML-escaped.
#[derive(Template)]
#[template(path = "status_email.html")]
struct StatusEmail<'a> {
    emoji: &'a str,
    color: &'a str,
    server_name: &'a str,
    status_text: &'a str,
    online: bool,
    player_count: u32,
    max_players: u32,
    local_time: String,
}

/// Email notification channel.
pub struct EmailChannel {
    id: String,
    config: EmailConfig,
    ctx: ChannelContext,
    client: Client,
}

impl EmailChannel {
    pub fn new(id: String, config: EmailConfig, ctx: ChannelContext) -> Result<Self, DeliveryError> {
        if config.api_key.is_empty() {
            return Err(DeliveryError::Config("email api_key is empty".to_string()));
        }
        if config.to_addresses.is_empty() {
            return Err(DeliveryError::Config("email has no recipients".to_string()));
        }
        Ok(Self {
            id,
            config,
            ctx,
            client: Client::new(),
        })
    }

    fn subject(&self, event: &TransitionEvent) -> String {
        let (emoji, text) = status_label(event);
        format!("{} {} is now {}", emoji, self.ctx.server_name, text)
    }

    fn html_body(&self, event: &TransitionEvent) -> Result<String, DeliveryError> {
        let (emoji, text) = status_label(event);
        StatusEmail {
            emoji,
            color: if event.is_online() { "#22c55e" } else { "#ef4444" },
            server_name: &self.ctx.server_name,
            status_text: text,
            online: event.is_online(),
            player_count: event.player_count,
            max_players: event.max_players,
            local_time: self.ctx.clock.format(event.timestamp),
        }
        .render()
        .map_err(|e| DeliveryError::Config(format!("email template failed: {}", e)))
    }

    fn build_payload(&self, event: &TransitionEvent) -> Result<serde_json::Value, DeliveryError> {
        Ok(json!({
            "from": self.config.from_address,
            "to": self.config.to_addresses,
            "subject": self.subject(event),
            "html": self.html_body(event)?,
        }))
    }
}

fn status_label(event: &TransitionEvent) -> (&'static str, &'static str) {
    if event.is_online() {
        ("🟢", "Online")
    } else {
        ("🔴", "Offline")
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn accepts(&self, event: &NotificationEvent) -> bool {
        matches!(event, NotificationEvent::StatusChange(_))
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let NotificationEvent::StatusChange(transition) = event else {
            return Ok(());
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_payload(transition)?)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(format!("email request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status(status.as_u16(), body));
        }

        debug!("Email sent to {} recipient(s)", self.config.to_addresses.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civil::CivilClock;
    use crate::db::KnownStatus;
    use crate::notify::StatsEvent;
    use chrono::{TimeZone, Utc};

    fn channel() -> EmailChannel {
        EmailChannel::new(
            "email".to_string(),
            EmailConfig {
                id: None,
                enabled: true,
                api_url: default_api_url(),
                api_key: "re_test".to_string(),
                from_address: "Status <status@example.net>".to_string(),
                to_addresses: vec!["admin@example.net".to_string()],
            },
            ChannelContext {
                server_name: "Test Network".to_string(),
                clock: CivilClock::default(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_online_payload() {
        let event = TransitionEvent {
            new_status: KnownStatus::Online,
            player_count: 5,
            max_players: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let payload = channel().build_payload(&event).unwrap();

        assert_eq!(payload["subject"], "🟢 Test Network is now Online");
        assert_eq!(payload["to"][0], "admin@example.net");
        assert!(payload["html"].as_str().unwrap().contains("Players: 5/100"));
    }

    #[test]
    fn test_server_name_is_escaped_in_html() {
        let mut email = channel();
        email.ctx.server_name = "<b>Ops & Co</b>".to_string();
        let event = TransitionEvent {
            new_status: KnownStatus::Offline,
            player_count: 0,
            max_players: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let payload = email.build_payload(&event).unwrap();
        let html = payload["html"].as_str().unwrap();

        assert!(html.contains("&lt;b&gt;Ops &amp; Co&lt;"));
        assert!(!html.contains("<b>Ops"));
        assert!(!html.contains("Players:"));
        // The subject is plain text.
        assert_eq!(payload["subject"], "🔴 <b>Ops & Co</b> is now Offline");
    }

    #[test]
    fn test_stats_not_accepted() {
        let stats = NotificationEvent::PlayerStats(StatsEvent {
            players_online: 1,
            players_max: 10,
            uptime_percentage: Some(100.0),
            avg_ping: None,
            avg_players: 1.0,
            peak_players: 1,
            timestamp: Utc::now(),
        });
        assert!(!channel().accepts(&stats));
    }

    #[test]
    fn test_missing_recipients_rejected() {
        let mut config = channel().config;
        config.to_addresses.clear();
        let result = EmailChannel::new(
            "email".to_string(),
            config,
            ChannelContext {
                server_name: String::new(),
                clock: CivilClock::default(),
            },
        );
        assert!(result.is_err());
    }
}
