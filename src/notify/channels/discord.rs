//! Discord webhook notification channel.
//!
//! Retries on 429 responses respecting the Retry-After header, up to a
//! fixed number of attempts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{default_enabled, ChannelContext, NotificationChannel};
use crate::notify::events::{NotificationEvent, StatsEvent, TransitionEvent};
use crate::notify::DeliveryError;

/// Maximum number of attempts for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest wait honoured from a Retry-After header.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(10);

const COLOR_ONLINE: u32 = 0x22c55e;
const COLOR_OFFLINE: u32 = 0xef4444;
const COLOR_STATS: u32 = 0x22d3ee;

/// Discord channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Discord webhook URL.
    pub webhook_url: String,
    #[serde(default = "default_username")]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

fn default_username() -> Option<String> {
    Some("Status Bot".to_string())
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: true,
            webhook_url: String::new(),
            username: default_username(),
            avatar_url: None,
        }
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    id: String,
    config: DiscordConfig,
    ctx: ChannelContext,
    client: Client,
}

impl DiscordChannel {
    pub fn new(id: String, config: DiscordConfig, ctx: ChannelContext) -> Result<Self, DeliveryError> {
        if config.webhook_url.is_empty() {
            return Err(DeliveryError::Config("discord webhook_url is empty".to_string()));
        }
        Ok(Self {
            id,
            config,
            ctx,
            client: Client::new(),
        })
    }

    fn transition_embed(&self, event: &TransitionEvent) -> serde_json::Value {
        let online = event.is_online();
        let mut fields = vec![json!({
            "name": "📊 Status",
            "value": if online { "✅ Online" } else { "❌ Offline" },
            "inline": true
        })];
        if online {
            fields.push(json!({
                "name": "👥 Players",
                "value": format!("{}/{}", event.player_count, event.max_players),
                "inline": true
            }));
        }
        fields.push(json!({
            "name": "🕐 Local Time",
            "value": self.ctx.clock.format(event.timestamp),
            "inline": true
        }));

        json!({
            "title": if online { "🟢 Server is ONLINE!" } else { "🔴 Server is OFFLINE!" },
            "description": if online {
                format!("**{}** is now online and ready for players!", self.ctx.server_name)
            } else {
                format!("**{}** has gone offline.", self.ctx.server_name)
            },
            "color": if online { COLOR_ONLINE } else { COLOR_OFFLINE },
            "fields": fields,
            "footer": { "text": format!("{} Status Monitor", self.ctx.server_name) },
            "timestamp": event.timestamp.to_rfc3339(),
        })
    }

    fn stats_embed(&self, event: &StatsEvent) -> serde_json::Value {
        let max = if event.players_max > 0 {
            event.players_max.to_string()
        } else {
            "?".to_string()
        };
        json!({
            "title": "📈 Server Statistics Update",
            "description": format!("Current status report for **{}**", self.ctx.server_name),
            "color": COLOR_STATS,
            "fields": [
                { "name": "👥 Current Players", "value": format!("{}/{}", event.players_online, max), "inline": true },
                { "name": "📊 24h Uptime", "value": event.uptime_percentage.map(|u| format!("{:.2}%", u)).unwrap_or_else(|| "N/A".to_string()), "inline": true },
                { "name": "📡 Avg Ping", "value": event.avg_ping.map(|p| format!("{}ms", p.round())).unwrap_or_else(|| "N/A".to_string()), "inline": true },
                { "name": "👥 Avg Players (24h)", "value": format!("{:.1}", event.avg_players), "inline": true },
                { "name": "🏆 Peak Players (24h)", "value": event.peak_players.to_string(), "inline": true },
                { "name": "🕐 Local Time", "value": self.ctx.clock.format(event.timestamp), "inline": true },
            ],
            "footer": { "text": format!("{} Status Monitor", self.ctx.server_name) },
            "timestamp": event.timestamp.to_rfc3339(),
        })
    }

    /// Build the webhook payload for an event.
    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        let embed = match event {
            NotificationEvent::StatusChange(e) => self.transition_embed(e),
            NotificationEvent::PlayerStats(e) => self.stats_embed(e),
        };

        let mut payload = json!({ "embeds": [embed] });
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.config.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }
        payload
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<(), DeliveryError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.webhook_url)
                .json(payload)
                .send()
                .await
                .map_err(|e| DeliveryError::Http(format!("Discord request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!("Discord rate limit: max retries ({}) exceeded", MAX_RATE_LIMIT_RETRIES);
                    return Err(DeliveryError::Status(429, "rate limited".to_string()));
                }

                let wait = parse_retry_after(response.headers()).unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status(status.as_u16(), body));
        }
    }
}

/// Wait requested by a rate-limited response, capped at [`MAX_RETRY_WAIT`].
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok()?.parse::<f64>().ok())
        .find_map(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|wait| wait.min(MAX_RETRY_WAIT))
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &'static str {
        "discord"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let payload = self.build_payload(event);
        self.send_with_retry(&payload).await?;
        debug!("Discord notification sent: {}", event.event_type());
        Ok(())
    }
}
