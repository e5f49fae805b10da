//! Local log channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{default_enabled, ChannelContext, NotificationChannel};
use crate::notify::events::NotificationEvent;
use crate::notify::DeliveryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: true,
        }
    }
}

/// Writes every event to the process log.
pub struct LogChannel {
    id: String,
    ctx: ChannelContext,
}

impl LogChannel {
    pub fn new(id: String, ctx: ChannelContext) -> Self {
        Self { id, ctx }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let when = self.ctx.clock.format(event.timestamp());
        match event {
            NotificationEvent::StatusChange(e) => info!(
                "ALERT: {} is now {} ({}/{} players) at {}",
                self.ctx.server_name, e.new_status, e.player_count, e.max_players, when
            ),
            NotificationEvent::PlayerStats(e) => info!(
                "STATS: {} {}/{} players, uptime {}, avg ping {} at {}",
                self.ctx.server_name,
                e.players_online,
                e.players_max,
                e.uptime_percentage
                    .map(|u| format!("{:.2}%", u))
                    .unwrap_or_else(|| "N/A".to_string()),
                e.avg_ping
                    .map(|p| format!("{:.0}ms", p))
                    .unwrap_or_else(|| "N/A".to_string()),
                when
            ),
        }
        Ok(())
    }
}
