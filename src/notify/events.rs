//! Notification events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::KnownStatus;

/// Canonical status changed between two consecutive samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub new_status: KnownStatus,
    pub player_count: u32,
    pub max_players: u32,
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn is_online(&self) -> bool {
        self.new_status == KnownStatus::Online
    }
}

/// Periodic summary, independent of status changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsEvent {
    pub players_online: u32,
    pub players_max: u32,
    /// Uptime over the last 24 hours; `None` without samples.
    pub uptime_percentage: Option<f64>,
    pub avg_ping: Option<f64>,
    pub avg_players: f64,
    pub peak_players: u32,
    pub timestamp: DateTime<Utc>,
}

/// Anything a channel can be asked to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    StatusChange(TransitionEvent),
    PlayerStats(StatsEvent),
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChange(_) => "status_change",
            Self::PlayerStats(_) => "player_stats",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StatusChange(e) => e.timestamp,
            Self::PlayerStats(e) => e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = NotificationEvent::StatusChange(TransitionEvent {
            new_status: KnownStatus::Offline,
            player_count: 0,
            max_players: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["new_status"], "offline");
        assert_eq!(json["max_players"], 100);
        assert_eq!(event.event_type(), "status_change");
    }
}
