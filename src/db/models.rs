//! Database model types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One canonical availability sample. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    pub timestamp: DateTime<Utc>,
    /// Derived from the primary source only.
    pub is_online: bool,
    pub primary_players_online: u32,
    pub primary_players_max: u32,
    pub secondary_online: bool,
    /// Request/response interval of the primary probe, capped. `None` when offline.
    pub ping_ms: Option<u32>,
}

impl StatusSample {
    /// Sample recorded when the primary source could not be reached.
    pub fn offline(timestamp: DateTime<Utc>, secondary_online: bool) -> Self {
        Self {
            timestamp,
            is_online: false,
            primary_players_online: 0,
            primary_players_max: 0,
            secondary_online,
            ping_ms: None,
        }
    }
}

/// Aggregate of all samples within one civil hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRollup {
    /// UTC instant of the civil hour start.
    pub hour_start: DateTime<Utc>,
    pub avg_players: f64,
    pub peak_players: u32,
    pub min_players: u32,
    /// True if any sample in the hour was online.
    pub was_online: bool,
    pub sample_count: u32,
}

/// Aggregate of all samples within one civil date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub total_checks: u32,
    pub online_checks: u32,
    /// `None` when there were no checks at all.
    pub uptime_percentage: Option<f64>,
    pub avg_players: f64,
    pub peak_players: u32,
    pub avg_ping: Option<f64>,
}

/// Uptime summary over a look-back window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    pub percentage: Option<f64>,
    pub total_checks: u32,
    pub avg_players: f64,
    pub peak_players: u32,
    pub avg_ping: Option<f64>,
}

/// Last status a channel was told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownStatus {
    Unknown,
    Online,
    Offline,
}

impl KnownStatus {
    pub fn from_online(is_online: bool) -> Self {
        if is_online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for KnownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel notification dedupe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeState {
    pub last_status: KnownStatus,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl Default for DedupeState {
    fn default() -> Self {
        Self {
            last_status: KnownStatus::Unknown,
            last_sent_at: None,
        }
    }
}
