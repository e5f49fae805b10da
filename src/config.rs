//! Configuration module.
//!
//! Defaults, then an optional JSON file named by `SERVERPULSE_CONFIG`, then
//! scalar environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::civil::{CivilClock, DEFAULT_OFFSET_MINUTES};
use crate::notify::channels::{ChannelConfig, DiscordConfig, LogConfig};
use crate::notify::NotifierConfig;
use crate::probe::{Provider, SourceConfig, SourceKind};
use crate::scheduler::WriterRole;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP port for the read API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "serverpulse.db")
    pub db_path: String,
    /// Whether this process is the write-of-record for samples.
    pub role: WriterRole,
    /// Display name used in notifications.
    pub server_name: String,
    pub poll_interval_secs: u64,
    pub aggregation_interval_secs: u64,
    pub stats_interval_secs: u64,
    /// Minimum gap between two delivered stats events.
    pub stats_min_interval_secs: u64,
    /// Civil calendar offset, minutes east of UTC (default: 345, i.e. +05:45)
    pub civil_offset_minutes: i32,
    /// Per-channel repeat-notification cooldown.
    pub cooldown_secs: u64,
    pub latency_cap_ms: u32,
    /// Age after which the latest sample is reported as stale.
    pub stale_after_secs: u64,
    /// Upper bound on samples returned by one query.
    pub sample_query_limit: u32,
    /// Samples buffered while the database rejects appends.
    pub max_pending_samples: usize,
    pub delivery_timeout_secs: u64,
    pub notifications_enabled: bool,
    /// Keep dedupe state in the database rather than in memory.
    pub persist_dedupe_state: bool,
    /// Name of the source that decides canonical availability.
    pub primary_source: String,
    pub sources: Vec<SourceConfig>,
    pub channels: Vec<ChannelConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "serverpulse.db".to_string(),
            role: WriterRole::Authoritative,
            server_name: "Game Server".to_string(),
            poll_interval_secs: 10,
            aggregation_interval_secs: 60,
            stats_interval_secs: 600,
            stats_min_interval_secs: 300,
            civil_offset_minutes: DEFAULT_OFFSET_MINUTES,
            cooldown_secs: 300,
            latency_cap_ms: 500,
            stale_after_secs: 30,
            sample_query_limit: 1000,
            max_pending_samples: 1000,
            delivery_timeout_secs: 10,
            notifications_enabled: true,
            persist_dedupe_state: true,
            primary_source: "java".to_string(),
            sources: vec![
                SourceConfig {
                    name: "java".to_string(),
                    kind: SourceKind::Java,
                    provider: Provider::McStatus,
                    host: "play.example.net".to_string(),
                    port: 25565,
                    timeout_ms: 5000,
                },
                SourceConfig {
                    name: "bedrock".to_string(),
                    kind: SourceKind::Bedrock,
                    provider: Provider::McStatus,
                    host: "play.example.net".to_string(),
                    port: 19132,
                    timeout_ms: 5000,
                },
            ],
            channels: vec![ChannelConfig::Log(LogConfig::default())],
        }
    }
}

impl ServerConfig {
    /// Load configuration.
    ///
    /// Environment variables:
    /// - `SERVERPULSE_CONFIG`: JSON config file path
    /// - `SERVERPULSE_HTTP_PORT`: HTTP port
    /// - `SERVERPULSE_DB_PATH`: Database file path
    /// - `SERVERPULSE_ROLE`: `authoritative` or `read_only`
    /// - `SERVERPULSE_POLL_INTERVAL_SECS`, `SERVERPULSE_AGGREGATION_INTERVAL_SECS`
    /// - `SERVERPULSE_CIVIL_OFFSET_MINUTES`, `SERVERPULSE_COOLDOWN_SECS`
    /// - `SERVERPULSE_DISCORD_WEBHOOK_URL`: adds a Discord channel
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match env::var("SERVERPULSE_CONFIG") {
            Ok(path) => Self::from_json(&std::fs::read_to_string(path)?)?,
            Err(_) => Self::default(),
        };

        if let Some(port) = env_parse("SERVERPULSE_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("SERVERPULSE_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(role) = env::var("SERVERPULSE_ROLE") {
            cfg.role = WriterRole::parse(&role)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown role: {}", role)))?;
        }
        if let Some(secs) = env_parse("SERVERPULSE_POLL_INTERVAL_SECS") {
            cfg.poll_interval_secs = secs;
        }
        if let Some(secs) = env_parse("SERVERPULSE_AGGREGATION_INTERVAL_SECS") {
            cfg.aggregation_interval_secs = secs;
        }
        if let Some(minutes) = env_parse("SERVERPULSE_CIVIL_OFFSET_MINUTES") {
            cfg.civil_offset_minutes = minutes;
        }
        if let Some(secs) = env_parse("SERVERPULSE_COOLDOWN_SECS") {
            cfg.cooldown_secs = secs;
        }
        if let Ok(url) = env::var("SERVERPULSE_DISCORD_WEBHOOK_URL") {
            if !url.is_empty() {
                cfg.channels.push(ChannelConfig::Discord(DiscordConfig {
                    webhook_url: url,
                    ..Default::default()
                }));
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one source is required".to_string()));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source name: {}", source.name)));
            }
        }
        if !names.contains(self.primary_source.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "primary source {} is not configured",
                self.primary_source
            )));
        }

        if self.poll_interval_secs == 0 || self.aggregation_interval_secs == 0 || self.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".to_string()));
        }

        if CivilClock::from_offset_minutes(self.civil_offset_minutes).is_none() {
            return Err(ConfigError::Invalid(format!(
                "civil offset {} minutes is out of range",
                self.civil_offset_minutes
            )));
        }

        let mut channel_ids = HashSet::new();
        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            if !channel_ids.insert(channel.id()) {
                return Err(ConfigError::Invalid(format!("duplicate channel id: {}", channel.id())));
            }
        }

        Ok(())
    }

    pub fn civil_clock(&self) -> CivilClock {
        CivilClock::from_offset_minutes(self.civil_offset_minutes).unwrap_or_default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            delivery_timeout: Duration::from_secs(self.delivery_timeout_secs),
            stats_min_interval: Duration::from_secs(self.stats_min_interval_secs),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "serverpulse.db");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.aggregation_interval(), Duration::from_secs(60));
        assert_eq!(cfg.notifier_config().stats_min_interval, Duration::from_secs(300));
        assert_eq!(cfg.civil_clock().offset_minutes(), 345);
        assert_eq!(cfg.max_pending_samples, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = ServerConfig::from_json(
            r#"{
                "role": "read_only",
                "poll_interval_secs": 15,
                "primary_source": "main",
                "sources": [{"name": "main", "kind": "java", "host": "mc.example.net", "port": 1109}],
                "channels": [{"type": "discord", "webhook_url": "https://discord.test/api/webhooks/1/x"}]
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.role, WriterRole::ReadOnly);
        assert_eq!(cfg.poll_interval_secs, 15);
        assert_eq!(cfg.cooldown_secs, 300);
        assert_eq!(cfg.sources.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut cfg = ServerConfig::default();
        cfg.primary_source = "missing".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.sources.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.poll_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.civil_offset_minutes = 24 * 60;
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        let dup = cfg.sources[0].clone();
        cfg.sources.push(dup);
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.channels.push(ChannelConfig::Log(LogConfig::default()));
        assert!(cfg.validate().is_err());
    }
}
