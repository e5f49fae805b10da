//! Payload shapes and normalization into [`StatusSnapshot`].
//!
//! The two supported providers disagree on several fields: `version` is a
//! plain string or an object, MOTD text is a string or a list of lines, and
//! player entries are names or objects. The raw types accept every variant;
//! only `online` is mandatory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::SourceKind;

/// Placeholder some sources report instead of real player names.
pub const ANONYMOUS_PLAYER: &str = "Anonymous Player";

/// Status payload as returned by a provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    pub online: bool,
    #[serde(default)]
    pub version: Option<RawVersion>,
    #[serde(default)]
    pub players: Option<RawPlayers>,
    #[serde(default)]
    pub motd: Option<RawMotd>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawVersion {
    Text(String),
    Detailed {
        #[serde(default)]
        name_clean: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        name_raw: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlayers {
    #[serde(default)]
    pub online: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub list: Option<Vec<RawPlayer>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPlayer {
    Name(String),
    Detailed {
        #[serde(default)]
        name_clean: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        name_raw: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMotd {
    #[serde(default)]
    pub clean: Option<RawLines>,
    #[serde(default)]
    pub raw: Option<RawLines>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLines {
    One(String),
    Many(Vec<String>),
}

impl RawLines {
    fn joined(&self) -> String {
        match self {
            Self::One(s) => s.clone(),
            Self::Many(lines) => lines
                .iter()
                .map(|l| l.trim())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Canonical per-source status for one poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    pub online: bool,
    pub players_online: u32,
    pub players_max: u32,
    pub version: Option<String>,
    pub motd: Option<String>,
    pub latency_ms: Option<u32>,
    pub player_names: Vec<String>,
}

/// Map a raw payload into a [`StatusSnapshot`]. Never fails; absent fields
/// become `None` or `0`. Latency is attached by the caller.
pub fn normalize(raw: &RawStatus, kind: SourceKind) -> StatusSnapshot {
    let players = raw.players.clone().unwrap_or_default();

    let version = raw.version.as_ref().and_then(|v| match v {
        RawVersion::Text(s) => Some(s.clone()),
        RawVersion::Detailed {
            name_clean,
            name,
            name_raw,
        } => name_clean.clone().or_else(|| name.clone()).or_else(|| name_raw.clone()),
    });

    let motd = raw.motd.as_ref().and_then(|m| {
        m.clean.as_ref().or(m.raw.as_ref()).map(RawLines::joined)
    });

    let player_names = players
        .list
        .unwrap_or_default()
        .iter()
        .filter_map(|p| match p {
            RawPlayer::Name(n) => Some(n.clone()),
            RawPlayer::Detailed {
                name_clean,
                name,
                name_raw,
            } => name_clean.clone().or_else(|| name.clone()).or_else(|| name_raw.clone()),
        })
        .map(|n| strip_formatting(&n))
        .filter(|n| !n.is_empty() && n != ANONYMOUS_PLAYER)
        .collect();

    tracing::trace!("Normalized {} payload (online={})", kind.as_str(), raw.online);

    StatusSnapshot {
        online: raw.online,
        players_online: players.online.unwrap_or(0),
        players_max: players.max.unwrap_or(0),
        version: non_empty(version.map(|v| strip_formatting(&v))),
        motd: non_empty(motd.map(|m| strip_formatting(&m))),
        latency_ms: None,
        player_names,
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Remove `§x` colour and style codes.
pub fn strip_formatting(text: &str) -> String {
    static CODES: OnceLock<Option<Regex>> = OnceLock::new();
    match CODES.get_or_init(|| Regex::new("§[0-9a-fk-orA-FK-OR]").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}
