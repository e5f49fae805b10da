//! Probe module for game-server status sources.
//!
//! A source is one status-query endpoint for one protocol variant of the
//! server. Probing yields a typed raw payload; [`normalize`] turns it into a
//! [`StatusSnapshot`].

mod http;
mod normalize;

pub use http::*;
pub use normalize::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("source returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Protocol variant served by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Java,
    Bedrock,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Bedrock => "bedrock",
        }
    }
}

/// Public status API used to query a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// api.mcstatus.io v2
    #[default]
    McStatus,
    /// api.mcsrvstat.us v3
    McSrvStat,
}

/// One configured status source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub provider: Provider,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(default_timeout_ms())
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    /// Status-query URL for this source's provider and protocol variant.
    pub fn status_url(&self) -> String {
        match (self.provider, self.kind) {
            (Provider::McStatus, kind) => format!(
                "https://api.mcstatus.io/v2/status/{}/{}:{}",
                kind.as_str(),
                self.host,
                self.port
            ),
            (Provider::McSrvStat, SourceKind::Java) => {
                format!("https://api.mcsrvstat.us/3/{}:{}", self.host, self.port)
            }
            (Provider::McSrvStat, SourceKind::Bedrock) => {
                format!("https://api.mcsrvstat.us/bedrock/3/{}:{}", self.host, self.port)
            }
        }
    }
}

/// A successfully parsed probe response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: RawStatus,
    /// Wall-clock time of the request/response exchange.
    pub elapsed: Duration,
}

/// A status endpoint that can be probed.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Configured source name.
    fn name(&self) -> &str;

    /// Protocol variant, used to interpret the payload.
    fn kind(&self) -> SourceKind;

    /// Upper bound on one probe.
    fn timeout(&self) -> Duration;

    /// Issue one status query.
    async fn probe(&self) -> Result<RawResponse, ProbeError>;
}

/// Source backed by a public HTTP status API.
pub struct HttpSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: SourceConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("serverpulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl StatusSource for HttpSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> SourceKind {
        self.config.kind
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    async fn probe(&self) -> Result<RawResponse, ProbeError> {
        // Add jitter to avoid hitting the status API in lockstep
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        fetch_status(&self.client, &self.config.status_url(), self.config.timeout()).await
    }
}
