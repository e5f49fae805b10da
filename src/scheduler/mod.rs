//! Scheduler module for sampling, aggregation and periodic stats.

mod recorder;
mod rollup;
mod sampler;

pub use recorder::*;
pub use rollup::*;
pub use sampler::*;

use crate::config::ServerConfig;
use crate::db::{Store, StoreError};
use crate::notify::{Notifier, StatsEvent};
use crate::probe::{HttpSource, ProbeError, StatusSource};
use crate::query::QueryFacade;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Whether this process writes samples and rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterRole {
    /// Records samples and owns aggregation.
    #[default]
    Authoritative,
    /// Samples and notifies only. Another process is the write-of-record.
    ReadOnly,
}

impl WriterRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "authoritative" => Some(Self::Authoritative),
            "read_only" | "readonly" | "read-only" => Some(Self::ReadOnly),
            _ => None,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, Self::Authoritative)
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("primary source {0} is not configured")]
    UnknownPrimary(String),
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Owns the sampler, aggregator and stats loops.
pub struct Scheduler {
    config: ServerConfig,
    store: Arc<Store>,
    query: Arc<QueryFacade>,
    notifier: Option<Arc<Notifier>>,
    stop_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        query: Arc<QueryFacade>,
        notifier: Option<Arc<Notifier>>,
    ) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            query,
            notifier,
            stop_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Build the configured sources and spawn every loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let sources = self
            .config
            .sources
            .iter()
            .map(|c| HttpSource::new(c.clone()).map(|s| Arc::new(s) as Arc<dyn StatusSource>))
            .collect::<Result<Vec<_>, _>>()?;

        let sampler = Sampler::new(
            self.config.role,
            sources,
            &self.config.primary_source,
            self.config.latency_cap_ms,
            self.store.clone(),
            self.notifier.clone(),
        )?
        .with_max_pending(self.config.max_pending_samples);

        tracing::info!(
            "Starting scheduler: {} sources, role {:?}, poll every {:?}",
            self.config.sources.len(),
            self.config.role,
            self.config.poll_interval()
        );

        handles.push(tokio::spawn(run_sampler_loop(
            sampler,
            self.config.poll_interval(),
            self.stop_tx.subscribe(),
        )));

        // Aggregation and stats reports belong to the write-of-record only.
        if self.config.role.is_authoritative() {
            let aggregator = Aggregator::new(self.store.clone(), self.config.civil_clock());
            handles.push(tokio::spawn(run_aggregator_loop(
                aggregator,
                self.config.aggregation_interval(),
                self.stop_tx.subscribe(),
            )));

            if let Some(notifier) = &self.notifier {
                handles.push(tokio::spawn(run_stats_loop(
                    self.query.clone(),
                    notifier.clone(),
                    self.config.stats_interval(),
                    self.stop_tx.subscribe(),
                )));
            }
        }

        Ok(())
    }

    /// Signal every loop to stop and wait for in-flight ticks to finish.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(());
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn run_sampler_loop(mut sampler: Sampler, period: Duration, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
        }

        let outcome = sampler.tick(Utc::now()).await;
        for reading in &outcome.readings {
            match &reading.snapshot {
                Some(snapshot) => tracing::debug!(
                    "Source {}: online={} players={}/{} latency={:?}",
                    reading.source,
                    snapshot.online,
                    snapshot.players_online,
                    snapshot.players_max,
                    snapshot.latency_ms
                ),
                None => tracing::debug!("Source {}: no reading", reading.source),
            }
        }
        tracing::debug!(
            "Sampled: online={} players={} ping={:?} recorded={}",
            outcome.sample.is_online,
            outcome.sample.primary_players_online,
            outcome.sample.ping_ms,
            outcome.recorded
        );

        if let (Some(event), Some(report)) = (&outcome.transition, &outcome.report) {
            if report.failed() > 0 {
                tracing::warn!(
                    "Status {} reached {} of {} channels",
                    event.new_status,
                    report.delivered(),
                    report.outcomes.len()
                );
            }
        }
    }
}

async fn run_aggregator_loop(aggregator: Aggregator, period: Duration, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
        }

        aggregator.process(Utc::now());
    }
}

async fn run_stats_loop(
    query: Arc<QueryFacade>,
    notifier: Arc<Notifier>,
    period: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    // First report after one full period rather than at startup.
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
        }

        let now = Utc::now();
        match build_stats_event(&query, now) {
            Ok(Some(event)) => {
                if let Some(report) = notifier.notify_stats(&event, now).await {
                    tracing::info!(
                        "Stats sent: {} delivered, {} failed",
                        report.delivered(),
                        report.failed()
                    );
                }
            }
            Ok(None) => tracing::debug!("No samples yet, skipping stats"),
            Err(e) => tracing::error!("Failed to compute stats: {}", e),
        }
    }
}

/// Stats for the last 24 hours plus the current player count.
pub fn build_stats_event(query: &QueryFacade, now: chrono::DateTime<Utc>) -> Result<Option<StatsEvent>, StoreError> {
    let Some(latest) = query.latest_status_at(now)? else {
        return Ok(None);
    };
    let uptime = query.uptime_at(24, now)?;

    Ok(Some(StatsEvent {
        players_online: latest.sample.primary_players_online,
        players_max: latest.sample.primary_players_max,
        uptime_percentage: uptime.percentage,
        avg_ping: uptime.avg_ping,
        avg_players: uptime.avg_players,
        peak_players: uptime.peak_players,
        timestamp: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civil::CivilClock;
    use crate::db::StatusSample;
    use crate::notify::{MemoryDedupeStore, NotifierConfig};
    use crate::probe::SourceConfig;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    #[test]
    fn test_writer_role_parse() {
        assert_eq!(WriterRole::parse("authoritative"), Some(WriterRole::Authoritative));
        assert_eq!(WriterRole::parse("READ_ONLY"), Some(WriterRole::ReadOnly));
        assert_eq!(WriterRole::parse("primary"), None);
        assert_eq!(serde_json::to_string(&WriterRole::ReadOnly).unwrap(), "\"read_only\"");
    }

    #[test]
    fn test_build_stats_event() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let query = QueryFacade::new(store.clone(), CivilClock::default(), 1000, Duration::from_secs(30));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        assert!(build_stats_event(&query, now).unwrap().is_none());

        store
            .append_samples(&[
                StatusSample {
                    timestamp: now - ChronoDuration::minutes(2),
                    is_online: true,
                    primary_players_online: 20,
                    primary_players_max: 50,
                    secondary_online: true,
                    ping_ms: Some(80),
                },
                StatusSample {
                    timestamp: now - ChronoDuration::minutes(1),
                    is_online: true,
                    primary_players_online: 10,
                    primary_players_max: 50,
                    secondary_online: true,
                    ping_ms: Some(40),
                },
            ])
            .unwrap();

        let event = build_stats_event(&query, now).unwrap().unwrap();
        assert_eq!(event.players_online, 10);
        assert_eq!(event.players_max, 50);
        assert_eq!(event.uptime_percentage, Some(100.0));
        assert_eq!(event.avg_players, 15.0);
        assert_eq!(event.peak_players, 20);
        assert_eq!(event.avg_ping, Some(60.0));
    }

    fn local_scheduler(role: WriterRole, notifier: Option<Arc<Notifier>>) -> (NamedTempFile, Scheduler) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let query = Arc::new(QueryFacade::new(
            store.clone(),
            CivilClock::default(),
            1000,
            Duration::from_secs(30),
        ));

        let mut config = ServerConfig::default();
        config.role = role;
        config.poll_interval_secs = 3600;
        config.primary_source = "local".to_string();
        config.sources = vec![SourceConfig {
            name: "local".to_string(),
            kind: crate::probe::SourceKind::Java,
            provider: crate::probe::Provider::McStatus,
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_ms: 50,
        }];

        (tmp, Scheduler::new(config, store, query, notifier))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (_tmp, scheduler) = local_scheduler(WriterRole::ReadOnly, None);
        scheduler.start().await.unwrap();
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyStarted)));

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_loop_runs_only_for_the_writer() {
        let notifier = || {
            Some(Arc::new(Notifier::new(
                Vec::new(),
                Arc::new(MemoryDedupeStore::new()),
                NotifierConfig::default(),
            )))
        };

        // Sampler only.
        let (_tmp, read_only) = local_scheduler(WriterRole::ReadOnly, notifier());
        read_only.start().await.unwrap();
        assert_eq!(read_only.handles.lock().await.len(), 1);
        read_only.stop().await;

        // Sampler, aggregator and stats.
        let (_tmp, writer) = local_scheduler(WriterRole::Authoritative, notifier());
        writer.start().await.unwrap();
        assert_eq!(writer.handles.lock().await.len(), 3);
        writer.stop().await;
    }
}
