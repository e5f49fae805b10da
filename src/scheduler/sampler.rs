//! One polling tick: probe every source, build the canonical sample,
//! record it, then look for a status transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use super::{Recorder, SchedulerError, WriterRole};
use crate::db::{StatusSample, Store};
use crate::notify::{DispatchReport, Notifier, TransitionDetector, TransitionEvent};
use crate::probe::{normalize, ProbeError, StatusSnapshot, StatusSource};

/// Result of probing one source during a tick.
#[derive(Debug)]
pub struct SourceReading {
    pub source: String,
    pub snapshot: Option<StatusSnapshot>,
}

/// Everything one tick produced.
#[derive(Debug)]
pub struct TickOutcome {
    pub sample: StatusSample,
    pub readings: Vec<SourceReading>,
    pub recorded: bool,
    pub transition: Option<TransitionEvent>,
    pub report: Option<DispatchReport>,
}

pub struct Sampler {
    sources: Vec<Arc<dyn StatusSource>>,
    primary: usize,
    latency_cap_ms: u32,
    recorder: Option<Recorder>,
    detector: TransitionDetector,
    notifier: Option<Arc<Notifier>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Sampler {
    /// Build a sampler. Only an authoritative sampler gets a recorder.
    pub fn new(
        role: WriterRole,
        sources: Vec<Arc<dyn StatusSource>>,
        primary_source: &str,
        latency_cap_ms: u32,
        store: Arc<Store>,
        notifier: Option<Arc<Notifier>>,
    ) -> Result<Self, SchedulerError> {
        let primary = sources
            .iter()
            .position(|s| s.name() == primary_source)
            .ok_or_else(|| SchedulerError::UnknownPrimary(primary_source.to_string()))?;

        let recorder = match role {
            WriterRole::Authoritative => Some(Recorder::new(store)?),
            WriterRole::ReadOnly => None,
        };
        let last_timestamp = recorder.as_ref().and_then(|r| r.last_timestamp());

        Ok(Self {
            sources,
            primary,
            latency_cap_ms,
            recorder,
            detector: TransitionDetector::new(),
            notifier,
            last_timestamp,
        })
    }

    /// Cap the samples kept across failed appends.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.recorder = self.recorder.map(|r| r.with_max_pending(max_pending));
        self
    }

    /// Samples waiting for the database to accept them again.
    pub fn pending_samples(&self) -> usize {
        self.recorder.as_ref().map_or(0, |r| r.pending_len())
    }

    /// Probe all sources concurrently and fold the results into one sample.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> (StatusSample, Vec<SourceReading>) {
        let probes = self.sources.iter().map(|source| {
            let source = source.clone();
            async move {
                let timeout = source.timeout();
                let result = match tokio::time::timeout(timeout, source.probe()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeError::Timeout(timeout)),
                };
                (source, result)
            }
        });
        let results = join_all(probes).await;

        let mut readings = Vec::with_capacity(results.len());
        for (source, result) in results {
            let snapshot = match result {
                Ok(response) => {
                    let mut snapshot = normalize(&response.status, source.kind());
                    if snapshot.online {
                        let ms = response.elapsed.as_millis().min(u32::MAX as u128) as u32;
                        snapshot.latency_ms = Some(ms.min(self.latency_cap_ms));
                    }
                    Some(snapshot)
                }
                Err(e) => {
                    tracing::warn!("Probe failed for {}: {}", source.name(), e);
                    None
                }
            };
            readings.push(SourceReading {
                source: source.name().to_string(),
                snapshot,
            });
        }

        let timestamp = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        (self.build_sample(timestamp, &readings), readings)
    }

    fn build_sample(&self, timestamp: DateTime<Utc>, readings: &[SourceReading]) -> StatusSample {
        let secondary_online = readings
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.primary)
            .any(|(_, r)| r.snapshot.as_ref().is_some_and(|s| s.online));

        match readings.get(self.primary).and_then(|r| r.snapshot.as_ref()) {
            Some(primary) if primary.online => StatusSample {
                timestamp,
                is_online: true,
                primary_players_online: primary.players_online,
                primary_players_max: primary.players_max,
                secondary_online,
                ping_ms: primary.latency_ms,
            },
            _ => StatusSample::offline(timestamp, secondary_online),
        }
    }

    /// Run one full tick. Recording happens before detection so a crash
    /// between them never yields a notification without its sample.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let (sample, readings) = self.poll(now).await;

        let mut recorded = false;
        if let Some(recorder) = self.recorder.as_mut() {
            match recorder.append(sample.clone()) {
                Ok(()) => recorded = true,
                Err(e) => tracing::error!(
                    "Failed to record sample ({} pending): {}",
                    recorder.pending_len(),
                    e
                ),
            }
        }

        let transition = self.detector.observe(&sample);
        let mut report = None;
        if let Some(event) = &transition {
            tracing::info!("Server is now {}", event.new_status);
            if let Some(notifier) = &self.notifier {
                report = Some(notifier.notify_transition(event, now).await);
            }
        }

        TickOutcome {
            sample,
            readings,
            recorded,
            transition,
            report,
        }
    }
}
