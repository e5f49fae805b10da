//! Notification dispatch.
//!
//! The Notifier is responsible for:
//! - Fanning each event out to every channel concurrently
//! - Suppressing repeat status notifications inside a channel's cooldown
//! - Gating periodic stats events to a minimum interval
//!
//! A failing channel never blocks or delays the others, and a failed
//! delivery puts that channel's dedupe state back as it was. Status sends
//! are claimed in the dedupe store before delivery, so processes sharing a
//! database do not both send the same change.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::channels::NotificationChannel;
use super::dedupe::DedupeStore;
use super::events::{NotificationEvent, StatsEvent, TransitionEvent};
use super::DeliveryError;
use crate::db::DedupeState;

/// Notifier timing configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Minimum gap before the same status is sent to a channel again.
    pub cooldown: Duration,
    /// Bound on one delivery attempt.
    pub delivery_timeout: Duration,
    /// Minimum gap between stats events.
    pub stats_min_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            delivery_timeout: Duration::from_secs(10),
            stats_min_interval: Duration::from_secs(600),
        }
    }
}

/// What happened on one channel for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    Suppressed,
    Skipped,
    Failed(String),
}

/// Per-channel outcomes of one dispatch, in channel order.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(String, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.count(|o| *o == ChannelOutcome::Delivered)
    }

    pub fn suppressed(&self) -> usize {
        self.count(|o| *o == ChannelOutcome::Suppressed)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ChannelOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ChannelOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Dispatches events to channels.
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    dedupe: Arc<dyn DedupeStore>,
    config: NotifierConfig,
    last_stats_at: Mutex<Option<DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        dedupe: Arc<dyn DedupeStore>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            channels,
            dedupe,
            config,
            last_stats_at: Mutex::new(None),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send a status change to every channel not inside its cooldown.
    pub async fn notify_transition(&self, event: &TransitionEvent, now: DateTime<Utc>) -> DispatchReport {
        let wrapped = NotificationEvent::StatusChange(event.clone());
        let tasks = self
            .channels
            .iter()
            .map(|channel| self.dispatch_transition(channel.as_ref(), event, &wrapped, now));

        let report = DispatchReport {
            outcomes: join_all(tasks).await,
        };

        info!(
            "Notifier: status {} dispatched ({} delivered, {} suppressed, {} failed)",
            event.new_status,
            report.delivered(),
            report.suppressed(),
            report.failed()
        );
        report
    }

    async fn dispatch_transition(
        &self,
        channel: &dyn NotificationChannel,
        event: &TransitionEvent,
        wrapped: &NotificationEvent,
        now: DateTime<Utc>,
    ) -> (String, ChannelOutcome) {
        let id = channel.id().to_string();

        if !channel.accepts(wrapped) {
            return (id, ChannelOutcome::Skipped);
        }

        let current = match self.dedupe.load(&id) {
            Ok(state) => state,
            Err(e) => {
                warn!("Notifier: failed to load dedupe state for {}: {}", id, e);
                None
            }
        };

        if self.in_cooldown(&current.unwrap_or_default(), event, now) {
            debug!("Notifier: suppressing repeat {} on {}", event.new_status, id);
            return (id, ChannelOutcome::Suppressed);
        }

        // A lost claim means another dispatcher already owns this send.
        let claimed = DedupeState {
            last_status: event.new_status,
            last_sent_at: Some(now),
        };
        match self.dedupe.swap(&id, current.as_ref(), Some(&claimed)) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Notifier: {} on {} already claimed elsewhere", event.new_status, id);
                return (id, ChannelOutcome::Suppressed);
            }
            Err(e) => warn!("Notifier: failed to claim dedupe state for {}: {}", id, e),
        }

        match self.deliver(channel, wrapped).await {
            Ok(()) => (id, ChannelOutcome::Delivered),
            Err(e) => {
                warn!("Notifier: delivery to {} failed: {}", id, e);
                if let Err(e) = self.dedupe.swap(&id, Some(&claimed), current.as_ref()) {
                    warn!("Notifier: failed to release dedupe state for {}: {}", id, e);
                }
                (id, ChannelOutcome::Failed(e.to_string()))
            }
        }
    }

    fn in_cooldown(&self, state: &DedupeState, event: &TransitionEvent, now: DateTime<Utc>) -> bool {
        if state.last_status != event.new_status {
            return false;
        }
        let Some(sent_at) = state.last_sent_at else {
            return false;
        };
        let cooldown = ChronoDuration::from_std(self.config.cooldown).unwrap_or(ChronoDuration::zero());
        now.signed_duration_since(sent_at) < cooldown
    }

    /// Send a stats summary to every channel, unless one was sent within the
    /// minimum interval. Returns `None` when gated.
    pub async fn notify_stats(&self, event: &StatsEvent, now: DateTime<Utc>) -> Option<DispatchReport> {
        if !self.claim_stats_slot(now) {
            debug!("Notifier: stats event gated");
            return None;
        }

        let wrapped = NotificationEvent::PlayerStats(event.clone());
        let tasks = self.channels.iter().map(|channel| {
            let wrapped = &wrapped;
            async move {
                let id = channel.id().to_string();
                if !channel.accepts(wrapped) {
                    return (id, ChannelOutcome::Skipped);
                }
                match self.deliver(channel.as_ref(), wrapped).await {
                    Ok(()) => (id, ChannelOutcome::Delivered),
                    Err(e) => {
                        warn!("Notifier: stats delivery to {} failed: {}", id, e);
                        (id, ChannelOutcome::Failed(e.to_string()))
                    }
                }
            }
        });

        let report = DispatchReport {
            outcomes: join_all(tasks).await,
        };
        debug!(
            "Notifier: stats dispatched ({} delivered, {} failed)",
            report.delivered(),
            report.failed()
        );
        Some(report)
    }

    /// The gate advances on every attempt, delivered or not.
    fn claim_stats_slot(&self, now: DateTime<Utc>) -> bool {
        let Ok(mut last) = self.last_stats_at.lock() else {
            return false;
        };
        let min = ChronoDuration::from_std(self.config.stats_min_interval).unwrap_or(ChronoDuration::zero());
        if let Some(prev) = *last {
            if now.signed_duration_since(prev) < min {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    async fn deliver(&self, channel: &dyn NotificationChannel, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let timeout = self.config.delivery_timeout;
        match tokio::time::timeout(timeout, channel.deliver(event)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }
}
