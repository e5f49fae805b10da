//! Status transition detection.

use crate::db::{KnownStatus, StatusSample};

use super::TransitionEvent;

/// Tracks the last canonical status seen by this process.
#[derive(Debug)]
pub struct TransitionDetector {
    last_status: KnownStatus,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self {
            last_status: KnownStatus::Unknown,
        }
    }

    /// Feed the next sample. Returns an event only on a real change; the
    /// first observation just seeds the state.
    pub fn observe(&mut self, sample: &StatusSample) -> Option<TransitionEvent> {
        let current = KnownStatus::from_online(sample.is_online);
        let previous = std::mem::replace(&mut self.last_status, current);

        if previous == KnownStatus::Unknown || previous == current {
            return None;
        }

        Some(TransitionEvent {
            new_status: current,
            player_count: sample.primary_players_online,
            max_players: sample.primary_players_max,
            timestamp: sample.timestamp,
        })
    }
}

impl Default for TransitionDetector {
    fn default() -> Self {
        Self::new()
    }
}
