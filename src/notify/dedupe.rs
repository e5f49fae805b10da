//! Per-channel dedupe state storage.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::{DedupeState, Store, StoreError};

/// Storage for [`DedupeState`], keyed by channel id. Only the notifier
/// reads or writes it.
pub trait DedupeStore: Send + Sync {
    fn load(&self, channel_id: &str) -> Result<Option<DedupeState>, StoreError>;

    /// Set the state to `next` only if it still equals `current`, where
    /// `None` means the channel has no state. Returns whether it was set.
    fn swap(
        &self,
        channel_id: &str,
        current: Option<&DedupeState>,
        next: Option<&DedupeState>,
    ) -> Result<bool, StoreError>;
}

/// Process-local dedupe state.
#[derive(Default)]
pub struct MemoryDedupeStore {
    states: Mutex<HashMap<String, DedupeState>>,
}

impl MemoryDedupeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupeStore for MemoryDedupeStore {
    fn load(&self, channel_id: &str) -> Result<Option<DedupeState>, StoreError> {
        let states = self.states.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(states.get(channel_id).copied())
    }

    fn swap(
        &self,
        channel_id: &str,
        current: Option<&DedupeState>,
        next: Option<&DedupeState>,
    ) -> Result<bool, StoreError> {
        let mut states = self.states.lock().map_err(|_| StoreError::Poisoned)?;
        if states.get(channel_id) != current {
            return Ok(false);
        }
        match next {
            Some(state) => states.insert(channel_id.to_string(), *state),
            None => states.remove(channel_id),
        };
        Ok(true)
    }
}

/// Dedupe state persisted in the `notification_state` table, shared by
/// every process pointed at the same database.
impl DedupeStore for Store {
    fn load(&self, channel_id: &str) -> Result<Option<DedupeState>, StoreError> {
        self.load_dedupe_state(channel_id)
    }

    fn swap(
        &self,
        channel_id: &str,
        current: Option<&DedupeState>,
        next: Option<&DedupeState>,
    ) -> Result<bool, StoreError> {
        self.swap_dedupe_state(channel_id, current, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::KnownStatus;
    use chrono::Utc;

    #[test]
    fn test_memory_store_swap_and_load() {
        let store = MemoryDedupeStore::new();
        assert!(store.load("a").unwrap().is_none());

        let state = DedupeState {
            last_status: KnownStatus::Online,
            last_sent_at: Some(Utc::now()),
        };
        assert!(store.swap("a", None, Some(&state)).unwrap());
        assert_eq!(store.load("a").unwrap(), Some(state));
        assert!(store.load("b").unwrap().is_none());

        // Lost race: the expected state is already gone.
        assert!(!store.swap("a", None, Some(&state)).unwrap());

        assert!(store.swap("a", Some(&state), None).unwrap());
        assert!(store.load("a").unwrap().is_none());
    }
}
