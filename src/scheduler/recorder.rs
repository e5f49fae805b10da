//! Append path into the sample store.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{StatusSample, Store, StoreError};

/// Pending samples kept across failed appends.
const DEFAULT_MAX_PENDING: usize = 1000;

/// Sole writer of `status_samples` in a process.
///
/// Samples that fail to land stay buffered and are flushed, oldest first,
/// together with the next sample.
pub struct Recorder {
    store: Arc<Store>,
    pending: VecDeque<StatusSample>,
    last_timestamp: Option<DateTime<Utc>>,
    max_pending: usize,
}

impl Recorder {
    /// Create a recorder, resuming monotonicity from the newest stored sample.
    pub fn new(store: Arc<Store>) -> Result<Self, StoreError> {
        let last_timestamp = store.latest_sample()?.map(|s| s.timestamp);
        Ok(Self {
            store,
            pending: VecDeque::new(),
            last_timestamp,
            max_pending: DEFAULT_MAX_PENDING,
        })
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append one sample, flushing anything left over from earlier failures.
    pub fn append(&mut self, sample: StatusSample) -> Result<(), StoreError> {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp < last {
                return Err(StoreError::NonMonotonic {
                    last,
                    attempted: sample.timestamp,
                });
            }
        }

        self.last_timestamp = Some(sample.timestamp);
        self.pending.push_back(sample);

        while self.pending.len() > self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::error!(
                    "Recorder: pending buffer full, dropping sample from {}",
                    dropped.timestamp
                );
            }
        }

        self.flush()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        self.store.append_samples(self.pending.make_contiguous())?;
        if self.pending.len() > 1 {
            tracing::info!("Recorder: flushed {} buffered samples", self.pending.len());
        }
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn sample(secs: i64) -> StatusSample {
        StatusSample {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs),
            is_online: true,
            primary_players_online: 1,
            primary_players_max: 10,
            secondary_online: false,
            ping_ms: Some(20),
        }
    }

    /// Make appends fail by moving the table out from under the store.
    fn rename_samples_table(tmp: &NamedTempFile, from: &str, to: &str) {
        let conn = rusqlite::Connection::open(tmp.path()).unwrap();
        conn.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", from, to))
            .unwrap();
    }

    #[test]
    fn test_append_and_reject_regression() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut recorder = Recorder::new(store.clone()).unwrap();

        recorder.append(sample(10)).unwrap();
        recorder.append(sample(10)).unwrap();
        let err = recorder.append(sample(5)).unwrap_err();
        assert!(matches!(err, StoreError::NonMonotonic { .. }));

        let stored = store
            .samples_between(sample(0).timestamp, sample(60).timestamp, 100)
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_resumes_from_stored_samples() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        store.append_samples(&[sample(30)]).unwrap();

        let mut recorder = Recorder::new(store).unwrap();
        assert_eq!(recorder.last_timestamp(), Some(sample(30).timestamp));
        assert!(recorder.append(sample(20)).is_err());
    }

    #[test]
    fn test_failed_append_is_retried_with_next_sample() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut recorder = Recorder::new(store.clone()).unwrap();

        rename_samples_table(&tmp, "status_samples", "status_samples_off");
        assert!(recorder.append(sample(10)).is_err());
        assert_eq!(recorder.pending_len(), 1);

        rename_samples_table(&tmp, "status_samples_off", "status_samples");
        recorder.append(sample(20)).unwrap();
        assert_eq!(recorder.pending_len(), 0);

        let stored = store
            .samples_between(sample(0).timestamp, sample(60).timestamp, 100)
            .unwrap();
        assert_eq!(stored, vec![sample(10), sample(20)]);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut recorder = Recorder::new(store.clone()).unwrap().with_max_pending(2);

        rename_samples_table(&tmp, "status_samples", "status_samples_off");
        for i in 1..=5 {
            assert!(recorder.append(sample(i)).is_err());
        }
        assert_eq!(recorder.pending_len(), 2);
    }
}
