//! Read-only views over samples and rollups.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;

use crate::civil::CivilClock;
use crate::db::{DailyRollup, HourlyRollup, StatusSample, Store, StoreError, UptimeStats};

/// Newest sample together with its freshness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestStatus {
    #[serde(flatten)]
    pub sample: StatusSample,
    pub age_secs: i64,
    /// True once the sample is older than the configured threshold.
    pub stale: bool,
}

/// Inclusive range of civil dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// `None` when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }
}

#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<Store>,
    clock: CivilClock,
    sample_limit: u32,
    stale_after: Duration,
}

impl QueryFacade {
    pub fn new(store: Arc<Store>, clock: CivilClock, sample_limit: u32, stale_after: Duration) -> Self {
        Self {
            store,
            clock,
            sample_limit: sample_limit.max(1),
            stale_after,
        }
    }

    pub fn clock(&self) -> &CivilClock {
        &self.clock
    }

    pub fn get_latest_status(&self) -> Result<Option<LatestStatus>, StoreError> {
        self.latest_status_at(Utc::now())
    }

    pub fn latest_status_at(&self, now: DateTime<Utc>) -> Result<Option<LatestStatus>, StoreError> {
        let Some(sample) = self.store.latest_sample()? else {
            return Ok(None);
        };

        let age_secs = (now - sample.timestamp).num_seconds().max(0);
        let stale = age_secs as u64 > self.stale_after.as_secs();
        Ok(Some(LatestStatus {
            sample,
            age_secs,
            stale,
        }))
    }

    /// Samples at or after `since`, oldest first, capped at the configured
    /// limit. When the cap bites the newest samples are kept.
    pub fn get_samples(&self, since: DateTime<Utc>) -> Result<Vec<StatusSample>, StoreError> {
        self.store.samples_since(since, self.sample_limit)
    }

    pub fn get_uptime(&self, hours_back: u32) -> Result<UptimeStats, StoreError> {
        self.uptime_at(hours_back, Utc::now())
    }

    pub fn uptime_at(&self, hours_back: u32, now: DateTime<Utc>) -> Result<UptimeStats, StoreError> {
        self.store.uptime_since(now - ChronoDuration::hours(hours_back as i64))
    }

    pub fn get_daily_rollups(&self, range: DateRange) -> Result<Vec<DailyRollup>, StoreError> {
        self.store.daily_rollups(range.start, range.end)
    }

    /// Hourly rollups whose civil hour falls on a date within `range`.
    pub fn get_hourly_rollups(&self, range: DateRange) -> Result<Vec<HourlyRollup>, StoreError> {
        let (start, end) = self.clock.range_bounds(range.start, range.end);
        self.store.hourly_rollups(start, end)
    }
}
