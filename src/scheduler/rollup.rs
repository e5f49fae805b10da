//! Hourly and daily rollups over the civil calendar.

use crate::civil::CivilClock;
use crate::db::{round_to, uptime_percentage, DailyRollup, HourlyRollup, StatusSample, Store, StoreError};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;

/// Row cap when reading one bucket back from the store.
const BUCKET_SAMPLE_LIMIT: u32 = u32::MAX;

/// Summarize the samples of one civil hour. `None` when the hour is empty.
pub fn summarize_hour(hour_start: DateTime<Utc>, samples: &[StatusSample]) -> Option<HourlyRollup> {
    if samples.is_empty() {
        return None;
    }

    let total: u64 = samples.iter().map(|s| s.primary_players_online as u64).sum();
    let peak = samples.iter().map(|s| s.primary_players_online).max().unwrap_or(0);
    let min = samples.iter().map(|s| s.primary_players_online).min().unwrap_or(0);

    Some(HourlyRollup {
        hour_start,
        avg_players: round_to(total as f64 / samples.len() as f64, 1),
        peak_players: peak,
        min_players: min,
        was_online: samples.iter().any(|s| s.is_online),
        sample_count: samples.len() as u32,
    })
}

/// Summarize the samples of one civil day.
pub fn summarize_day(date: NaiveDate, samples: &[StatusSample]) -> DailyRollup {
    let total_checks = samples.len() as u32;
    let online_checks = samples.iter().filter(|s| s.is_online).count() as u32;

    let avg_players = if samples.is_empty() {
        0.0
    } else {
        let total: u64 = samples.iter().map(|s| s.primary_players_online as u64).sum();
        round_to(total as f64 / samples.len() as f64, 2)
    };

    let pings: Vec<u32> = samples.iter().filter_map(|s| s.ping_ms).collect();
    let avg_ping = if pings.is_empty() {
        None
    } else {
        let total: u64 = pings.iter().map(|p| *p as u64).sum();
        Some(round_to(total as f64 / pings.len() as f64, 2))
    };

    DailyRollup {
        date,
        total_checks,
        online_checks,
        uptime_percentage: uptime_percentage(online_checks, total_checks),
        avg_players,
        peak_players: samples.iter().map(|s| s.primary_players_online).max().unwrap_or(0),
        avg_ping,
    }
}

/// Derives rollup rows from the sample store.
///
/// Every write is an upsert keyed by bucket, so reprocessing a bucket
/// converges on the same row.
pub struct Aggregator {
    store: Arc<Store>,
    clock: CivilClock,
}

impl Aggregator {
    pub fn new(store: Arc<Store>, clock: CivilClock) -> Self {
        Self { store, clock }
    }

    /// Recompute and store the rollup for the civil hour containing `instant`.
    pub fn rollup_hour(&self, instant: DateTime<Utc>) -> Result<Option<HourlyRollup>, StoreError> {
        let hour_start = self.clock.hour_start(instant);
        let hour_end = hour_start + ChronoDuration::hours(1);
        let samples = self.store.samples_between(hour_start, hour_end, BUCKET_SAMPLE_LIMIT)?;

        let rollup = summarize_hour(hour_start, &samples);
        if let Some(r) = &rollup {
            self.store.upsert_hourly_rollup(r)?;
        }
        Ok(rollup)
    }

    /// Recompute and store the rollup for a civil date.
    pub fn rollup_day(&self, date: NaiveDate) -> Result<Option<DailyRollup>, StoreError> {
        let (start, end) = self.clock.day_bounds(date);
        let samples = self.store.samples_between(start, end, BUCKET_SAMPLE_LIMIT)?;
        if samples.is_empty() {
            return Ok(None);
        }

        let rollup = summarize_day(date, &samples);
        self.store.upsert_daily_rollup(&rollup)?;
        Ok(Some(rollup))
    }

    /// Refresh the previous and current hour and the previous and current day.
    pub fn process(&self, now: DateTime<Utc>) {
        let hour = self.clock.hour_start(now);
        for instant in [hour - ChronoDuration::hours(1), hour] {
            if let Err(e) = self.rollup_hour(instant) {
                tracing::error!("Aggregator: failed hourly rollup for {}: {}", instant, e);
            }
        }

        let today = self.clock.civil_date(now);
        let days = match today.pred_opt() {
            Some(yesterday) => vec![yesterday, today],
            None => vec![today],
        };
        for date in days {
            if let Err(e) = self.rollup_day(date) {
                tracing::error!("Aggregator: failed daily rollup for {}: {}", date, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn sample(at: DateTime<Utc>, online: bool, players: u32, ping: Option<u32>) -> StatusSample {
        StatusSample {
            timestamp: at,
            is_online: online,
            primary_players_online: players,
            primary_players_max: 100,
            secondary_online: false,
            ping_ms: ping,
        }
    }

    fn setup() -> (NamedTempFile, Arc<Store>, Aggregator) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let aggregator = Aggregator::new(store.clone(), CivilClock::default());
        (tmp, store, aggregator)
    }

    #[test]
    fn test_summarize_hour() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 18, 15, 0).unwrap();
        let samples = vec![
            sample(start, false, 0, None),
            sample(start + ChronoDuration::minutes(10), true, 5, Some(30)),
            sample(start + ChronoDuration::minutes(20), true, 6, Some(40)),
        ];

        let rollup = summarize_hour(start, &samples).unwrap();
        assert_eq!(rollup.avg_players, 3.7);
        assert_eq!(rollup.peak_players, 6);
        assert_eq!(rollup.min_players, 0);
        assert!(rollup.was_online);
        assert_eq!(rollup.sample_count, 3);

        assert!(summarize_hour(start, &[]).is_none());
    }

    #[test]
    fn test_summarize_day_uptime() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 18, 15, 0).unwrap();
        let samples: Vec<_> = (0..100)
            .map(|i| {
                let online = i >= 5;
                sample(
                    base + ChronoDuration::minutes(i),
                    online,
                    if online { 10 } else { 0 },
                    online.then_some(100),
                )
            })
            .collect();

        let rollup = summarize_day(date, &samples);
        assert_eq!(rollup.total_checks, 100);
        assert_eq!(rollup.online_checks, 95);
        assert_eq!(rollup.uptime_percentage, Some(95.0));
        assert_eq!(rollup.avg_players, 9.5);
        assert_eq!(rollup.peak_players, 10);
        assert_eq!(rollup.avg_ping, Some(100.0));

        let empty = summarize_day(date, &[]);
        assert_eq!(empty.uptime_percentage, None);
        assert_eq!(empty.avg_ping, None);
    }

    #[test]
    fn test_samples_land_in_civil_buckets() {
        let (_tmp, store, aggregator) = setup();
        // 18:14Z is 23:59 local on the 15th, 18:20Z is 00:05 local on the 16th.
        let before = Utc.with_ymd_and_hms(2024, 1, 15, 18, 14, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 15, 18, 20, 0).unwrap();
        store
            .append_samples(&[sample(before, true, 3, Some(20)), sample(after, true, 8, Some(20))])
            .unwrap();

        aggregator.process(after);

        let hours = store
            .hourly_rollups(
                Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].hour_start, Utc.with_ymd_and_hms(2024, 1, 15, 17, 15, 0).unwrap());
        assert_eq!(hours[0].peak_players, 3);
        assert_eq!(hours[1].hour_start, Utc.with_ymd_and_hms(2024, 1, 15, 18, 15, 0).unwrap());
        assert_eq!(hours[1].peak_players, 8);

        let days = store
            .daily_rollups(
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            )
            .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].total_checks, 1);
        assert_eq!(days[1].peak_players, 8);
    }

    #[test]
    fn test_reprocessing_is_idempotent() {
        let (_tmp, store, aggregator) = setup();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap();
        store.append_samples(&[sample(at, true, 4, Some(50))]).unwrap();

        let first = aggregator.rollup_hour(at).unwrap();
        let second = aggregator.rollup_hour(at).unwrap();
        assert_eq!(first, second);
        aggregator.process(at);
        aggregator.process(at);

        let hour = aggregator.clock.hour_start(at);
        let rows = store.hourly_rollups(hour, hour + ChronoDuration::hours(1)).unwrap();
        assert_eq!(rows.len(), 1);

        let date = aggregator.clock.civil_date(at);
        let days = store.daily_rollups(date, date).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].total_checks, 1);
    }

    #[test]
    fn test_offline_hour_and_empty_hour() {
        let (_tmp, store, aggregator) = setup();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap();
        store.append_samples(&[sample(at, false, 0, None)]).unwrap();

        let rollup = aggregator.rollup_hour(at).unwrap().unwrap();
        assert!(!rollup.was_online);

        let empty = aggregator.rollup_hour(at + ChronoDuration::hours(5)).unwrap();
        assert!(empty.is_none());
        let quiet_day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(aggregator.rollup_day(quiet_day).unwrap().is_none());
    }

    #[test]
    fn test_late_sample_updates_existing_row() {
        let (_tmp, store, aggregator) = setup();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap();
        store.append_samples(&[sample(at, true, 4, Some(50))]).unwrap();
        aggregator.rollup_hour(at).unwrap();

        store
            .append_samples(&[sample(at + ChronoDuration::minutes(5), true, 12, Some(50))])
            .unwrap();
        let updated = aggregator.rollup_hour(at).unwrap().unwrap();
        assert_eq!(updated.sample_count, 2);
        assert_eq!(updated.peak_players, 12);
        assert_eq!(updated.avg_players, 8.0);
    }
}
