//! Civil calendar bucketing.
//!
//! Hourly and daily buckets are defined against a fixed local offset rather
//! than UTC. Every component that groups samples by hour or day goes through
//! [`CivilClock`] so the aggregator and the read API can never disagree.

use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    Timelike, Utc,
};

/// Largest offset accepted, matching the range chrono allows.
const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// Default civil offset: +05:45.
pub const DEFAULT_OFFSET_MINUTES: i32 = 345;

/// Fixed-offset civil clock. No daylight-saving rules ever apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilClock {
    offset: FixedOffset,
}

impl CivilClock {
    /// Build a clock from an offset in minutes east of UTC.
    ///
    /// Returns `None` when the offset is outside ±18 hours.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        if minutes.abs() > MAX_OFFSET_MINUTES {
            return None;
        }
        FixedOffset::east_opt(minutes * 60).map(|offset| Self { offset })
    }

    /// Offset in minutes east of UTC.
    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    fn offset_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.offset.local_minus_utc() as i64)
    }

    /// Wall-clock time in the civil calendar for a UTC instant.
    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.naive_utc() + self.offset_duration()
    }

    /// Civil date containing the instant.
    pub fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local_time(instant).date()
    }

    /// UTC instant at which the civil hour containing `instant` begins.
    pub fn hour_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.local_time(instant);
        let truncated = local
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(local);
        self.to_utc(truncated)
    }

    /// UTC bounds `[start, end)` of a civil date.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.to_utc(date.and_time(NaiveTime::MIN));
        (start, start + ChronoDuration::days(1))
    }

    /// UTC bounds `[start, end)` covering the civil dates `first..=last`.
    pub fn range_bounds(&self, first: NaiveDate, last: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let (start, _) = self.day_bounds(first);
        let (_, end) = self.day_bounds(last);
        (start, end)
    }

    /// Format an instant as civil wall-clock text for human-facing messages.
    pub fn format(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format("%b %-d, %Y, %-I:%M %p")
            .to_string()
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(local - self.offset_duration(), Utc)
    }
}

impl Default for CivilClock {
    fn default() -> Self {
        Self::from_offset_minutes(DEFAULT_OFFSET_MINUTES).unwrap_or(Self { offset: Utc.fix() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nepal() -> CivilClock {
        CivilClock::from_offset_minutes(345).unwrap()
    }

    #[test]
    fn test_bucket_for_sample_after_local_midnight() {
        let clock = nepal();
        let sample = Utc.with_ymd_and_hms(2024, 1, 15, 18, 20, 0).unwrap();

        let local = clock.local_time(sample);
        assert_eq!(
            local,
            NaiveDate::from_ymd_opt(2024, 1, 16).unwrap().and_hms_opt(0, 5, 0).unwrap()
        );

        assert_eq!(
            clock.hour_start(sample),
            Utc.with_ymd_and_hms(2024, 1, 15, 18, 15, 0).unwrap()
        );
        assert_eq!(clock.civil_date(sample), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
    }

    #[test]
    fn test_hour_start_is_exact_to_the_minute() {
        let clock = nepal();
        // 18:14:59Z is 23:59:59 local, still the previous civil hour and day.
        let sample = Utc.with_ymd_and_hms(2024, 1, 15, 18, 14, 59).unwrap();
        assert_eq!(
            clock.hour_start(sample),
            Utc.with_ymd_and_hms(2024, 1, 15, 17, 15, 0).unwrap()
        );
        assert_eq!(clock.civil_date(sample), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_day_bounds() {
        let clock = nepal();
        let (start, end) = clock.day_bounds(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 15, 18, 15, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 16, 18, 15, 0).unwrap());
    }

    #[test]
    fn test_negative_offset() {
        let clock = CivilClock::from_offset_minutes(-210).unwrap();
        let sample = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        // 22:30 local on Feb 29
        assert_eq!(clock.civil_date(sample), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(
            clock.hour_start(sample),
            Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_rejects_out_of_range_offset() {
        assert!(CivilClock::from_offset_minutes(19 * 60).is_none());
        assert!(CivilClock::from_offset_minutes(-19 * 60).is_none());
        assert_eq!(CivilClock::default().offset_minutes(), 345);
    }
}
