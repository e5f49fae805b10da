//! SQLite database store implementation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("sample at {attempted} precedes last recorded sample at {last}")]
    NonMonotonic {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
///
/// Holds the sample table (appended by the recorder), the rollup tables
/// (upserted by the aggregator) and the per-channel notification state.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- Samples ---

    /// Append samples in one transaction. Either all rows land or none do.
    pub fn append_samples(&self, samples: &[StatusSample]) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO status_samples (timestamp, is_online, primary_players_online, primary_players_max, secondary_online, ping_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for s in samples {
                stmt.execute(params![
                    format_time(s.timestamp),
                    s.is_online,
                    s.primary_players_online,
                    s.primary_players_max,
                    s.secondary_online,
                    s.ping_ms,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Most recent sample, if any.
    pub fn latest_sample(&self) -> Result<Option<StatusSample>, StoreError> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                "SELECT timestamp, is_online, primary_players_online, primary_players_max, secondary_online, ping_ms
                 FROM status_samples ORDER BY timestamp DESC, id DESC LIMIT 1",
                [],
                sample_from_row,
            )
            .optional()?;
        Ok(sample)
    }

    /// Samples in `[start, end)` ordered by timestamp ascending.
    pub fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StatusSample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, is_online, primary_players_online, primary_players_max, secondary_online, ping_ms
             FROM status_samples
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp ASC, id ASC LIMIT ?3",
        )?;

        let samples = stmt
            .query_map(
                params![format_time(start), format_time(end), limit],
                sample_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    /// The newest `limit` samples at or after `since`, returned oldest first.
    pub fn samples_since(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<StatusSample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, is_online, primary_players_online, primary_players_max, secondary_online, ping_ms
             FROM status_samples
             WHERE timestamp >= ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;

        let mut samples = stmt
            .query_map(params![format_time(since), limit], sample_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        samples.reverse();

        Ok(samples)
    }

    /// Uptime summary over every sample at or after `since`.
    pub fn uptime_since(&self, since: DateTime<Utc>) -> Result<UptimeStats, StoreError> {
        let conn = self.conn()?;
        let (total, online, avg_players, peak, avg_ping): (i64, Option<i64>, Option<f64>, Option<i64>, Option<f64>) =
            conn.query_row(
                "SELECT COUNT(*), SUM(is_online), AVG(primary_players_online), MAX(primary_players_online), AVG(ping_ms)
                 FROM status_samples WHERE timestamp >= ?1",
                params![format_time(since)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let total_checks = total.max(0) as u32;
        let online_checks = online.unwrap_or(0).max(0) as u32;

        Ok(UptimeStats {
            percentage: uptime_percentage(online_checks, total_checks),
            total_checks,
            avg_players: round_to(avg_players.unwrap_or(0.0), 2),
            peak_players: peak.unwrap_or(0).max(0) as u32,
            avg_ping: avg_ping.map(|p| round_to(p, 2)),
        })
    }

    // --- Rollups ---

    /// Insert or replace the rollup for its hour.
    pub fn upsert_hourly_rollup(&self, rollup: &HourlyRollup) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hourly_rollups (hour_start, avg_players, peak_players, min_players, was_online, sample_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(hour_start) DO UPDATE SET
             avg_players=excluded.avg_players, peak_players=excluded.peak_players,
             min_players=excluded.min_players, was_online=excluded.was_online,
             sample_count=excluded.sample_count, updated_at=excluded.updated_at",
            params![
                format_time(rollup.hour_start),
                rollup.avg_players,
                rollup.peak_players,
                rollup.min_players,
                rollup.was_online,
                rollup.sample_count,
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Insert or replace the rollup for its date.
    pub fn upsert_daily_rollup(&self, rollup: &DailyRollup) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO daily_rollups (date, total_checks, online_checks, uptime_percentage, avg_players, peak_players, avg_ping, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(date) DO UPDATE SET
             total_checks=excluded.total_checks, online_checks=excluded.online_checks,
             uptime_percentage=excluded.uptime_percentage, avg_players=excluded.avg_players,
             peak_players=excluded.peak_players, avg_ping=excluded.avg_ping,
             updated_at=excluded.updated_at",
            params![
                rollup.date.format(DATE_FORMAT).to_string(),
                rollup.total_checks,
                rollup.online_checks,
                rollup.uptime_percentage,
                rollup.avg_players,
                rollup.peak_players,
                rollup.avg_ping,
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Hourly rollups with `hour_start` in `[start, end)`.
    pub fn hourly_rollups(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HourlyRollup>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour_start, avg_players, peak_players, min_players, was_online, sample_count
             FROM hourly_rollups
             WHERE hour_start >= ?1 AND hour_start < ?2
             ORDER BY hour_start ASC",
        )?;

        let rollups = stmt
            .query_map(params![format_time(start), format_time(end)], |row| {
                Ok(HourlyRollup {
                    hour_start: time_column(row, 0)?,
                    avg_players: row.get(1)?,
                    peak_players: row.get(2)?,
                    min_players: row.get(3)?,
                    was_online: row.get(4)?,
                    sample_count: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rollups)
    }

    /// Daily rollups for the civil dates `first..=last`.
    pub fn daily_rollups(&self, first: NaiveDate, last: NaiveDate) -> Result<Vec<DailyRollup>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, total_checks, online_checks, uptime_percentage, avg_players, peak_players, avg_ping
             FROM daily_rollups
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date ASC",
        )?;

        let rollups = stmt
            .query_map(
                params![first.format(DATE_FORMAT).to_string(), last.format(DATE_FORMAT).to_string()],
                |row| {
                    let date_str: String = row.get(0)?;
                    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
                    })?;
                    Ok(DailyRollup {
                        date,
                        total_checks: row.get(1)?,
                        online_checks: row.get(2)?,
                        uptime_percentage: row.get(3)?,
                        avg_players: row.get(4)?,
                        peak_players: row.get(5)?,
                        avg_ping: row.get(6)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rollups)
    }

    // --- Notification state ---

    /// Stored dedupe state for a channel, if it has ever been notified.
    pub fn load_dedupe_state(&self, channel_id: &str) -> Result<Option<DedupeState>, StoreError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT last_status, last_sent_at FROM notification_state WHERE channel_id = ?1",
                params![channel_id],
                |row| {
                    let status: String = row.get(0)?;
                    let sent_at: Option<String> = row.get(1)?;
                    Ok(DedupeState {
                        last_status: KnownStatus::parse(&status),
                        last_sent_at: sent_at.and_then(|s| parse_db_time(&s)),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Replace a channel's dedupe state with `next`, but only while the stored
    /// state still equals `current`. `None` on either side means no row.
    /// Returns whether the swap happened.
    pub fn swap_dedupe_state(
        &self,
        channel_id: &str,
        current: Option<&DedupeState>,
        next: Option<&DedupeState>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = match (current, next) {
            (None, Some(next)) => conn.execute(
                "INSERT INTO notification_state (channel_id, last_status, last_sent_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id) DO NOTHING",
                params![channel_id, next.last_status.as_str(), next.last_sent_at.map(format_time)],
            )?,
            (Some(current), Some(next)) => conn.execute(
                "UPDATE notification_state SET last_status = ?4, last_sent_at = ?5
                 WHERE channel_id = ?1 AND last_status = ?2 AND last_sent_at IS ?3",
                params![
                    channel_id,
                    current.last_status.as_str(),
                    current.last_sent_at.map(format_time),
                    next.last_status.as_str(),
                    next.last_sent_at.map(format_time),
                ],
            )?,
            (Some(current), None) => conn.execute(
                "DELETE FROM notification_state
                 WHERE channel_id = ?1 AND last_status = ?2 AND last_sent_at IS ?3",
                params![
                    channel_id,
                    current.last_status.as_str(),
                    current.last_sent_at.map(format_time),
                ],
            )?,
            (None, None) => {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM notification_state WHERE channel_id = ?1)",
                    params![channel_id],
                    |row| row.get(0),
                )?;
                usize::from(!exists)
            }
        };
        Ok(changed == 1)
    }
}

/// Percentage of online checks, rounded to two decimals. `None` without data.
pub fn uptime_percentage(online_checks: u32, total_checks: u32) -> Option<f64> {
    if total_checks == 0 {
        return None;
    }
    Some(round_to(online_checks as f64 / total_checks as f64 * 100.0, 2))
}

/// Round half away from zero to the given number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn sample_from_row(row: &Row<'_>) -> SqlResult<StatusSample> {
    Ok(StatusSample {
        timestamp: time_column(row, 0)?,
        is_online: row.get(1)?,
        primary_players_online: row.get(2)?,
        primary_players_max: row.get(3)?,
        secondary_online: row.get(4)?,
        ping_ms: row.get(5)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", s).into(),
        )
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
