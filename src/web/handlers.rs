//! HTTP request handlers.

use super::AppState;
use crate::query::DateRange;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Longest uptime look-back accepted, in hours.
const MAX_UPTIME_HOURS: u32 = 24 * 90;
/// Longest rollup range accepted, in civil days.
const MAX_RANGE_DAYS: i64 = 366;

// ============================================================================
// Status
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.query.get_latest_status() {
        Ok(Some(latest)) => Json(latest).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No samples recorded yet").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub server_name: String,
    pub role: crate::scheduler::WriterRole,
    pub has_samples: bool,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.query.get_latest_status() {
        Ok(latest) => Json(HealthResponse {
            status: "ok",
            server_name: state.config.server_name.clone(),
            role: state.config.role,
            has_samples: latest.is_some(),
        })
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

// ============================================================================
// Samples and uptime
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    /// RFC 3339 timestamp. Defaults to one hour ago.
    pub since: Option<String>,
}

pub async fn handle_get_samples(
    State(state): State<AppState>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    let since = match query.since.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => return (StatusCode::BAD_REQUEST, "Invalid since timestamp").into_response(),
        },
        None => Utc::now() - ChronoDuration::hours(1),
    };

    match state.query.get_samples(since) {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default = "default_uptime_hours")]
    pub hours: u32,
}

fn default_uptime_hours() -> u32 {
    24
}

pub async fn handle_get_uptime(
    State(state): State<AppState>,
    Query(query): Query<UptimeQuery>,
) -> impl IntoResponse {
    if query.hours == 0 || query.hours > MAX_UPTIME_HOURS {
        return (
            StatusCode::BAD_REQUEST,
            format!("hours must be between 1 and {}", MAX_UPTIME_HOURS),
        )
            .into_response();
    }

    match state.query.get_uptime(query.hours) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Rollups
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// Civil date, `YYYY-MM-DD`.
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Resolve a date range, defaulting to the `default_days` civil days ending today.
fn parse_range(state: &AppState, query: &RangeQuery, default_days: i64) -> Result<DateRange, String> {
    let today = state.query.clock().civil_date(Utc::now());

    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("Invalid date: {}", raw))
    };

    let end = match query.end.as_deref() {
        Some(raw) => parse(raw)?,
        None => today,
    };
    let start = match query.start.as_deref() {
        Some(raw) => parse(raw)?,
        None => end - ChronoDuration::days(default_days - 1),
    };

    let range = DateRange::new(start, end).ok_or_else(|| "start must not be after end".to_string())?;
    if (range.end - range.start).num_days() >= MAX_RANGE_DAYS {
        return Err(format!("range must not exceed {} days", MAX_RANGE_DAYS));
    }
    Ok(range)
}

pub async fn handle_get_daily_rollups(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    let range = match parse_range(&state, &query, 7) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.query.get_daily_rollups(range) {
        Ok(rollups) => Json(rollups).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_hourly_rollups(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    let range = match parse_range(&state, &query, 1) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.query.get_hourly_rollups(range) {
        Ok(rollups) => Json(rollups).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
