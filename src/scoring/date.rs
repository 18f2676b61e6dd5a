//! Date proximity between an activity date and a deal's stage-change date.
//!
//! Timestamps are compared as absolute instants, so `10:00+02:00` and
//! `08:00Z` are the same moment. Unparseable input fails open: the pair gets
//! no date points but is still scored on name and amount.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

/// Step table: (max whole days apart, points).
const DATE_POINTS: [(i64, u32); 4] = [(0, 30), (1, 25), (3, 20), (7, 10)];

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse the timestamp shapes the record store hands out.
///
/// Accepted: RFC 3339 with any offset, `YYYY-MM-DD HH:MM:SS+HH[:MM]`,
/// naive `YYYY-MM-DDTHH:MM:SS[.f]` / `YYYY-MM-DD HH:MM:SS[.f]` and bare
/// `YYYY-MM-DD`. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres-style text output: "2024-01-15 10:00:00+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// Whole days between two instants, order-independent.
pub fn day_difference(a: &DateTime<Utc>, b: &DateTime<Utc>) -> i64 {
    (*a - *b).num_days().abs()
}

/// Map a day difference to points.
pub fn points_for_days(days: i64) -> u32 {
    let days = days.abs();
    DATE_POINTS
        .iter()
        .find(|(max, _)| days <= *max)
        .map(|(_, pts)| *pts)
        .unwrap_or(0)
}

/// Score two raw timestamps. Returns `(day_difference, points)`; the
/// difference is `None` when either side didn't parse.
pub fn date_score(a: &str, b: &str) -> (Option<i64>, u32) {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(da), Some(db)) => {
            let days = day_difference(&da, &db);
            (Some(days), points_for_days(days))
        }
        (pa, pb) => {
            debug!(
                target: "reconcile",
                left_ok = pa.is_some(),
                right_ok = pb.is_some(),
                "unparseable date; no date points"
            );
            (None, 0)
        }
    }
}
