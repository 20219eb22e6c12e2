//! Time utilities: wire timestamps and timezone-aware local times.
//!
//! The remote sheet stores either ISO datetimes or empty strings, and create
//! requests carry local "YYYY-MM-DD HH:mm" strings.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, ScheduleError};

/// Format used by create requests and the CLI.
pub const LOCAL_MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    LOCAL_MINUTE_FORMAT,
];

pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| ScheduleError::InvalidTimestamp(format!("invalid timezone: {tz}")))
}

/// Parse a local time like "2026-02-20 23:59" in an IANA zone, returning UTC.
pub fn parse_local_to_utc(local: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let ndt = NaiveDateTime::parse_from_str(local.trim(), LOCAL_MINUTE_FORMAT).map_err(|e| {
        ScheduleError::InvalidTimestamp(format!("invalid local datetime '{local}': {e}"))
    })?;
    localize(ndt, tz, local)
}

fn localize(ndt: NaiveDateTime, tz: Tz, raw: &str) -> Result<DateTime<Utc>> {
    // Ambiguous wall times (DST fall-back) resolve to the earlier instant.
    tz.from_local_datetime(&ndt)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            ScheduleError::InvalidTimestamp(format!("nonexistent local time (DST gap?): {raw} {tz}"))
        })
}

/// Parse a timestamp as stored by the remote sheet.
///
/// Empty strings mean "not set". Offset-carrying values (RFC 3339) are taken
/// as-is; naive ones are read in `tz`.
pub fn parse_wire_timestamp(raw: &str, tz: Tz) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return localize(ndt, tz, raw).map(Some);
        }
    }
    Err(ScheduleError::InvalidTimestamp(format!(
        "unrecognized timestamp '{raw}'"
    )))
}

/// Format a UTC instant as the local "YYYY-MM-DD HH:mm" wire form.
pub fn to_local_minute(dt: DateTime<Utc>, tz: Tz) -> String {
    dt.with_timezone(&tz).format(LOCAL_MINUTE_FORMAT).to_string()
}

/// RFC 3339 in UTC, the form perform requests carry.
pub fn to_rfc3339_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
