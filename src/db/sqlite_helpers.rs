//! SQLite helper utilities for type conversion
//!
//! Timestamps are stored as RFC 3339 TEXT with a fixed precision so that
//! lexical order matches chronological order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC timestamp as stored in SQLite
#[inline]
pub fn now_iso8601() -> String {
    datetime_to_str(Utc::now())
}

#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 string, accepting SQLite's `datetime()` format as well
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
        })
}

pub fn str_to_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) if !s.is_empty() => Ok(Some(str_to_datetime(s)?)),
        _ => Ok(None),
    }
}

/// Wrap a conversion failure as a row decode error
pub fn decode_err(e: anyhow::Error) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_datetime_roundtrip() {
        let dt = Utc::now();
        let parsed = str_to_datetime(&datetime_to_str(dt)).unwrap();
        assert_eq!(dt.timestamp_micros(), parsed.timestamp_micros());
    }

    #[test]
    fn test_sqlite_datetime_format() {
        let parsed = str_to_datetime("2024-01-15 10:30:45").unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.month(), 1);
        assert_eq!(parsed.day(), 15);
    }

    #[test]
    fn test_lexical_order_is_chronological() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert!(datetime_to_str(earlier) < datetime_to_str(later));
    }

    #[test]
    fn test_empty_optional_is_none() {
        assert_eq!(str_to_datetime_opt(Some("")).unwrap(), None);
        assert_eq!(str_to_datetime_opt(None).unwrap(), None);
    }
}
