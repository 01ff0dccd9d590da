//! Timestamp helpers for storage and display
//!
//! All instants are UTC. Storage uses a fixed-width text format so that
//! lexical comparison in SQL matches chronological order.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

/// Storage format, second precision
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used when a due date is rendered into a message
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Whether `%Y` renders the instant with exactly four digits; outside that
/// range the stored text no longer sorts chronologically
pub fn is_storable(dt: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&dt.year())
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid stored timestamp '{raw}'"))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Drop sub-second precision so in-memory values match what storage round-trips
pub fn truncate_to_second(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_and_parse() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 9, 8, 30, 0).unwrap();
        assert_eq!(format_timestamp(&dt), "2025-01-09 08:30:00");
        assert_eq!(parse_timestamp("2025-01-09 08:30:00").unwrap(), dt);
        assert!(parse_timestamp("2025-01-09T08:30:00Z").is_err());
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }

    #[test]
    fn test_storable_range_is_four_digit_years() {
        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let beyond = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(-1, 12, 31, 0, 0, 0).unwrap();
        assert!(is_storable(&last));
        assert!(!is_storable(&beyond));
        assert!(!is_storable(&before));
        assert!(format_timestamp(&beyond) < format_timestamp(&last));
    }

    #[test]
    fn test_truncate_to_second() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        assert_eq!(
            truncate_to_second(dt),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap()
        );
    }
}
