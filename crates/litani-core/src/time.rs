//! UTC timestamp formats shared by every persisted record.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Second-precision format, e.g. `2026-03-01T09:12:45Z`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Microsecond-precision format used by the parallelism trace.
pub const TIME_FORMAT_MS: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn now_str() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

pub fn now_str_ms() -> String {
    Utc::now().format(TIME_FORMAT_MS).to_string()
}

pub fn parse(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

pub fn parse_ms(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|t| t.and_utc())
}

/// Render a duration in seconds as `02h 03m 04s`, dropping leading zero
/// units.
pub fn duration_str(seconds: i64) -> String {
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours:02}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes:02}m {seconds:02}s")
    } else {
        format!("{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_drops_leading_zero_units() {
        assert_eq!(duration_str(4), "04s");
        assert_eq!(duration_str(64), "01m 04s");
        assert_eq!(duration_str(3600 + 125), "01h 02m 05s");
        assert_eq!(duration_str(0), "00s");
    }

    #[test]
    fn round_trips_second_precision() {
        let now = now_str();
        let parsed = parse(&now).unwrap();
        assert_eq!(parsed.format(TIME_FORMAT).to_string(), now);
    }

    #[test]
    fn parses_microsecond_stamps() {
        let stamp = "2026-03-01T09:12:45.123456Z";
        let parsed = parse_ms(stamp).unwrap();
        assert_eq!(parsed.format(TIME_FORMAT).to_string(), "2026-03-01T09:12:45Z");
    }
}
