use crate::error::PaymentError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed-width RFC3339 (UTC, millis, `Z`), so stored values sort lexically.
pub fn to_storage_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reads timestamps written by [`to_storage_string`], plus the plain
/// `YYYY-MM-DD HH:MM:SS` form SQLite's `CURRENT_TIMESTAMP` produces (UTC).
pub fn parse_datetime_string(s: &str) -> crate::error::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let plain = s.strip_suffix(" UTC").unwrap_or(s);
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(plain, DATETIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    // Postgres text output: `+00` / `+0000` offsets
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Err(PaymentError::TimeParse(format!("unrecognized timestamp `{}`", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_strings_round_trip() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 20, 10, 20, 30).unwrap();
        let s = to_storage_string(&dt);
        assert_eq!(s, "2026-01-20T10:20:30.000Z");
        assert_eq!(parse_datetime_string(&s).unwrap(), dt);
    }

    #[test]
    fn storage_strings_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 20, 9, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap();
        assert!(to_storage_string(&a) < to_storage_string(&b));
    }

    #[test]
    fn sqlite_default_timestamps_are_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 20, 10, 20, 30).unwrap();
        assert_eq!(parse_datetime_string("2026-01-20 10:20:30").unwrap(), expected);
        assert_eq!(parse_datetime_string("2026-01-20 10:20:30 UTC").unwrap(), expected);
        assert_eq!(parse_datetime_string("2026-01-20 10:20:30+00").unwrap(), expected);
    }

    #[test]
    fn garbage_is_a_time_parse_error() {
        assert!(matches!(
            parse_datetime_string("yesterday"),
            Err(PaymentError::TimeParse(_))
        ));
    }
}
