//! Flexible timestamp parsing for query parameters.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse either a decimal unix epoch ("1704067200.5") or an ISO-8601
/// datetime ("2024-01-01T00:00:00Z"); a trailing `Z` is normalized to
/// `+00:00` and a missing offset means UTC.
pub fn parse_timestamp(value: &str) -> Result<f64, String> {
    if let Ok(unix) = value.parse::<f64>() {
        return Ok(unix);
    }

    let normalized = value.replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().timestamp() as f64
            + naive.and_utc().timestamp_subsec_nanos() as f64 / 1e9);
    }

    Err(format!(
        "invalid timestamp format: '{value}'; expected unix seconds \
         (e.g. '1704067200.5') or ISO datetime (e.g. '2024-01-01T00:00:00Z')"
    ))
}

/// Unix seconds with microsecond precision.
pub fn format_unix(t: f64) -> String {
    format!("{t:.6}")
}

/// RFC 3339 UTC rendering of unix seconds.
pub fn format_iso(t: f64) -> String {
    let secs = t.floor() as i64;
    let nanos = ((t - t.floor()) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"))
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_round_trip() {
        let t = 1704067200.5;
        assert_eq!(parse_timestamp(&format_unix(t)).unwrap(), t);
    }

    #[test]
    fn test_iso_round_trip_within_a_millisecond() {
        let t = 1704067200.1234;
        let parsed = parse_timestamp(&format_iso(t)).unwrap();
        assert!((parsed - t).abs() < 0.001, "parsed {parsed}, wanted {t}");
    }

    #[test]
    fn test_z_suffix_normalized() {
        let with_z = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let with_offset = parse_timestamp("2024-01-01T00:00:00+00:00").unwrap();
        assert_eq!(with_z, with_offset);
        assert_eq!(with_z, 1704067200.0);
    }

    #[test]
    fn test_naive_datetime_is_utc() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00").unwrap(),
            1704067200.0
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
    }
}
