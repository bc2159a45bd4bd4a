//! Lenient timestamp handling
//!
//! Publication timestamps arrive from the API as RFC 3339 strings but may be
//! hand-edited in tabular artifacts. Anything unparseable becomes `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC) or a bare date.
pub fn parse_timestamp_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical text form used in artifacts and SQL parameters.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn serialize_optional<S>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
        None => serializer.serialize_str(""),
    }
}

pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let parsed = raw.as_deref().and_then(parse_timestamp_lenient);
    if parsed.is_none() {
        if let Some(raw) = raw.as_deref().filter(|r| !r.trim().is_empty()) {
            tracing::debug!(value = %raw, "Unparseable timestamp coerced to null");
        }
    }
    Ok(parsed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp_lenient("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());

        let offset = parse_timestamp_lenient("2024-03-01T21:30:00+09:00").unwrap();
        assert_eq!(offset, ts);
    }

    #[test]
    fn test_parse_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp_lenient("2024-03-01 12:30:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp_lenient("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_timestamp_lenient("").is_none());
        assert!(parse_timestamp_lenient("not-a-date").is_none());
        assert!(parse_timestamp_lenient("2024-13-45T99:00:00Z").is_none());
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:00.000000Z");
    }
}
