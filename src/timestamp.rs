// src/timestamp.rs
//! Turns a configured "oldest age" into the absolute watermark a feed starts from.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::protocol::AgeSpec;

const EXACT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidAgeSpec {
    #[error("age in minutes is out of range: {0}")]
    BadMinutes(f64),
    #[error("expected a number of minutes, \"today\" or YYYY-MM-DD HH:mm:ss, got {0:?}")]
    Unrecognized(String),
    #[error("{0} does not exist in the local time zone")]
    NonexistentLocalTime(String),
}

fn exact_pattern() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap())
}

/// Strict resolution: returns the watermark or why the spec was rejected.
/// `now` carries the time zone that "today" and exact timestamps are read in.
pub fn try_resolve<Tz: TimeZone>(
    spec: &AgeSpec,
    now: &DateTime<Tz>,
) -> Result<DateTime<Utc>, InvalidAgeSpec> {
    match spec {
        AgeSpec::Minutes(m) => {
            let ms = (m * 60_000.0).round();
            if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
                return Err(InvalidAgeSpec::BadMinutes(*m));
            }
            Duration::try_milliseconds(ms as i64)
                .and_then(|d| now.with_timezone(&Utc).checked_sub_signed(d))
                .ok_or(InvalidAgeSpec::BadMinutes(*m))
        }
        AgeSpec::Text(s) if s.trim().eq_ignore_ascii_case("today") => {
            let midnight = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| InvalidAgeSpec::Unrecognized(s.clone()))?;
            local_to_utc(&now.timezone(), &midnight)
        }
        AgeSpec::Text(s) => {
            if !exact_pattern().is_match(s) {
                return Err(InvalidAgeSpec::Unrecognized(s.clone()));
            }
            let naive = NaiveDateTime::parse_from_str(s, EXACT_FORMAT)
                .map_err(|_| InvalidAgeSpec::Unrecognized(s.clone()))?;
            local_to_utc(&now.timezone(), &naive)
        }
    }
}

fn local_to_utc<Tz: TimeZone>(
    tz: &Tz,
    naive: &NaiveDateTime,
) -> Result<DateTime<Utc>, InvalidAgeSpec> {
    tz.from_local_datetime(naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| InvalidAgeSpec::NonexistentLocalTime(naive.to_string()))
}

/// Lenient resolution used on CONFIG: a bad spec is logged and the feed starts
/// at `now`, i.e. with no backlog.
pub fn resolve<Tz: TimeZone>(spec: &AgeSpec, now: &DateTime<Tz>) -> DateTime<Utc> {
    try_resolve(spec, now).unwrap_or_else(|e| {
        tracing::warn!(target: "config", error = %e, "invalid oldest age for feed; starting from now");
        now.with_timezone(&Utc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn minutes_count_back_from_now() {
        let now = at("2025-03-10T12:00:00Z");
        assert_eq!(resolve(&AgeSpec::Minutes(90.0), &now), at("2025-03-10T10:30:00Z"));
        assert_eq!(resolve(&AgeSpec::Minutes(0.5), &now), at("2025-03-10T11:59:30Z"));
    }

    #[test]
    fn today_is_local_midnight() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 01:30 local on the 11th is still the 10th in UTC.
        let now = at("2025-03-10T23:30:00Z").with_timezone(&tz);
        assert_eq!(resolve(&AgeSpec::from("ToDay"), &now), at("2025-03-10T22:00:00Z"));
    }

    #[test]
    fn exact_timestamp_is_read_in_local_time() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at("2025-03-10T12:00:00Z").with_timezone(&tz);
        let got = resolve(&AgeSpec::from("2025-03-01 08:15:00"), &now);
        assert_eq!(got, at("2025-03-01T13:15:00Z"));
    }

    #[test]
    fn loose_formats_are_rejected_and_fall_back_to_now() {
        let now = at("2025-03-10T12:00:00Z");
        for bad in ["2025-3-1 08:15:00", "2025-03-01T08:15:00", "yesterday", "60", ""] {
            assert!(
                try_resolve(&AgeSpec::from(bad), &now).is_err(),
                "{bad:?} should be rejected"
            );
            assert_eq!(resolve(&AgeSpec::from(bad), &now), now);
        }
        assert_eq!(
            try_resolve(&AgeSpec::from("2025-02-30 00:00:00"), &now),
            Err(InvalidAgeSpec::Unrecognized("2025-02-30 00:00:00".into()))
        );
        assert_eq!(resolve(&AgeSpec::Minutes(f64::NAN), &now), now);
        assert_eq!(resolve(&AgeSpec::Minutes(1e15), &now), now);
    }
}
