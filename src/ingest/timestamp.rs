// src/ingest/timestamp.rs
//! Publish-date parsing into UTC.
//!
//! Order: the source's declared `date_format`, RFC 2822, RFC 3339, unix
//! seconds, then a handful of naive layouts. Naive values are read in the
//! source's own IANA zone before conversion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

fn from_offset(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// Resolve a wall-clock time in `tz`. Ambiguous (DST fold) picks the earlier
/// instant; non-existent (DST gap) is rejected.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn with_declared_format(s: &str, fmt: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
        return localize(naive, tz);
    }
    NaiveDate::parse_from_str(s, fmt)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|n| localize(n, tz))
}

/// Parse a raw publish date. `None` means the caller falls back to fetch time.
pub fn parse_published(raw: &str, tz: Tz, declared: Option<&str>) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(fmt) = declared {
        if let Some(dt) = with_declared_format(s, fmt, tz) {
            return Some(dt);
        }
    }

    if let Some(dt) = OffsetDateTime::parse(s, &Rfc2822).ok().and_then(from_offset) {
        return Some(dt);
    }
    // chrono also accepts obsolete zone names (EST, PDT, ...).
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OffsetDateTime::parse(s, &Rfc3339).ok().and_then(from_offset) {
        return Some(dt);
    }

    if s.len() >= 9 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return localize(naive, tz);
        }
    }
    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).and_then(|n| localize(n, tz));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::{America, Europe};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rfc2822_with_offset() {
        let got = parse_published("Fri, 14 Mar 2025 13:30:00 +0300", Tz::UTC, None);
        assert_eq!(got, Some(utc(2025, 3, 14, 10, 30)));
    }

    #[test]
    fn rfc2822_with_named_zone() {
        let got = parse_published("Fri, 14 Mar 2025 08:30:00 GMT", Tz::UTC, None);
        assert_eq!(got, Some(utc(2025, 3, 14, 8, 30)));
    }

    #[test]
    fn rfc3339_ignores_source_zone() {
        let got = parse_published("2025-03-14T10:00:00+01:00", Europe::Moscow, None);
        assert_eq!(got, Some(utc(2025, 3, 14, 9, 0)));
    }

    #[test]
    fn naive_time_is_read_in_source_zone() {
        // Moscow is UTC+3 all year.
        let got = parse_published("2025-03-14 13:30:00", Europe::Moscow, None);
        assert_eq!(got, Some(utc(2025, 3, 14, 10, 30)));
        // New York in March 2025 is on EDT (UTC-4).
        let got = parse_published("2025-03-14 09:00", America::New_York, None);
        assert_eq!(got, Some(utc(2025, 3, 14, 13, 0)));
    }

    #[test]
    fn declared_format_wins() {
        let got = parse_published("14/03/25 1330", Europe::Moscow, Some("%d/%m/%y %H%M"));
        assert_eq!(got, Some(utc(2025, 3, 14, 10, 30)));
    }

    #[test]
    fn unix_seconds() {
        assert_eq!(
            parse_published("1741946400", Tz::UTC, None),
            Some(utc(2025, 3, 14, 10, 0))
        );
    }

    #[test]
    fn dst_gap_and_garbage_yield_none() {
        // 02:30 on 2025-03-09 does not exist in New York.
        assert_eq!(
            parse_published("2025-03-09 02:30", America::New_York, None),
            None
        );
        assert_eq!(parse_published("yesterday", Tz::UTC, None), None);
        assert_eq!(parse_published("   ", Tz::UTC, None), None);
    }
}
