// src/window.rs
//! Request-scoped time window: `since = "all" | "<n><h|d|w>"`.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    fn suffix(&self) -> char {
        match self {
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
            TimeUnit::Week => 'w',
        }
    }
}

/// Lower bound on `published_at`; `value == 0` means no bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeFilter {
    pub value: u32,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeFilterError {
    #[error("invalid time filter `{0}`: use `all` or e.g. 24h, 7d, 2w")]
    Malformed(String),
    #[error("time filter `{0}` is out of range")]
    OutOfRange(String),
}

static RE_SINCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+)\s*([hdw])\s*$").expect("since regex"));

impl TimeFilter {
    pub const ALL: TimeFilter = TimeFilter {
        value: 0,
        unit: TimeUnit::Hour,
    };

    pub fn hours(value: u32) -> Self {
        Self {
            value,
            unit: TimeUnit::Hour,
        }
    }

    pub fn days(value: u32) -> Self {
        Self {
            value,
            unit: TimeUnit::Day,
        }
    }

    pub fn weeks(value: u32) -> Self {
        Self {
            value,
            unit: TimeUnit::Week,
        }
    }

    pub fn parse(s: &str) -> Result<Self, TimeFilterError> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::ALL);
        }
        let caps = RE_SINCE
            .captures(s)
            .ok_or_else(|| TimeFilterError::Malformed(s.to_string()))?;
        let value: u32 = caps[1]
            .parse()
            .map_err(|_| TimeFilterError::OutOfRange(s.to_string()))?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "h" => TimeUnit::Hour,
            "d" => TimeUnit::Day,
            _ => TimeUnit::Week,
        };
        let filter = Self { value, unit };
        // Reject windows chrono cannot represent.
        if value > 0 && filter.span().is_none() {
            return Err(TimeFilterError::OutOfRange(s.to_string()));
        }
        Ok(filter)
    }

    pub fn is_unbounded(&self) -> bool {
        self.value == 0
    }

    /// Window length, `None` for "all".
    pub fn span(&self) -> Option<Duration> {
        if self.is_unbounded() {
            return None;
        }
        let v = i64::from(self.value);
        match self.unit {
            TimeUnit::Hour => Duration::try_hours(v),
            TimeUnit::Day => Duration::try_days(v),
            TimeUnit::Week => Duration::try_weeks(v),
        }
    }

    /// Earliest admissible `published_at` relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.span()
            .map(|span| now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub fn admits(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.cutoff(now) {
            Some(cutoff) => published_at >= cutoff,
            None => true,
        }
    }
}

impl FromStr for TimeFilter {
    type Err = TimeFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            f.write_str("all")
        } else {
            write!(f, "{}{}", self.value, self.unit.suffix())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_units_and_all() {
        assert_eq!(TimeFilter::parse("24h").unwrap(), TimeFilter::hours(24));
        assert_eq!(TimeFilter::parse(" 7D ").unwrap(), TimeFilter::days(7));
        assert_eq!(TimeFilter::parse("2w").unwrap(), TimeFilter::weeks(2));
        assert_eq!(TimeFilter::parse("ALL").unwrap(), TimeFilter::ALL);
        assert!(TimeFilter::parse("0d").unwrap().is_unbounded());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "24", "h", "-3d", "5m", "1.5h", "all-time"] {
            assert!(TimeFilter::parse(bad).is_err(), "{bad:?} should not parse");
        }
        assert!(matches!(
            TimeFilter::parse("99999999999h"),
            Err(TimeFilterError::OutOfRange(_))
        ));
    }

    #[test]
    fn display_round_trips_textual_form() {
        assert_eq!(TimeFilter::days(3).to_string(), "3d");
        assert_eq!(TimeFilter::ALL.to_string(), "all");
    }

    #[test]
    fn admits_inside_window_only() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let f = TimeFilter::hours(24);
        assert!(f.admits(now - Duration::hours(23), now));
        assert!(f.admits(now - Duration::hours(24), now));
        assert!(!f.admits(now - Duration::hours(25), now));
        assert!(TimeFilter::ALL.admits(now - Duration::weeks(520), now));
    }
}
