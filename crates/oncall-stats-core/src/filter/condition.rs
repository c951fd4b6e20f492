//! Leaf conditions of the filter tree

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::AlertOccurrence;

/// String comparison applied to a text field
#[derive(Debug, Clone)]
pub enum TextMatch {
    /// Exact match
    Equals(String),
    /// Exact mismatch
    NotEquals(String),
    /// Substring
    Contains(String),
    /// Prefix
    StartsWith(String),
    /// Suffix
    EndsWith(String),
    /// Regular expression search
    Regex(Regex),
}

impl TextMatch {
    /// Test a value. A missing value never matches.
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Equals(expected) => value == expected,
            Self::NotEquals(expected) => value != expected,
            Self::Contains(needle) => value.contains(needle.as_str()),
            Self::StartsWith(prefix) => value.starts_with(prefix.as_str()),
            Self::EndsWith(suffix) => value.ends_with(suffix.as_str()),
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// `[start, end]` minute-of-day window, possibly spanning midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDayWindow {
    /// First minute of the day included
    pub start_minute: u32,
    /// Last minute of the day included
    pub end_minute: u32,
}

impl TimeOfDayWindow {
    /// Parse two `HH:MM` bounds. Returns `None` if either is malformed.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start_minute: parse_minutes(start)?,
            end_minute: parse_minutes(end)?,
        })
    }

    /// Whether the window wraps past midnight
    pub fn spans_midnight(&self) -> bool {
        self.start_minute > self.end_minute
    }

    /// Whether a minute of the day falls inside the window
    pub fn contains(&self, minute: u32) -> bool {
        if self.spans_midnight() {
            minute >= self.start_minute || minute <= self.end_minute
        } else {
            (self.start_minute..=self.end_minute).contains(&minute)
        }
    }
}

/// Parse `HH:MM` (exactly five characters) into minutes after midnight
pub fn parse_minutes(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let hour = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
    let minute = u32::from(bytes[3] - b'0') * 10 + u32::from(bytes[4] - b'0');
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

/// A single predicate over an occurrence
#[derive(Debug, Clone)]
pub enum Condition {
    /// `start <= fired_at <= end`
    FiredBetween {
        /// Inclusive lower bound
        start: DateTime<Utc>,
        /// Inclusive upper bound
        end: DateTime<Utc>,
    },
    /// Resolved, with optional inclusive bounds on `resolved_at`
    Resolved {
        /// Inclusive lower bound
        start: Option<DateTime<Utc>>,
        /// Inclusive upper bound
        end: Option<DateTime<Utc>>,
    },
    /// Fired time of day (UTC) inside a window
    TimeOfDay(TimeOfDayWindow),
    /// Lowercased severity is one of the given values
    SeverityIn(Vec<String>),
    /// Label value comparison
    Label {
        /// Label key
        key: String,
        /// Comparison
        matcher: TextMatch,
    },
    /// Alert name comparison
    AlertName(TextMatch),
    /// Case-insensitive substring over name, fingerprint and descriptive metadata
    Search(String),
    /// Fingerprint is one of the given values
    FingerprintIn(Vec<String>),
    /// Upstream state is "suppressed"
    Suppressed,
}

impl Condition {
    /// Evaluate against one occurrence
    pub fn evaluate(&self, occ: &AlertOccurrence) -> bool {
        match self {
            Self::FiredBetween { start, end } => occ.fired_at >= *start && occ.fired_at <= *end,
            Self::Resolved { start, end } => match occ.resolved_at {
                Some(at) => start.map_or(true, |s| at >= s) && end.map_or(true, |e| at <= e),
                None => false,
            },
            Self::TimeOfDay(window) => window.contains(occ.fired_minute_of_day()),
            Self::SeverityIn(values) => {
                let severity = occ.severity.to_lowercase();
                values.iter().any(|v| *v == severity)
            }
            Self::Label { key, matcher } => matcher.matches(occ.label(key)),
            Self::AlertName(matcher) => matcher.matches(Some(&occ.alert_name)),
            Self::Search(term) => {
                let term = term.to_lowercase();
                search_fields(occ).any(|field| field.to_lowercase().contains(&term))
            }
            Self::FingerprintIn(fingerprints) => fingerprints.contains(&occ.fingerprint),
            Self::Suppressed => occ.metadata.is_suppressed(),
        }
    }
}

fn search_fields(occ: &AlertOccurrence) -> impl Iterator<Item = &str> {
    let meta = &occ.metadata;
    [
        Some(occ.alert_name.as_str()),
        Some(occ.fingerprint.as_str()),
        meta.source.as_deref(),
        meta.instance.as_deref(),
        meta.summary.as_deref(),
        meta.description.as_deref(),
        meta.annotations.get("summary").map(String::as_str),
        meta.annotations.get("description").map(String::as_str),
    ]
    .into_iter()
    .flatten()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("00:00", Some(0))]
    #[case("09:30", Some(570))]
    #[case("23:59", Some(1439))]
    #[case("24:00", None)]
    #[case("12:60", None)]
    #[case("9:30", None)]
    #[case("09-30", None)]
    #[case("ab:cd", None)]
    #[case("09:300", None)]
    #[case("", None)]
    fn parses_hh_mm(#[case] input: &str, #[case] expected: Option<u32>) {
        assert_eq!(parse_minutes(input), expected);
    }

    #[rstest]
    #[case("22:00", "06:00", 23 * 60 + 30, true)]
    #[case("22:00", "06:00", 5 * 60, true)]
    #[case("22:00", "06:00", 12 * 60, false)]
    #[case("22:00", "06:00", 22 * 60, true)]
    #[case("22:00", "06:00", 6 * 60, true)]
    #[case("09:00", "17:00", 12 * 60, true)]
    #[case("09:00", "17:00", 17 * 60 + 1, false)]
    #[case("09:00", "17:00", 8 * 60 + 59, false)]
    fn window_membership(
        #[case] start: &str,
        #[case] end: &str,
        #[case] minute: u32,
        #[case] expected: bool,
    ) {
        let window = TimeOfDayWindow::parse(start, end).unwrap();
        assert_eq!(window.contains(minute), expected);
    }

    #[test]
    fn missing_value_never_matches() {
        assert!(!TextMatch::NotEquals("prod".into()).matches(None));
        assert!(!TextMatch::Equals(String::new()).matches(None));
        assert!(TextMatch::NotEquals("prod".into()).matches(Some("staging")));
    }

    #[rstest]
    #[case("summary", "Disk almost full on db-7", "disk almost", true)]
    #[case("description", "Replica lag above 30s", "REPLICA LAG", true)]
    #[case("runbook", "Disk almost full on db-7", "disk almost", false)]
    fn search_reads_annotations(
        #[case] key: &str,
        #[case] value: &str,
        #[case] term: &str,
        #[case] expected: bool,
    ) {
        let mut occ = crate::filter::tests::occurrence("warning", &[]);
        occ.metadata.annotations.insert(key.to_string(), value.to_string());
        assert_eq!(Condition::Search(term.to_string()).evaluate(&occ), expected);
    }
}
