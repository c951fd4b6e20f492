//! Statistics query request and response models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AlertMetadata;

/// Maximum number of alert names returned by alert-name grouping
pub const MAX_ALERT_NAME_GROUPS: usize = 100;

/// Default page size for resolved alerts
pub const DEFAULT_RESOLVED_LIMIT: usize = 100;

/// Largest page size for resolved alerts
pub const MAX_RESOLVED_LIMIT: usize = 1000;

/// Default number of history entries returned for a fingerprint
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Dimension to group statistics by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// A single aggregate over everything
    #[default]
    Overall,
    /// One group per severity
    Severity,
    /// One group per `team` label
    Team,
    /// One group per alert name
    AlertName,
    /// Time buckets with a per-severity breakdown
    Period,
}

/// Period granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    /// Clock hour
    Hour,
    /// Calendar day
    #[default]
    Day,
    /// Monday-aligned week
    Week,
    /// Calendar month
    Month,
}

impl PeriodType {
    /// Unit name understood by `date_trunc`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl std::str::FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown period type: {other}")),
        }
    }
}

/// Optional `HH:MM` window applied to the fired time of day (UTC)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    /// Window start, `HH:MM`
    pub start: String,
    /// Window end, `HH:MM`; earlier than start means the window spans midnight
    pub end: String,
}

/// Aggregate statistics request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsRequest {
    /// Requesting user, used for rule filtering
    pub user_id: String,
    /// Range start (inclusive)
    pub start_date: DateTime<Utc>,
    /// Range end (inclusive)
    pub end_date: DateTime<Utc>,
    /// Grouping dimension
    #[serde(default)]
    pub group_by: GroupBy,
    /// Granularity for period grouping
    #[serde(default)]
    pub period_type: PeriodType,
    /// Narrow to the user's active on-call rules
    #[serde(default)]
    pub apply_on_call_rules: bool,
    /// Optional time-of-day window
    #[serde(default)]
    pub time_of_day: Option<TimeOfDayRange>,
    /// Maximum alert-name groups (at most 100)
    #[serde(default)]
    pub limit: Option<usize>,
}

impl StatisticsRequest {
    /// Overall statistics for a user over a range
    pub fn new(user_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            start_date: start,
            end_date: end,
            group_by: GroupBy::Overall,
            period_type: PeriodType::Day,
            apply_on_call_rules: false,
            time_of_day: None,
            limit: None,
        }
    }

    /// Set the grouping dimension
    #[must_use]
    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Group by period of the given granularity
    #[must_use]
    pub fn by_period(mut self, period_type: PeriodType) -> Self {
        self.group_by = GroupBy::Period;
        self.period_type = period_type;
        self
    }

    /// Restrict to a time-of-day window
    #[must_use]
    pub fn time_of_day(mut self, start: &str, end: &str) -> Self {
        self.time_of_day = Some(TimeOfDayRange {
            start: start.to_string(),
            end: end.to_string(),
        });
        self
    }

    /// Apply the user's active on-call rules
    #[must_use]
    pub fn with_rules(mut self) -> Self {
        self.apply_on_call_rules = true;
        self
    }
}

/// Derived aggregate over a set of occurrences
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStatistics {
    /// Number of occurrences
    pub count: i64,
    /// Mean non-zero duration
    pub avg_duration_seconds: f64,
    /// Sum of durations
    pub total_duration_seconds: i64,
    /// Mean non-zero time to acknowledge
    pub avg_mttr_seconds: f64,
}

/// Statistics for one group key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    /// Severity, team, alert name, or "all"
    pub key: String,
    /// Aggregate values
    #[serde(flatten)]
    pub stats: AggregatedStatistics,
}

/// One time bucket of a period breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBucket {
    /// Bucket start (inclusive)
    pub period_start: DateTime<Utc>,
    /// Bucket end (exclusive, clipped to the range end)
    pub period_end: DateTime<Utc>,
    /// Display label
    pub label: String,
    /// Per-severity aggregates
    pub by_severity: BTreeMap<String, AggregatedStatistics>,
    /// Occurrences in this bucket
    pub total_count: i64,
}

/// Requested time range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Range start
    pub start: DateTime<Utc>,
    /// Range end
    pub end: DateTime<Utc>,
}

/// Aggregate statistics response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsResponse {
    /// Echo of the requested range
    pub time_range: TimeRange,
    /// Occurrences matching the filters
    pub total_alerts: i64,
    /// Grouped statistics, for non-period grouping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<GroupStatistics>>,
    /// Period buckets, for period grouping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<PeriodBucket>>,
}

/// Recently-resolved alerts request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvedAlertsRequest {
    /// Requesting user, used for hidden-alert exclusion
    pub user_id: Option<String>,
    /// Range start (inclusive), on resolved time
    pub start_date: Option<DateTime<Utc>>,
    /// Range end (inclusive), on resolved time
    pub end_date: Option<DateTime<Utc>>,
    /// Severities to keep
    pub severities: Vec<String>,
    /// Keep alert names containing any of these
    pub alert_names: Vec<String>,
    /// Teams to keep
    pub teams: Vec<String>,
    /// Case-insensitive free text search
    pub search: Option<String>,
    /// Do not exclude the user's hidden alerts
    pub include_hidden: bool,
    /// Do not exclude alerts suppressed upstream
    pub include_silenced: bool,
    /// Page size, default 100, at most 1000
    pub limit: Option<usize>,
    /// Page offset
    pub offset: usize,
}

/// Per-fingerprint summary of resolved occurrences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAlertSummary {
    /// Alert identity
    pub fingerprint: String,
    /// Alert name
    pub alert_name: String,
    /// Severity
    pub severity: String,
    /// Number of resolved occurrences
    pub occurrence_count: i64,
    /// Earliest fired time
    pub first_fired_at: DateTime<Utc>,
    /// Latest resolved time
    pub last_resolved_at: DateTime<Utc>,
    /// Sum of durations
    pub total_duration_seconds: i64,
    /// Mean non-zero duration
    pub avg_duration_seconds: f64,
    /// Mean non-zero time to acknowledge
    pub avg_mttr_seconds: f64,
    /// Sum of times to acknowledge
    pub total_mttr_seconds: i64,
    /// Metadata of the most recently resolved occurrence
    pub metadata: AlertMetadata,
}

/// Recently-resolved alerts response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAlertsResponse {
    /// Page of summaries, most recently resolved first
    pub alerts: Vec<ResolvedAlertSummary>,
    /// Distinct fingerprints across all pages
    pub total_count: i64,
    /// Effective page size
    pub limit: usize,
    /// Effective offset
    pub offset: usize,
}

/// Occurrence counts over recent windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// All occurrences
    pub total: i64,
    /// Fired in the last 24 hours
    pub last_24h: i64,
    /// Fired in the last 7 days
    pub last_7d: i64,
}

/// Store-wide summary
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatisticsSummary {
    /// All occurrences
    pub total: i64,
    /// Occurrences per lowercase severity
    pub by_severity: BTreeMap<String, i64>,
    /// Earliest fired time
    pub earliest_fired_at: Option<DateTime<Utc>>,
    /// Latest fired time
    pub latest_fired_at: Option<DateTime<Utc>>,
}

/// Outcome of a backfill batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchCaptureResult {
    /// Events written or already present
    pub succeeded: usize,
    /// Events rejected or failed
    pub failed: usize,
}

/// Dimension of a stored rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupDimension {
    /// Per severity
    Severity,
    /// Per team label
    Team,
    /// Per alert name
    AlertName,
}

impl RollupDimension {
    /// All dimensions
    pub const ALL: [RollupDimension; 3] = [Self::Severity, Self::Team, Self::AlertName];

    /// Stored name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Severity => "severity",
            Self::Team => "team",
            Self::AlertName => "alert_name",
        }
    }
}

/// Cached rollup for one period and dimension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsAggregate {
    /// Granularity of the period
    pub period_type: PeriodType,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end
    pub period_end: DateTime<Utc>,
    /// Grouping dimension
    pub dimension: RollupDimension,
    /// Value of the dimension
    pub dimension_value: String,
    /// Aggregate values
    pub stats: AggregatedStatistics,
    /// When the rollup was computed
    pub computed_at: DateTime<Utc>,
}

/// Sort order for raw occurrence queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OccurrenceOrder {
    /// Newest first
    #[default]
    FiredAtDesc,
    /// Oldest first
    FiredAtAsc,
}

