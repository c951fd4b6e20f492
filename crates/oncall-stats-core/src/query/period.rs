//! Period truncation and bucketing (UTC)

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Timelike, Utc};

use crate::db::PeriodSeverityStatistics;
use crate::models::{GroupBy, PeriodBucket, PeriodType};

/// Start of the period containing `at`
pub fn truncate(at: DateTime<Utc>, period: PeriodType) -> DateTime<Utc> {
    let date = at.date_naive();
    let midnight = |d: chrono::NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));
    match period {
        PeriodType::Hour => midnight(date) + Duration::hours(i64::from(at.hour())),
        PeriodType::Day => midnight(date),
        PeriodType::Week => {
            midnight(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
        }
        PeriodType::Month => midnight(date - Duration::days(i64::from(date.day0()))),
    }
}

/// Start of the period after the one beginning at `start`
pub fn next_start(start: DateTime<Utc>, period: PeriodType) -> Option<DateTime<Utc>> {
    match period {
        PeriodType::Hour => start.checked_add_signed(Duration::hours(1)),
        PeriodType::Day => start.checked_add_signed(Duration::days(1)),
        PeriodType::Week => start.checked_add_signed(Duration::weeks(1)),
        PeriodType::Month => start.checked_add_months(Months::new(1)),
    }
}

/// Display label for a period
pub fn label(start: DateTime<Utc>, period: PeriodType) -> String {
    match period {
        PeriodType::Hour => start.format("%Y-%m-%d %H:00").to_string(),
        PeriodType::Day => start.format("%Y-%m-%d").to_string(),
        PeriodType::Week => format!("Week of {}", start.format("%Y-%m-%d")),
        PeriodType::Month => start.format("%Y-%m").to_string(),
    }
}

/// Longest range a request may span for the given grouping
pub fn max_range(group_by: GroupBy, period: PeriodType) -> Duration {
    match (group_by, period) {
        (GroupBy::Period, PeriodType::Hour) => Duration::days(30),
        (GroupBy::Period, PeriodType::Day) => Duration::days(365),
        (GroupBy::Period, PeriodType::Week) => Duration::days(3 * 365),
        (GroupBy::Period, PeriodType::Month) => Duration::days(10 * 365),
        _ => Duration::days(5 * 365),
    }
}

/// Empty buckets covering `[start, end]`.
///
/// Each bucket ends where the next begins; the first and last are clipped
/// to the range.
pub fn empty_buckets(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: PeriodType,
) -> Vec<PeriodBucket> {
    let mut buckets = Vec::new();
    let mut current = truncate(start, period);

    loop {
        let next = next_start(current, period);
        buckets.push(PeriodBucket {
            period_start: current.max(start),
            period_end: next.map_or(end, |n| n.min(end)),
            label: label(current, period),
            by_severity: BTreeMap::new(),
            total_count: 0,
        });
        match next {
            Some(n) if n < end => current = n,
            _ => break,
        }
    }

    buckets
}

/// Reshape per-(period, severity) rows into ordered buckets
pub fn fill_buckets(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: PeriodType,
    rows: Vec<PeriodSeverityStatistics>,
) -> Vec<PeriodBucket> {
    let mut buckets = empty_buckets(start, end, period);
    let keys: Vec<DateTime<Utc>> = buckets
        .iter()
        .map(|b| truncate(b.period_start, period))
        .collect();

    for row in rows {
        let idx = keys.partition_point(|k| *k <= row.period_start);
        let Some(bucket) = idx.checked_sub(1).and_then(|i| buckets.get_mut(i)) else {
            continue;
        };
        bucket.total_count += row.stats.count;
        bucket
            .by_severity
            .entry(row.severity)
            .and_modify(|s| {
                s.count += row.stats.count;
                s.total_duration_seconds += row.stats.total_duration_seconds;
            })
            .or_insert(row.stats);
    }

    buckets
}
