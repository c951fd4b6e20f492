//! Statistics and resolved-alert queries

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::hidden::HiddenAlertResolver;
use super::period;
use crate::config::StatisticsConfig;
use crate::db::StatisticsStore;
use crate::error::{Error, ErrorContext, Result};
use crate::filter::{Condition, Filter, TextMatch, TimeOfDayWindow};
use crate::models::{
    GroupBy, PeriodType, ResolvedAlertsRequest, ResolvedAlertsResponse, RollupDimension,
    StatisticsAggregate, StatisticsRequest, StatisticsResponse, TimeRange, DEFAULT_RESOLVED_LIMIT,
    MAX_ALERT_NAME_GROUPS, MAX_RESOLVED_LIMIT, UNKNOWN_TEAM,
};
use crate::rules::RuleEngine;

const TEAM_LABEL: &str = "team";

/// Read side of the statistics system
#[derive(Clone)]
pub struct StatisticsQueryService {
    store: Arc<dyn StatisticsStore>,
    rules: RuleEngine,
    resolver: HiddenAlertResolver,
    timeout: StdDuration,
}

impl StatisticsQueryService {
    /// Create a query service with the default timeout
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self {
            rules: RuleEngine::new(store.clone()),
            resolver: HiddenAlertResolver::new(store.clone()),
            store,
            timeout: StatisticsConfig::default().query_timeout,
        }
    }

    /// Create a query service using the configured timeout
    pub fn with_config(store: Arc<dyn StatisticsStore>, config: &StatisticsConfig) -> Self {
        Self::new(store).with_timeout(config.query_timeout)
    }

    /// Override the per-query timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The rule engine used for rule filtering
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// The hidden alert resolver
    pub fn hidden(&self) -> &HiddenAlertResolver {
        &self.resolver
    }

    /// Aggregate statistics over a fired-time range
    pub async fn query_statistics(&self, request: &StatisticsRequest) -> Result<StatisticsResponse> {
        validate_range(
            request.start_date,
            request.end_date,
            request.group_by,
            request.period_type,
        )?;
        let limit = match request.limit {
            Some(limit)
                if request.group_by == GroupBy::AlertName && limit > MAX_ALERT_NAME_GROUPS =>
            {
                return Err(Error::validation(format!(
                    "limit {limit} exceeds the maximum of {MAX_ALERT_NAME_GROUPS}"
                )));
            }
            Some(0) | None => MAX_ALERT_NAME_GROUPS,
            Some(limit) => limit,
        };

        self.with_timeout_of(async {
            let filter = self.statistics_filter(request).await?;
            let total_alerts = self
                .store
                .count_occurrences(&filter)
                .await
                .context("count matching alerts")?;

            let time_range = TimeRange {
                start: request.start_date,
                end: request.end_date,
            };

            if request.group_by == GroupBy::Period {
                let rows = self
                    .store
                    .aggregate_by_period(&filter, request.period_type)
                    .await
                    .context("aggregate statistics by period")?;
                let breakdown =
                    period::fill_buckets(request.start_date, request.end_date, request.period_type, rows);
                debug!(
                    user_id = %request.user_id,
                    total_alerts,
                    buckets = breakdown.len(),
                    "Computed period breakdown"
                );
                return Ok(StatisticsResponse {
                    time_range,
                    total_alerts,
                    statistics: None,
                    breakdown: Some(breakdown),
                });
            }

            let group_limit = (request.group_by == GroupBy::AlertName).then_some(limit);
            let statistics = self
                .store
                .aggregate(&filter, request.group_by, group_limit)
                .await
                .context("aggregate statistics")?;
            debug!(
                user_id = %request.user_id,
                group_by = ?request.group_by,
                total_alerts,
                groups = statistics.len(),
                "Computed grouped statistics"
            );

            Ok(StatisticsResponse {
                time_range,
                total_alerts,
                statistics: Some(statistics),
                breakdown: None,
            })
        })
        .await
    }

    async fn statistics_filter(&self, request: &StatisticsRequest) -> Result<Filter> {
        let mut filter = Filter::fired_between(request.start_date, request.end_date);

        if let Some(range) = &request.time_of_day {
            match TimeOfDayWindow::parse(&range.start, &range.end) {
                Some(window) => filter = filter.and(Condition::TimeOfDay(window).into()),
                None => debug!(start = %range.start, end = %range.end, "Ignoring invalid time-of-day window"),
            }
        }

        if request.apply_on_call_rules {
            filter = self.rules.apply_rules(&request.user_id, filter).await?;
        }
        Ok(filter)
    }

    /// Recently resolved alerts, one summary per fingerprint.
    ///
    /// Alerts suppressed upstream at resolution time and alerts the user has
    /// hidden are excluded unless the request opts back in. Hidden alerts are
    /// resolved over the whole result set before paging.
    pub async fn query_resolved_alerts(
        &self,
        request: &ResolvedAlertsRequest,
    ) -> Result<ResolvedAlertsResponse> {
        if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
            if end < start {
                return Err(Error::validation("end date must not be before start date"));
            }
        }
        let limit = request
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RESOLVED_LIMIT)
            .min(MAX_RESOLVED_LIMIT);
        let offset = request.offset;

        self.with_timeout_of(async {
            let mut filter = resolved_filter(request);

            if !request.include_hidden {
                if let Some(user_id) = request.user_id.as_deref() {
                    let candidates = self
                        .store
                        .distinct_fingerprints(&filter)
                        .await
                        .context("list resolved fingerprints")?;
                    let hidden = self.resolver.hidden_fingerprints(user_id, &candidates).await?;
                    if !hidden.is_empty() {
                        debug!(hidden = hidden.len(), "Excluding hidden alerts");
                        filter = filter.and(Filter::fingerprint_in(hidden).not());
                    }
                }
            }

            let total_count = self
                .store
                .count_fingerprints(&filter)
                .await
                .context("count resolved alerts")?;
            let alerts = self
                .store
                .summarize_resolved(&filter, limit, offset)
                .await
                .context("summarize resolved alerts")?;

            debug!(user_id = ?request.user_id, total_count, page = alerts.len(), "Listed resolved alerts");
            Ok(ResolvedAlertsResponse {
                alerts,
                total_count,
                limit,
                offset,
            })
        })
        .await
    }

    /// Compute and store rollups for every period of `period_type` in range.
    ///
    /// The range is capped like a period breakdown of the same granularity.
    pub async fn compute_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>> {
        validate_range(start, end, GroupBy::Period, period_type)?;
        self.with_timeout_of(self.build_rollups(period_type, start, end))
            .await
    }

    async fn build_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>> {
        let computed_at = Utc::now();
        let mut rollups = Vec::new();

        for bucket in period::empty_buckets(start, end, period_type) {
            // Buckets share their boundary; all but the last exclude it.
            let bucket_end = if bucket.period_end < end {
                bucket.period_end - Duration::microseconds(1)
            } else {
                bucket.period_end
            };
            let filter = Filter::fired_between(bucket.period_start, bucket_end);

            for dimension in RollupDimension::ALL {
                let group_by = match dimension {
                    RollupDimension::Severity => GroupBy::Severity,
                    RollupDimension::Team => GroupBy::Team,
                    RollupDimension::AlertName => GroupBy::AlertName,
                };
                let groups = self
                    .store
                    .aggregate(&filter, group_by, None)
                    .await
                    .context("aggregate rollup")?;
                rollups.extend(groups.into_iter().map(|g| StatisticsAggregate {
                    period_type,
                    period_start: bucket.period_start,
                    period_end: bucket.period_end,
                    dimension,
                    dimension_value: g.key,
                    stats: g.stats,
                    computed_at,
                }));
            }
        }

        let saved = self
            .store
            .save_rollups(&rollups)
            .await
            .context("save rollups")?;
        info!(period = period_type.as_str(), saved, "Computed statistics rollups");
        Ok(rollups)
    }

    /// Stored rollups whose period starts inside the range
    pub async fn list_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>> {
        self.store
            .list_rollups(period_type, start, end)
            .await
            .context("list rollups")
    }

    async fn with_timeout_of<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

fn validate_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    group_by: GroupBy,
    period_type: PeriodType,
) -> Result<()> {
    if end < start {
        return Err(Error::validation("end date must not be before start date"));
    }
    let max = period::max_range(group_by, period_type);
    if end - start > max {
        return Err(Error::validation(format!(
            "range of {} days exceeds the maximum of {} days for this grouping",
            (end - start).num_days(),
            max.num_days()
        )));
    }
    Ok(())
}

fn resolved_filter(request: &ResolvedAlertsRequest) -> Filter {
    let mut filter: Filter = Condition::Resolved {
        start: request.start_date,
        end: request.end_date,
    }
    .into();

    if !request.severities.is_empty() {
        let severities = request.severities.iter().map(|s| s.to_lowercase()).collect();
        filter = filter.and(Condition::SeverityIn(severities).into());
    }
    if !request.alert_names.is_empty() {
        filter = filter.and(Filter::Any(
            request
                .alert_names
                .iter()
                .map(|name| Condition::AlertName(TextMatch::Contains(name.clone())).into())
                .collect(),
        ));
    }
    if !request.teams.is_empty() {
        filter = filter.and(Filter::Any(
            request.teams.iter().map(|team| team_filter(team)).collect(),
        ));
    }
    if let Some(term) = request.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        filter = filter.and(Condition::Search(term.to_string()).into());
    }
    if !request.include_silenced {
        filter = filter.and(Filter::from(Condition::Suppressed).not());
    }
    filter
}

fn team_filter(team: &str) -> Filter {
    let label = Filter::from(Condition::Label {
        key: TEAM_LABEL.to_string(),
        matcher: TextMatch::Equals(team.to_string()),
    });
    if team != UNKNOWN_TEAM {
        return label;
    }
    // Alerts without a team label are grouped as "unknown".
    let present = Filter::Any(vec![
        Condition::Label {
            key: TEAM_LABEL.to_string(),
            matcher: TextMatch::Equals(String::new()),
        }
        .into(),
        Condition::Label {
            key: TEAM_LABEL.to_string(),
            matcher: TextMatch::NotEquals(String::new()),
        }
        .into(),
    ]);
    Filter::Any(vec![label, present.not()])
}
