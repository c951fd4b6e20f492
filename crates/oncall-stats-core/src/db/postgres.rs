//! PostgreSQL connection and statistics queries

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, warn};
use uuid::Uuid;

use super::sql::push_where;
use super::{
    HiddenAlertStore, LabelSnapshots, OccurrenceStore, PeriodSeverityStatistics, RuleStore,
};
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::filter::Filter;
use crate::models::{
    AggregatedStatistics, AlertMetadata, AlertOccurrence, FiredEvent, GroupBy, GroupStatistics,
    HiddenAlert, HiddenRule, OccurrenceOrder, OnCallRule, PeriodType, ResolvedAlertSummary,
    RollupDimension, StatisticsAggregate,
};

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Create a new PostgreSQL connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const OCCURRENCE_COLUMNS: &str = "id, fingerprint, alert_name, severity, metadata, fired_at, \
     resolved_at, acknowledged_at, duration_seconds, mttr_seconds, created_at, updated_at";

const AGGREGATE_COLUMNS: &str = "COUNT(*) AS count, \
     COALESCE(AVG(NULLIF(duration_seconds, 0)), 0)::float8 AS avg_duration_seconds, \
     COALESCE(SUM(duration_seconds), 0)::bigint AS total_duration_seconds, \
     COALESCE(AVG(NULLIF(mttr_seconds, 0)), 0)::float8 AS avg_mttr_seconds";

const HIDDEN_RULE_COLUMNS: &str = "id, user_id, name, label_key, label_value, is_regex, \
     is_enabled, priority, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OccurrenceRow {
    id: i64,
    fingerprint: String,
    alert_name: String,
    severity: String,
    metadata: Json<AlertMetadata>,
    fired_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    acknowledged_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    mttr_seconds: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OccurrenceRow> for AlertOccurrence {
    fn from(row: OccurrenceRow) -> Self {
        Self {
            id: row.id,
            fingerprint: row.fingerprint,
            alert_name: row.alert_name,
            severity: row.severity,
            metadata: row.metadata.0,
            fired_at: row.fired_at,
            resolved_at: row.resolved_at,
            acknowledged_at: row.acknowledged_at,
            duration_seconds: row.duration_seconds,
            mttr_seconds: row.mttr_seconds,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    key: String,
    count: i64,
    avg_duration_seconds: f64,
    total_duration_seconds: i64,
    avg_mttr_seconds: f64,
}

impl From<GroupRow> for GroupStatistics {
    fn from(row: GroupRow) -> Self {
        Self {
            key: row.key,
            stats: AggregatedStatistics {
                count: row.count,
                avg_duration_seconds: row.avg_duration_seconds,
                total_duration_seconds: row.total_duration_seconds,
                avg_mttr_seconds: row.avg_mttr_seconds,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct PeriodSeverityRow {
    period_start: DateTime<Utc>,
    severity: String,
    count: i64,
    avg_duration_seconds: f64,
    total_duration_seconds: i64,
    avg_mttr_seconds: f64,
}

impl From<PeriodSeverityRow> for PeriodSeverityStatistics {
    fn from(row: PeriodSeverityRow) -> Self {
        Self {
            period_start: row.period_start,
            severity: row.severity,
            stats: AggregatedStatistics {
                count: row.count,
                avg_duration_seconds: row.avg_duration_seconds,
                total_duration_seconds: row.total_duration_seconds,
                avg_mttr_seconds: row.avg_mttr_seconds,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResolvedAlertRow {
    fingerprint: String,
    alert_name: String,
    severity: String,
    occurrence_count: i64,
    first_fired_at: DateTime<Utc>,
    last_resolved_at: DateTime<Utc>,
    total_duration_seconds: i64,
    avg_duration_seconds: f64,
    avg_mttr_seconds: f64,
    total_mttr_seconds: i64,
    metadata: Json<AlertMetadata>,
}

impl From<ResolvedAlertRow> for ResolvedAlertSummary {
    fn from(row: ResolvedAlertRow) -> Self {
        Self {
            fingerprint: row.fingerprint,
            alert_name: row.alert_name,
            severity: row.severity,
            occurrence_count: row.occurrence_count,
            first_fired_at: row.first_fired_at,
            last_resolved_at: row.last_resolved_at,
            total_duration_seconds: row.total_duration_seconds,
            avg_duration_seconds: row.avg_duration_seconds,
            avg_mttr_seconds: row.avg_mttr_seconds,
            total_mttr_seconds: row.total_mttr_seconds,
            metadata: row.metadata.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LabelRow {
    fingerprint: String,
    labels: Option<Json<BTreeMap<String, String>>>,
}

#[derive(sqlx::FromRow)]
struct RollupRow {
    period_type: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    dimension: String,
    dimension_value: String,
    alert_count: i64,
    avg_duration_seconds: f64,
    total_duration_seconds: i64,
    avg_mttr_seconds: f64,
    computed_at: DateTime<Utc>,
}

impl RollupRow {
    fn into_aggregate(self) -> Option<StatisticsAggregate> {
        let dimension = RollupDimension::ALL
            .into_iter()
            .find(|d| d.as_str() == self.dimension)?;
        Some(StatisticsAggregate {
            period_type: self.period_type.parse().ok()?,
            period_start: self.period_start,
            period_end: self.period_end,
            dimension,
            dimension_value: self.dimension_value,
            stats: AggregatedStatistics {
                count: self.alert_count,
                avg_duration_seconds: self.avg_duration_seconds,
                total_duration_seconds: self.total_duration_seconds,
                avg_mttr_seconds: self.avg_mttr_seconds,
            },
            computed_at: self.computed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OnCallRuleRow {
    id: Uuid,
    user_id: String,
    rule_name: String,
    rule_config: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OnCallRuleRow> for OnCallRule {
    fn from(row: OnCallRuleRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            rule_name: row.rule_name,
            rule_config: row.rule_config,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HiddenAlertRow {
    id: Uuid,
    user_id: String,
    fingerprint: String,
    alert_name: String,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HiddenAlertRow> for HiddenAlert {
    fn from(row: HiddenAlertRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            fingerprint: row.fingerprint,
            alert_name: row.alert_name,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HiddenRuleRow {
    id: Uuid,
    user_id: String,
    name: String,
    label_key: String,
    label_value: String,
    is_regex: bool,
    is_enabled: bool,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<HiddenRuleRow> for HiddenRule {
    fn from(row: HiddenRuleRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            label_key: row.label_key,
            label_value: row.label_value,
            is_regex: row.is_regex,
            is_enabled: row.is_enabled,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn group_key_expr(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::Severity => "LOWER(severity)",
        GroupBy::Team => "COALESCE(metadata->'labels'->>'team', 'unknown')",
        GroupBy::AlertName => "alert_name",
        GroupBy::Overall | GroupBy::Period => "'all'::text",
    }
}

/// Statistics store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStatisticsStore {
    pool: PgPool,
}

impl PgStatisticsStore {
    /// Create a new store over a pool
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool.clone(),
        }
    }
}

#[async_trait]
impl OccurrenceStore for PgStatisticsStore {
    async fn insert_if_absent(&self, event: &FiredEvent) -> Result<(AlertOccurrence, bool)> {
        let inserted = sqlx::query_as::<_, OccurrenceRow>(&format!(
            r#"
            INSERT INTO alert_statistics (fingerprint, alert_name, severity, metadata, fired_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (fingerprint, fired_at) DO NOTHING
            RETURNING {OCCURRENCE_COLUMNS}
            "#
        ))
        .bind(&event.fingerprint)
        .bind(&event.alert_name)
        .bind(&event.severity)
        .bind(Json(&event.metadata))
        .bind(event.fired_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let existing = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM alert_statistics WHERE fingerprint = $1 AND fired_at = $2"
        ))
        .bind(&event.fingerprint)
        .bind(event.fired_at)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing.into(), false))
    }

    async fn latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AlertOccurrence>> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM alert_statistics \
             WHERE fingerprint = $1 ORDER BY fired_at DESC LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn resolve_unresolved(
        &self,
        fingerprint: &str,
        resolved_at: DateTime<Utc>,
        metadata: Option<&AlertMetadata>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alert_statistics
            SET resolved_at = $2,
                duration_seconds = GREATEST(FLOOR(EXTRACT(EPOCH FROM ($2 - fired_at)))::bigint, 0),
                metadata = COALESCE($3, metadata),
                updated_at = NOW()
            WHERE fingerprint = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(fingerprint)
        .bind(resolved_at)
        .bind(metadata.map(Json))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn acknowledge_latest(
        &self,
        fingerprint: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alert_statistics
            SET acknowledged_at = $2,
                mttr_seconds = GREATEST(FLOOR(EXTRACT(EPOCH FROM ($2 - fired_at)))::bigint, 0),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM alert_statistics
                WHERE fingerprint = $1 AND acknowledged_at IS NULL
                ORDER BY fired_at DESC
                LIMIT 1
            )
            AND acknowledged_at IS NULL
            "#,
        )
        .bind(fingerprint)
        .bind(acknowledged_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn query_occurrences(
        &self,
        filter: &Filter,
        order: OccurrenceOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertOccurrence>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM alert_statistics"
        ));
        push_where(&mut qb, filter);
        qb.push(match order {
            OccurrenceOrder::FiredAtDesc => " ORDER BY fired_at DESC, id DESC",
            OccurrenceOrder::FiredAtAsc => " ORDER BY fired_at ASC, id ASC",
        });
        qb.push(" LIMIT ");
        qb.push_bind(to_i64(limit));
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(offset));

        let rows: Vec<OccurrenceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_occurrences(&self, filter: &Filter) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM alert_statistics");
        push_where(&mut qb, filter);
        Ok(qb.build_query_scalar().fetch_one(&self.pool).await?)
    }

    async fn aggregate(
        &self,
        filter: &Filter,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<GroupStatistics>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} AS key, {AGGREGATE_COLUMNS} FROM alert_statistics",
            group_key_expr(group_by)
        ));
        push_where(&mut qb, filter);
        match group_by {
            GroupBy::Overall | GroupBy::Period => {}
            GroupBy::Severity | GroupBy::Team => {
                qb.push(" GROUP BY 1 ORDER BY 1");
            }
            GroupBy::AlertName => {
                qb.push(" GROUP BY 1 ORDER BY count DESC, key ASC");
            }
        }
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(to_i64(limit));
        }

        let rows: Vec<GroupRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        debug!(?group_by, groups = rows.len(), "Aggregated statistics");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn aggregate_by_period(
        &self,
        filter: &Filter,
        period: PeriodType,
    ) -> Result<Vec<PeriodSeverityStatistics>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT date_trunc(");
        qb.push_bind(period.as_str());
        qb.push(format!(
            ", fired_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS period_start, \
             LOWER(severity) AS severity, {AGGREGATE_COLUMNS} FROM alert_statistics"
        ));
        push_where(&mut qb, filter);
        qb.push(" GROUP BY 1, 2 ORDER BY 1, 2");

        let rows: Vec<PeriodSeverityRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn distinct_fingerprints(&self, filter: &Filter) -> Result<Vec<String>> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT DISTINCT fingerprint FROM alert_statistics");
        push_where(&mut qb, filter);
        qb.push(" ORDER BY fingerprint");
        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn count_fingerprints(&self, filter: &Filter) -> Result<i64> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(DISTINCT fingerprint) FROM alert_statistics");
        push_where(&mut qb, filter);
        Ok(qb.build_query_scalar().fetch_one(&self.pool).await?)
    }

    async fn latest_labels(&self, fingerprints: &[String]) -> Result<LabelSnapshots> {
        if fingerprints.is_empty() {
            return Ok(LabelSnapshots::new());
        }

        let rows = sqlx::query_as::<_, LabelRow>(
            r#"
            SELECT DISTINCT ON (fingerprint) fingerprint, metadata->'labels' AS labels
            FROM alert_statistics
            WHERE fingerprint = ANY($1)
            ORDER BY fingerprint, resolved_at DESC NULLS LAST, fired_at DESC
            "#,
        )
        .bind(fingerprints)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.fingerprint, row.labels.map(|l| l.0).unwrap_or_default()))
            .collect())
    }

    async fn summarize_resolved(
        &self,
        filter: &Filter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResolvedAlertSummary>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT fingerprint, alert_name, severity,
                   COUNT(*) AS occurrence_count,
                   MIN(fired_at) AS first_fired_at,
                   MAX(resolved_at) AS last_resolved_at,
                   COALESCE(SUM(duration_seconds), 0)::bigint AS total_duration_seconds,
                   COALESCE(AVG(NULLIF(duration_seconds, 0)), 0)::float8 AS avg_duration_seconds,
                   COALESCE(AVG(NULLIF(mttr_seconds, 0)), 0)::float8 AS avg_mttr_seconds,
                   COALESCE(SUM(mttr_seconds), 0)::bigint AS total_mttr_seconds,
                   (ARRAY_AGG(metadata ORDER BY resolved_at DESC, fired_at DESC))[1] AS metadata
            FROM alert_statistics"#,
        );
        push_where(&mut qb, filter);
        qb.push(
            " AND resolved_at IS NOT NULL \
             GROUP BY fingerprint, alert_name, severity \
             ORDER BY last_resolved_at DESC, fingerprint ASC LIMIT ",
        );
        qb.push_bind(to_i64(limit));
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(offset));

        let rows: Vec<ResolvedAlertRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn history(&self, fingerprint: &str, limit: usize) -> Result<Vec<AlertOccurrence>> {
        let rows = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM alert_statistics \
             WHERE fingerprint = $1 ORDER BY fired_at DESC LIMIT $2"
        ))
        .bind(fingerprint)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn purge_fired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alert_statistics WHERE fired_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_rollups(&self, rollups: &[StatisticsAggregate]) -> Result<u64> {
        if rollups.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut count = 0;
        for rollup in rollups {
            let result = sqlx::query(
                r#"
                INSERT INTO statistics_aggregates (
                    period_type, period_start, period_end, dimension, dimension_value,
                    alert_count, avg_duration_seconds, total_duration_seconds, avg_mttr_seconds,
                    computed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (period_type, period_start, dimension, dimension_value) DO UPDATE SET
                    period_end = EXCLUDED.period_end,
                    alert_count = EXCLUDED.alert_count,
                    avg_duration_seconds = EXCLUDED.avg_duration_seconds,
                    total_duration_seconds = EXCLUDED.total_duration_seconds,
                    avg_mttr_seconds = EXCLUDED.avg_mttr_seconds,
                    computed_at = EXCLUDED.computed_at
                "#,
            )
            .bind(rollup.period_type.as_str())
            .bind(rollup.period_start)
            .bind(rollup.period_end)
            .bind(rollup.dimension.as_str())
            .bind(&rollup.dimension_value)
            .bind(rollup.stats.count)
            .bind(rollup.stats.avg_duration_seconds)
            .bind(rollup.stats.total_duration_seconds)
            .bind(rollup.stats.avg_mttr_seconds)
            .bind(rollup.computed_at)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected();
        }
        tx.commit().await?;

        Ok(count)
    }

    async fn list_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>> {
        let rows = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT period_type, period_start, period_end, dimension, dimension_value,
                   alert_count, avg_duration_seconds, total_duration_seconds, avg_mttr_seconds,
                   computed_at
            FROM statistics_aggregates
            WHERE period_type = $1 AND period_start BETWEEN $2 AND $3
            ORDER BY period_start, dimension, dimension_value
            "#,
        )
        .bind(period_type.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let dimension = row.dimension.clone();
                let parsed = row.into_aggregate();
                if parsed.is_none() {
                    warn!(%dimension, "Skipping rollup with unknown dimension or period");
                }
                parsed
            })
            .collect())
    }
}

#[async_trait]
impl RuleStore for PgStatisticsStore {
    async fn create_rule(&self, rule: &OnCallRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO on_call_rules (id, user_id, rule_name, rule_config, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.user_id)
        .bind(&rule.rule_name)
        .bind(&rule.rule_config)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_rule(&self, rule: &OnCallRule) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE on_call_rules
            SET rule_name = $3, rule_config = $4, is_active = $5, updated_at = $6
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(rule.id)
        .bind(&rule.user_id)
        .bind(&rule.rule_name)
        .bind(&rule.rule_config)
        .bind(rule.is_active)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<OnCallRule>> {
        let row = sqlx::query_as::<_, OnCallRuleRow>(
            r#"
            SELECT id, user_id, rule_name, rule_config, is_active, created_at, updated_at
            FROM on_call_rules WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_rules(&self, user_id: &str, active_only: bool) -> Result<Vec<OnCallRule>> {
        let rows = sqlx::query_as::<_, OnCallRuleRow>(
            r#"
            SELECT id, user_id, rule_name, rule_config, is_active, created_at, updated_at
            FROM on_call_rules
            WHERE user_id = $1 AND ($2 = FALSE OR is_active)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_rule(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM on_call_rules WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl HiddenAlertStore for PgStatisticsStore {
    async fn hide_alert(&self, alert: &HiddenAlert) -> Result<HiddenAlert> {
        let row = sqlx::query_as::<_, HiddenAlertRow>(
            r#"
            INSERT INTO user_hidden_alerts (id, user_id, fingerprint, alert_name, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, fingerprint) DO UPDATE SET
                alert_name = EXCLUDED.alert_name,
                reason = EXCLUDED.reason
            RETURNING id, user_id, fingerprint, alert_name, reason, created_at
            "#,
        )
        .bind(alert.id)
        .bind(&alert.user_id)
        .bind(&alert.fingerprint)
        .bind(&alert.alert_name)
        .bind(&alert.reason)
        .bind(alert.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn unhide_alert(&self, user_id: &str, fingerprint: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM user_hidden_alerts WHERE user_id = $1 AND fingerprint = $2")
                .bind(user_id)
                .bind(fingerprint)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_hidden_alerts(&self, user_id: &str) -> Result<Vec<HiddenAlert>> {
        let rows = sqlx::query_as::<_, HiddenAlertRow>(
            r#"
            SELECT id, user_id, fingerprint, alert_name, reason, created_at
            FROM user_hidden_alerts
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn clear_hidden_alerts(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_hidden_alerts WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn save_hidden_rule(&self, rule: &HiddenRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_hidden_rules (
                id, user_id, name, label_key, label_value, is_regex, is_enabled, priority,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                label_key = EXCLUDED.label_key,
                label_value = EXCLUDED.label_value,
                is_regex = EXCLUDED.is_regex,
                is_enabled = EXCLUDED.is_enabled,
                priority = EXCLUDED.priority,
                updated_at = EXCLUDED.updated_at
            WHERE user_hidden_rules.user_id = EXCLUDED.user_id
            "#,
        )
        .bind(rule.id)
        .bind(&rule.user_id)
        .bind(&rule.name)
        .bind(&rule.label_key)
        .bind(&rule.label_value)
        .bind(rule.is_regex)
        .bind(rule.is_enabled)
        .bind(rule.priority)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_hidden_rule(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_hidden_rules WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_hidden_rules(&self, user_id: &str, enabled_only: bool) -> Result<Vec<HiddenRule>> {
        let rows = sqlx::query_as::<_, HiddenRuleRow>(&format!(
            "SELECT {HIDDEN_RULE_COLUMNS} FROM user_hidden_rules \
             WHERE user_id = $1 AND ($2 = FALSE OR is_enabled) \
             ORDER BY priority DESC, created_at ASC"
        ))
        .bind(user_id)
        .bind(enabled_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
