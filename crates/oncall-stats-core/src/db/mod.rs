//! Storage layer for alert statistics
//!
//! The services talk to storage through the traits below. Two backends
//! implement them: [`PgStatisticsStore`] for PostgreSQL and [`MemoryStore`]
//! for tests and embedded use.

mod memory;
mod postgres;
mod sql;

pub use memory::MemoryStore;
pub use postgres::{PgStatisticsStore, PostgresPool};

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::filter::Filter;
use crate::models::{
    AggregatedStatistics, AlertMetadata, AlertOccurrence, FiredEvent, GroupBy, GroupStatistics,
    HiddenAlert, HiddenRule, OccurrenceOrder, OnCallRule, PeriodType, ResolvedAlertSummary,
    StatisticsAggregate,
};

/// Aggregate for one (period start, severity) pair
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSeverityStatistics {
    /// Truncated fired time
    pub period_start: DateTime<Utc>,
    /// Lowercase severity
    pub severity: String,
    /// Aggregate values
    pub stats: AggregatedStatistics,
}

/// Latest label snapshot per fingerprint
pub type LabelSnapshots = HashMap<String, BTreeMap<String, String>>;

/// Alert occurrence persistence
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    /// Insert unless a row with the same (fingerprint, fired_at) exists.
    /// Returns the stored row and whether it was created by this call.
    async fn insert_if_absent(&self, event: &FiredEvent) -> Result<(AlertOccurrence, bool)>;

    /// Most recently fired occurrence of a fingerprint
    async fn latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AlertOccurrence>>;

    /// Resolve every unresolved occurrence of a fingerprint, optionally
    /// replacing the metadata snapshot. Returns the number of rows updated.
    async fn resolve_unresolved(
        &self,
        fingerprint: &str,
        resolved_at: DateTime<Utc>,
        metadata: Option<&AlertMetadata>,
    ) -> Result<u64>;

    /// Acknowledge the most recent unacknowledged occurrence of a fingerprint
    async fn acknowledge_latest(
        &self,
        fingerprint: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Filtered page of occurrences
    async fn query_occurrences(
        &self,
        filter: &Filter,
        order: OccurrenceOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertOccurrence>>;

    /// Number of matching occurrences
    async fn count_occurrences(&self, filter: &Filter) -> Result<i64>;

    /// Grouped aggregate. `limit` applies to alert-name grouping, which is
    /// ordered by descending count.
    async fn aggregate(
        &self,
        filter: &Filter,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<GroupStatistics>>;

    /// Aggregate per truncated fired time and severity, in one pass
    async fn aggregate_by_period(
        &self,
        filter: &Filter,
        period: PeriodType,
    ) -> Result<Vec<PeriodSeverityStatistics>>;

    /// Distinct fingerprints among matching occurrences
    async fn distinct_fingerprints(&self, filter: &Filter) -> Result<Vec<String>>;

    /// Number of distinct fingerprints among matching occurrences
    async fn count_fingerprints(&self, filter: &Filter) -> Result<i64>;

    /// Labels of the most recent occurrence of each fingerprint
    async fn latest_labels(&self, fingerprints: &[String]) -> Result<LabelSnapshots>;

    /// Per-fingerprint summaries of matching occurrences, most recently
    /// resolved first
    async fn summarize_resolved(
        &self,
        filter: &Filter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResolvedAlertSummary>>;

    /// Occurrences of one fingerprint, newest first
    async fn history(&self, fingerprint: &str, limit: usize) -> Result<Vec<AlertOccurrence>>;

    /// Delete occurrences fired before the cutoff
    async fn purge_fired_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Upsert rollups
    async fn save_rollups(&self, rollups: &[StatisticsAggregate]) -> Result<u64>;

    /// Rollups of one granularity whose period starts inside the range
    async fn list_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>>;
}

/// On-call rule persistence
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert a rule
    async fn create_rule(&self, rule: &OnCallRule) -> Result<()>;

    /// Replace a rule owned by `rule.user_id`. Returns false if absent.
    async fn update_rule(&self, rule: &OnCallRule) -> Result<bool>;

    /// Fetch by id
    async fn get_rule(&self, id: Uuid) -> Result<Option<OnCallRule>>;

    /// Rules of a user, oldest first
    async fn list_rules(&self, user_id: &str, active_only: bool) -> Result<Vec<OnCallRule>>;

    /// Delete a rule owned by the user. Returns false if absent.
    async fn delete_rule(&self, user_id: &str, id: Uuid) -> Result<bool>;
}

/// Hidden alert and hidden rule persistence
#[async_trait]
pub trait HiddenAlertStore: Send + Sync {
    /// Hide a fingerprint, replacing any existing hide for the same pair
    async fn hide_alert(&self, alert: &HiddenAlert) -> Result<HiddenAlert>;

    /// Remove a hide. Returns false if there was nothing to remove.
    async fn unhide_alert(&self, user_id: &str, fingerprint: &str) -> Result<bool>;

    /// Hidden alerts of a user, newest first
    async fn list_hidden_alerts(&self, user_id: &str) -> Result<Vec<HiddenAlert>>;

    /// Remove every hide of a user
    async fn clear_hidden_alerts(&self, user_id: &str) -> Result<u64>;

    /// Insert or replace a hidden rule
    async fn save_hidden_rule(&self, rule: &HiddenRule) -> Result<()>;

    /// Delete a hidden rule owned by the user. Returns false if absent.
    async fn delete_hidden_rule(&self, user_id: &str, id: Uuid) -> Result<bool>;

    /// Hidden rules of a user, by priority desc then creation asc
    async fn list_hidden_rules(&self, user_id: &str, enabled_only: bool) -> Result<Vec<HiddenRule>>;
}

/// Everything the statistics services need from storage
pub trait StatisticsStore: OccurrenceStore + RuleStore + HiddenAlertStore {}

impl<T> StatisticsStore for T where T: OccurrenceStore + RuleStore + HiddenAlertStore {}
