//! In-memory statistics store
//!
//! Interprets filters with [`Filter::evaluate`]. Intended for tests and
//! single-process deployments without PostgreSQL.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    HiddenAlertStore, LabelSnapshots, OccurrenceStore, PeriodSeverityStatistics, RuleStore,
};
use crate::error::Result;
use crate::filter::Filter;
use crate::models::{
    AggregatedStatistics, AlertMetadata, AlertOccurrence, FiredEvent, GroupBy, GroupStatistics,
    HiddenAlert, HiddenRule, OccurrenceOrder, OnCallRule, PeriodType, ResolvedAlertSummary,
    StatisticsAggregate,
};
use crate::query::period::truncate;

/// Key reported for overall aggregates
pub const OVERALL_KEY: &str = "all";

/// Running aggregate mirroring the SQL aggregate expressions
#[derive(Debug, Clone, Copy, Default)]
struct StatsAccumulator {
    count: i64,
    total_duration: i64,
    nonzero_duration_sum: i64,
    nonzero_duration_n: i64,
    total_mttr: i64,
    nonzero_mttr_sum: i64,
    nonzero_mttr_n: i64,
}

impl StatsAccumulator {
    fn add(&mut self, occ: &AlertOccurrence) {
        self.count += 1;
        if let Some(d) = occ.duration_seconds {
            self.total_duration += d;
            if d != 0 {
                self.nonzero_duration_sum += d;
                self.nonzero_duration_n += 1;
            }
        }
        if let Some(m) = occ.mttr_seconds {
            self.total_mttr += m;
            if m != 0 {
                self.nonzero_mttr_sum += m;
                self.nonzero_mttr_n += 1;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self) -> AggregatedStatistics {
        let mean = |sum: i64, n: i64| if n == 0 { 0.0 } else { sum as f64 / n as f64 };
        AggregatedStatistics {
            count: self.count,
            avg_duration_seconds: mean(self.nonzero_duration_sum, self.nonzero_duration_n),
            total_duration_seconds: self.total_duration,
            avg_mttr_seconds: mean(self.nonzero_mttr_sum, self.nonzero_mttr_n),
        }
    }
}

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    occurrences: RwLock<Vec<AlertOccurrence>>,
    next_id: AtomicI64,
    rules: RwLock<Vec<OnCallRule>>,
    hidden_alerts: RwLock<Vec<HiddenAlert>>,
    hidden_rules: RwLock<Vec<HiddenRule>>,
    rollups: RwLock<Vec<StatisticsAggregate>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored occurrences
    pub fn len(&self) -> usize {
        self.occurrences.read().len()
    }

    /// Whether the store holds no occurrences
    pub fn is_empty(&self) -> bool {
        self.occurrences.read().is_empty()
    }

    fn matching(&self, filter: &Filter) -> Vec<AlertOccurrence> {
        self.occurrences
            .read()
            .iter()
            .filter(|o| filter.evaluate(o))
            .cloned()
            .collect()
    }
}

fn group_key(occ: &AlertOccurrence, group_by: GroupBy) -> String {
    match group_by {
        GroupBy::Severity => occ.severity.to_lowercase(),
        GroupBy::Team => occ.team().to_string(),
        GroupBy::AlertName => occ.alert_name.clone(),
        GroupBy::Overall | GroupBy::Period => OVERALL_KEY.to_string(),
    }
}

#[async_trait]
impl OccurrenceStore for MemoryStore {
    async fn insert_if_absent(&self, event: &FiredEvent) -> Result<(AlertOccurrence, bool)> {
        let mut occurrences = self.occurrences.write();
        if let Some(existing) = occurrences
            .iter()
            .find(|o| o.fingerprint == event.fingerprint && o.fired_at == event.fired_at)
        {
            return Ok((existing.clone(), false));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let occ = AlertOccurrence::from_fired(id, event.clone(), Utc::now());
        occurrences.push(occ.clone());
        Ok((occ, true))
    }

    async fn latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AlertOccurrence>> {
        Ok(self
            .occurrences
            .read()
            .iter()
            .filter(|o| o.fingerprint == fingerprint)
            .max_by_key(|o| o.fired_at)
            .cloned())
    }

    async fn resolve_unresolved(
        &self,
        fingerprint: &str,
        resolved_at: DateTime<Utc>,
        metadata: Option<&AlertMetadata>,
    ) -> Result<u64> {
        let mut occurrences = self.occurrences.write();
        let mut updated = 0;
        for occ in occurrences
            .iter_mut()
            .filter(|o| o.fingerprint == fingerprint)
        {
            if occ.resolve(resolved_at, metadata) {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn acknowledge_latest(
        &self,
        fingerprint: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut occurrences = self.occurrences.write();
        let latest = occurrences
            .iter_mut()
            .filter(|o| o.fingerprint == fingerprint && o.acknowledged_at.is_none())
            .max_by_key(|o| o.fired_at);
        Ok(match latest {
            Some(occ) => {
                if occ.acknowledge(acknowledged_at) {
                    1
                } else {
                    0
                }
            }
            None => 0,
        })
    }

    async fn query_occurrences(
        &self,
        filter: &Filter,
        order: OccurrenceOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertOccurrence>> {
        let mut rows = self.matching(filter);
        match order {
            OccurrenceOrder::FiredAtDesc => rows.sort_by_key(|o| (Reverse(o.fired_at), o.id)),
            OccurrenceOrder::FiredAtAsc => rows.sort_by_key(|o| (o.fired_at, o.id)),
        }
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_occurrences(&self, filter: &Filter) -> Result<i64> {
        let n = self
            .occurrences
            .read()
            .iter()
            .filter(|o| filter.evaluate(o))
            .count();
        Ok(i64::try_from(n).unwrap_or(i64::MAX))
    }

    async fn aggregate(
        &self,
        filter: &Filter,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<GroupStatistics>> {
        let mut groups: BTreeMap<String, StatsAccumulator> = BTreeMap::new();
        if matches!(group_by, GroupBy::Overall | GroupBy::Period) {
            groups.insert(OVERALL_KEY.to_string(), StatsAccumulator::default());
        }
        for occ in self.matching(filter) {
            groups.entry(group_key(&occ, group_by)).or_default().add(&occ);
        }

        let mut stats: Vec<GroupStatistics> = groups
            .into_iter()
            .map(|(key, acc)| GroupStatistics {
                key,
                stats: acc.finish(),
            })
            .collect();

        if group_by == GroupBy::AlertName {
            stats.sort_by(|a, b| b.stats.count.cmp(&a.stats.count).then_with(|| a.key.cmp(&b.key)));
        }
        if let Some(limit) = limit {
            stats.truncate(limit);
        }
        Ok(stats)
    }

    async fn aggregate_by_period(
        &self,
        filter: &Filter,
        period: PeriodType,
    ) -> Result<Vec<PeriodSeverityStatistics>> {
        let mut groups: BTreeMap<(DateTime<Utc>, String), StatsAccumulator> = BTreeMap::new();
        for occ in self.matching(filter) {
            groups
                .entry((truncate(occ.fired_at, period), occ.severity.to_lowercase()))
                .or_default()
                .add(&occ);
        }
        Ok(groups
            .into_iter()
            .map(|((period_start, severity), acc)| PeriodSeverityStatistics {
                period_start,
                severity,
                stats: acc.finish(),
            })
            .collect())
    }

    async fn distinct_fingerprints(&self, filter: &Filter) -> Result<Vec<String>> {
        let set: std::collections::BTreeSet<String> = self
            .matching(filter)
            .into_iter()
            .map(|o| o.fingerprint)
            .collect();
        Ok(set.into_iter().collect())
    }

    async fn count_fingerprints(&self, filter: &Filter) -> Result<i64> {
        let set: HashSet<String> = self
            .matching(filter)
            .into_iter()
            .map(|o| o.fingerprint)
            .collect();
        Ok(i64::try_from(set.len()).unwrap_or(i64::MAX))
    }

    async fn latest_labels(&self, fingerprints: &[String]) -> Result<LabelSnapshots> {
        let wanted: HashSet<&str> = fingerprints.iter().map(String::as_str).collect();
        let occurrences = self.occurrences.read();
        let mut latest: HashMap<&str, &AlertOccurrence> = HashMap::new();
        for occ in occurrences
            .iter()
            .filter(|o| wanted.contains(o.fingerprint.as_str()))
        {
            latest
                .entry(occ.fingerprint.as_str())
                .and_modify(|cur| {
                    if (occ.resolved_at, occ.fired_at) > (cur.resolved_at, cur.fired_at) {
                        *cur = occ;
                    }
                })
                .or_insert(occ);
        }
        Ok(latest
            .into_iter()
            .map(|(fp, occ)| (fp.to_string(), occ.metadata.labels.clone()))
            .collect())
    }

    async fn summarize_resolved(
        &self,
        filter: &Filter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResolvedAlertSummary>> {
        let mut groups: HashMap<(String, String, String), (StatsAccumulator, Vec<AlertOccurrence>)> =
            HashMap::new();
        for occ in self
            .matching(filter)
            .into_iter()
            .filter(|o| o.resolved_at.is_some())
        {
            let key = (
                occ.fingerprint.clone(),
                occ.alert_name.clone(),
                occ.severity.clone(),
            );
            let entry = groups.entry(key).or_default();
            entry.0.add(&occ);
            entry.1.push(occ);
        }

        let mut summaries: Vec<ResolvedAlertSummary> = groups
            .into_iter()
            .filter_map(|((fingerprint, alert_name, severity), (acc, rows))| {
                let latest = rows.iter().max_by_key(|o| (o.resolved_at, o.fired_at))?;
                let first_fired_at = rows.iter().map(|o| o.fired_at).min()?;
                let last_resolved_at = latest.resolved_at?;
                let stats = acc.finish();
                Some(ResolvedAlertSummary {
                    fingerprint,
                    alert_name,
                    severity,
                    occurrence_count: stats.count,
                    first_fired_at,
                    last_resolved_at,
                    total_duration_seconds: stats.total_duration_seconds,
                    avg_duration_seconds: stats.avg_duration_seconds,
                    avg_mttr_seconds: stats.avg_mttr_seconds,
                    total_mttr_seconds: acc.total_mttr,
                    metadata: latest.metadata.clone(),
                })
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.last_resolved_at
                .cmp(&a.last_resolved_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn history(&self, fingerprint: &str, limit: usize) -> Result<Vec<AlertOccurrence>> {
        let mut rows: Vec<AlertOccurrence> = self
            .occurrences
            .read()
            .iter()
            .filter(|o| o.fingerprint == fingerprint)
            .cloned()
            .collect();
        rows.sort_by_key(|o| Reverse(o.fired_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn purge_fired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut occurrences = self.occurrences.write();
        let before = occurrences.len();
        occurrences.retain(|o| o.fired_at >= cutoff);
        Ok((before - occurrences.len()) as u64)
    }

    async fn save_rollups(&self, rollups: &[StatisticsAggregate]) -> Result<u64> {
        let mut stored = self.rollups.write();
        for rollup in rollups {
            let same = |r: &StatisticsAggregate| {
                r.period_type == rollup.period_type
                    && r.period_start == rollup.period_start
                    && r.dimension == rollup.dimension
                    && r.dimension_value == rollup.dimension_value
            };
            match stored.iter_mut().find(|r| same(r)) {
                Some(existing) => *existing = rollup.clone(),
                None => stored.push(rollup.clone()),
            }
        }
        Ok(rollups.len() as u64)
    }

    async fn list_rollups(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticsAggregate>> {
        let mut rows: Vec<StatisticsAggregate> = self
            .rollups
            .read()
            .iter()
            .filter(|r| r.period_type == period_type && r.period_start >= start && r.period_start <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.period_start, a.dimension.as_str(), &a.dimension_value).cmp(&(
                b.period_start,
                b.dimension.as_str(),
                &b.dimension_value,
            ))
        });
        Ok(rows)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn create_rule(&self, rule: &OnCallRule) -> Result<()> {
        self.rules.write().push(rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &OnCallRule) -> Result<bool> {
        let mut rules = self.rules.write();
        match rules
            .iter_mut()
            .find(|r| r.id == rule.id && r.user_id == rule.user_id)
        {
            Some(existing) => {
                *existing = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<OnCallRule>> {
        Ok(self.rules.read().iter().find(|r| r.id == id).cloned())
    }

    async fn list_rules(&self, user_id: &str, active_only: bool) -> Result<Vec<OnCallRule>> {
        let mut rules: Vec<OnCallRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.user_id == user_id && (!active_only || r.is_active))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn delete_rule(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| !(r.id == id && r.user_id == user_id));
        Ok(rules.len() != before)
    }
}

#[async_trait]
impl HiddenAlertStore for MemoryStore {
    async fn hide_alert(&self, alert: &HiddenAlert) -> Result<HiddenAlert> {
        let mut hidden = self.hidden_alerts.write();
        if let Some(existing) = hidden
            .iter_mut()
            .find(|h| h.user_id == alert.user_id && h.fingerprint == alert.fingerprint)
        {
            existing.alert_name.clone_from(&alert.alert_name);
            existing.reason.clone_from(&alert.reason);
            return Ok(existing.clone());
        }
        hidden.push(alert.clone());
        Ok(alert.clone())
    }

    async fn unhide_alert(&self, user_id: &str, fingerprint: &str) -> Result<bool> {
        let mut hidden = self.hidden_alerts.write();
        let before = hidden.len();
        hidden.retain(|h| !(h.user_id == user_id && h.fingerprint == fingerprint));
        Ok(hidden.len() != before)
    }

    async fn list_hidden_alerts(&self, user_id: &str) -> Result<Vec<HiddenAlert>> {
        let mut rows: Vec<HiddenAlert> = self
            .hidden_alerts
            .read()
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|h| Reverse(h.created_at));
        Ok(rows)
    }

    async fn clear_hidden_alerts(&self, user_id: &str) -> Result<u64> {
        let mut hidden = self.hidden_alerts.write();
        let before = hidden.len();
        hidden.retain(|h| h.user_id != user_id);
        Ok((before - hidden.len()) as u64)
    }

    async fn save_hidden_rule(&self, rule: &HiddenRule) -> Result<()> {
        let mut rules = self.hidden_rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn delete_hidden_rule(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let mut rules = self.hidden_rules.write();
        let before = rules.len();
        rules.retain(|r| !(r.id == id && r.user_id == user_id));
        Ok(rules.len() != before)
    }

    async fn list_hidden_rules(&self, user_id: &str, enabled_only: bool) -> Result<Vec<HiddenRule>> {
        let mut rules: Vec<HiddenRule> = self
            .hidden_rules
            .read()
            .iter()
            .filter(|r| r.user_id == user_id && (!enabled_only || r.is_enabled))
            .cloned()
            .collect();
        rules.sort_by_key(|r| (Reverse(r.priority), r.created_at));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn event(fp: &str, severity: &str, fired_at: DateTime<Utc>) -> FiredEvent {
        FiredEvent {
            fingerprint: fp.into(),
            alert_name: format!("Alert-{fp}"),
            severity: severity.into(),
            metadata: AlertMetadata::default(),
            fired_at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        let (first, created) = store.insert_if_absent(&event("abc", "info", t0())).await.unwrap();
        assert!(created);
        let (second, created) = store.insert_if_absent(&event("abc", "info", t0())).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn resolve_updates_all_unresolved_rows() {
        let store = MemoryStore::new();
        store.insert_if_absent(&event("dup", "info", t0())).await.unwrap();
        store
            .insert_if_absent(&event("dup", "info", t0() + Duration::minutes(1)))
            .await
            .unwrap();

        let n = store
            .resolve_unresolved("dup", t0() + Duration::minutes(10), None)
            .await
            .unwrap();
        assert_eq!(n, 2);
        let again = store
            .resolve_unresolved("dup", t0() + Duration::minutes(20), None)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn averages_ignore_zero_and_missing_durations() {
        let store = MemoryStore::new();
        for (i, fp) in ["a", "b", "c"].iter().enumerate() {
            store
                .insert_if_absent(&event(fp, "critical", t0() + Duration::minutes(i as i64)))
                .await
                .unwrap();
        }
        store.resolve_unresolved("a", t0() + Duration::seconds(100), None).await.unwrap();
        // resolved at the instant it fired: zero duration
        store
            .resolve_unresolved("b", t0() + Duration::minutes(1), None)
            .await
            .unwrap();

        let stats = store.aggregate(&Filter::True, GroupBy::Overall, None).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].key, OVERALL_KEY);
        assert_eq!(stats[0].stats.count, 3);
        assert_eq!(stats[0].stats.total_duration_seconds, 100);
        assert!((stats[0].stats.avg_duration_seconds - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn hidden_rules_sorted_by_priority_then_age() {
        let store = MemoryStore::new();
        let rule = |name: &str, priority: i32, minutes: i64| HiddenRule {
            id: Uuid::new_v4(),
            user_id: "u".into(),
            name: name.into(),
            label_key: "env".into(),
            label_value: "x".into(),
            is_regex: false,
            is_enabled: true,
            priority,
            created_at: t0() + Duration::minutes(minutes),
            updated_at: t0(),
        };
        store.save_hidden_rule(&rule("low", 1, 0)).await.unwrap();
        store.save_hidden_rule(&rule("high-new", 5, 2)).await.unwrap();
        store.save_hidden_rule(&rule("high-old", 5, 1)).await.unwrap();

        let names: Vec<String> = store
            .list_hidden_rules("u", true)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["high-old", "high-new", "low"]);
    }
}
