//! Rule engine: rule management and rule-based filtering

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::validate::{compile, CompiledRule};
use crate::db::StatisticsStore;
use crate::error::{Error, ErrorContext, Result};
use crate::filter::Filter;
use crate::models::{
    AlertOccurrence, OccurrenceOrder, OnCallRule, OnCallRuleInput, RuleConfig, RuleTestResult,
    DEFAULT_SAMPLE_SIZE,
};

/// Validates, stores and applies per-user on-call rules
#[derive(Clone)]
pub struct RuleEngine {
    store: Arc<dyn StatisticsStore>,
}

impl RuleEngine {
    /// Create a rule engine over a store
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    /// Validate a rule configuration
    pub fn validate_rule(config: &RuleConfig) -> Result<CompiledRule> {
        Ok(compile(config)?)
    }

    /// Narrow `base` to occurrences matching any of the user's active rules.
    ///
    /// With no usable rules the base filter is returned unchanged.
    pub async fn apply_rules(&self, user_id: &str, base: Filter) -> Result<Filter> {
        match self.user_rules_filter(user_id).await? {
            Some(rules) => Ok(base.and(rules)),
            None => Ok(base),
        }
    }

    /// The user's active rules as one filter, or `None` if there are none.
    ///
    /// Each rule's criteria are grouped by that rule's own logic, and the
    /// groups are OR-ed together. Rules whose stored config cannot be parsed
    /// or no longer validates are skipped.
    pub async fn user_rules_filter(&self, user_id: &str) -> Result<Option<Filter>> {
        let rules = self
            .store
            .list_rules(user_id, true)
            .await
            .context("load active on-call rules")?;

        let mut groups: Vec<Filter> = rules
            .iter()
            .filter_map(|rule| compile_stored(rule).map(CompiledRule::into_filter))
            .collect();

        debug!(user_id, active = rules.len(), usable = groups.len(), "Applying on-call rules");

        Ok(match groups.len() {
            0 => None,
            1 => groups.pop(),
            _ => Some(Filter::Any(groups)),
        })
    }

    /// Whether one occurrence matches the user's active rules.
    /// A user without usable rules matches everything.
    pub async fn matches_user_rules(&self, user_id: &str, occ: &AlertOccurrence) -> Result<bool> {
        Ok(self
            .user_rules_filter(user_id)
            .await?
            .map_or(true, |filter| filter.evaluate(occ)))
    }

    /// Evaluate a config against history without saving it.
    ///
    /// A `sample_size` of zero uses the default.
    pub async fn test_rule(
        &self,
        user_id: &str,
        config: &RuleConfig,
        sample_size: usize,
    ) -> Result<RuleTestResult> {
        let filter = compile(config)?.into_filter();
        let sample_size = if sample_size == 0 {
            DEFAULT_SAMPLE_SIZE
        } else {
            sample_size
        };

        let total_count = self
            .store
            .count_occurrences(&filter)
            .await
            .context("count rule test matches")?;
        let samples = self
            .store
            .query_occurrences(&filter, OccurrenceOrder::FiredAtDesc, sample_size, 0)
            .await
            .context("load rule test samples")?;

        debug!(user_id, total_count, samples = samples.len(), "Tested rule");

        Ok(RuleTestResult {
            samples,
            total_count,
        })
    }

    /// Validate and store a new rule
    pub async fn create_rule(&self, user_id: &str, input: OnCallRuleInput) -> Result<OnCallRule> {
        compile(&input.rule_config)?;

        let now = Utc::now();
        let rule = OnCallRule {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            rule_name: input.rule_name,
            rule_config: serde_json::to_value(&input.rule_config)?,
            is_active: input.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        self.store
            .create_rule(&rule)
            .await
            .context("create on-call rule")?;

        info!(user_id, rule_id = %rule.id, "Created on-call rule");
        Ok(rule)
    }

    /// Validate and replace an existing rule owned by the user
    pub async fn update_rule(
        &self,
        user_id: &str,
        id: Uuid,
        input: OnCallRuleInput,
    ) -> Result<OnCallRule> {
        compile(&input.rule_config)?;

        let existing = self.get_rule(user_id, id).await?;
        let rule = OnCallRule {
            rule_name: input.rule_name,
            rule_config: serde_json::to_value(&input.rule_config)?,
            is_active: input.is_active.unwrap_or(existing.is_active),
            updated_at: Utc::now(),
            ..existing
        };

        if !self
            .store
            .update_rule(&rule)
            .await
            .context("update on-call rule")?
        {
            return Err(Error::not_found("on-call rule", id.to_string()));
        }

        info!(user_id, rule_id = %id, "Updated on-call rule");
        Ok(rule)
    }

    /// Delete a rule owned by the user
    pub async fn delete_rule(&self, user_id: &str, id: Uuid) -> Result<()> {
        if !self
            .store
            .delete_rule(user_id, id)
            .await
            .context("delete on-call rule")?
        {
            return Err(Error::not_found("on-call rule", id.to_string()));
        }
        info!(user_id, rule_id = %id, "Deleted on-call rule");
        Ok(())
    }

    /// Fetch a rule owned by the user
    pub async fn get_rule(&self, user_id: &str, id: Uuid) -> Result<OnCallRule> {
        match self.store.get_rule(id).await.context("load on-call rule")? {
            Some(rule) if rule.user_id == user_id => Ok(rule),
            _ => Err(Error::not_found("on-call rule", id.to_string())),
        }
    }

    /// Rules of a user
    pub async fn list_rules(&self, user_id: &str, active_only: bool) -> Result<Vec<OnCallRule>> {
        self.store
            .list_rules(user_id, active_only)
            .await
            .context("list on-call rules")
    }

    /// Number of stored occurrences matched by this one rule.
    ///
    /// The count is per rule: the user's other rules are not applied, and the
    /// rule is counted whether or not it is active. Use
    /// [`apply_rules`](Self::apply_rules) for the combined rule set.
    pub async fn rule_match_count(&self, user_id: &str, id: Uuid) -> Result<i64> {
        let rule = self.get_rule(user_id, id).await?;
        let config = rule.config()?;
        let filter = compile(&config)?.into_filter();
        self.store
            .count_occurrences(&filter)
            .await
            .context("count rule matches")
    }
}

fn compile_stored(rule: &OnCallRule) -> Option<CompiledRule> {
    let config = match rule.config() {
        Ok(config) => config,
        Err(e) => {
            warn!(rule_id = %rule.id, user_id = %rule.user_id, error = %e, "Skipping unparsable rule config");
            return None;
        }
    };
    match compile(&config) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            warn!(rule_id = %rule.id, user_id = %rule.user_id, error = %e, "Skipping invalid rule config");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone};

    use super::*;
    use crate::db::{MemoryStore, OccurrenceStore, RuleStore};
    use crate::models::{AlertMetadata, FiredEvent, RuleCriterion};

    fn fired(fp: &str, name: &str, severity: &str, labels: &[(&str, &str)], minute: u32) -> FiredEvent {
        let mut metadata = AlertMetadata::default();
        for (k, v) in labels {
            metadata.labels.insert((*k).to_string(), (*v).to_string());
        }
        FiredEvent {
            fingerprint: fp.into(),
            alert_name: name.into(),
            severity: severity.into(),
            metadata,
            fired_at: at(minute),
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, minute, 0).unwrap()
    }

    fn input(name: &str, config: RuleConfig) -> OnCallRuleInput {
        OnCallRuleInput {
            rule_name: name.into(),
            rule_config: config,
            is_active: None,
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, RuleEngine) {
        let store = Arc::new(MemoryStore::new());
        // (severity, team, name) combinations exercising both rules
        let events = [
            fired("a", "DiskFull", "critical", &[("team", "sre")], 0),
            fired("b", "DiskFull", "critical", &[("team", "web")], 1),
            fired("c", "DiskFull", "warning", &[("team", "sre")], 2),
            fired("d", "HighLatency", "info", &[("env", "prod")], 3),
            fired("e", "DiskFull", "info", &[("env", "prod")], 4),
            fired("f", "CpuHot", "info", &[("env", "dev")], 5),
        ];
        for event in &events {
            store.insert_if_absent(event).await.unwrap();
        }
        let engine = RuleEngine::new(store.clone());
        (store, engine)
    }

    async fn matching(store: &MemoryStore, filter: &Filter) -> Vec<String> {
        let mut fps: Vec<String> = store
            .query_occurrences(filter, OccurrenceOrder::FiredAtAsc, 100, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.fingerprint)
            .collect();
        fps.sort();
        fps
    }

    #[tokio::test]
    async fn no_rules_returns_base_unchanged() {
        let (store, engine) = seeded().await;
        let filter = engine.apply_rules("alice", Filter::True).await.unwrap();
        assert!(filter.is_true());
        assert_eq!(matching(&store, &filter).await.len(), 6);
    }

    #[tokio::test]
    async fn two_rules_union_their_matches() {
        let (store, engine) = seeded().await;

        // R1: critical AND team=sre  -> a
        engine
            .create_rule(
                "alice",
                input(
                    "r1",
                    RuleConfig::new(
                        "AND",
                        vec![
                            RuleCriterion::severity("equals", &["critical"]),
                            RuleCriterion::label("team", "equals", "sre"),
                        ],
                    ),
                ),
            )
            .await
            .unwrap();
        // R2: name starts with High OR env=prod -> d, e
        engine
            .create_rule(
                "alice",
                input(
                    "r2",
                    RuleConfig::new(
                        "OR",
                        vec![
                            RuleCriterion::alert_name("starts_with", "High"),
                            RuleCriterion::label("env", "equals", "prod"),
                        ],
                    ),
                ),
            )
            .await
            .unwrap();

        let filter = engine.apply_rules("alice", Filter::True).await.unwrap();
        assert_eq!(matching(&store, &filter).await, vec!["a", "d", "e"]);

        let occ = store.latest_by_fingerprint("b").await.unwrap().unwrap();
        assert!(!engine.matches_user_rules("alice", &occ).await.unwrap());
        let occ = store.latest_by_fingerprint("e").await.unwrap().unwrap();
        assert!(engine.matches_user_rules("alice", &occ).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_stored_rule_is_skipped() {
        let (store, engine) = seeded().await;
        let now = Utc::now();
        store
            .create_rule(&OnCallRule {
                id: Uuid::new_v4(),
                user_id: "bob".into(),
                rule_name: "broken".into(),
                rule_config: serde_json::json!({"criteria": "nope"}),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        engine
            .create_rule(
                "bob",
                input(
                    "info only",
                    RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["info"])]),
                ),
            )
            .await
            .unwrap();

        let filter = engine.apply_rules("bob", Filter::True).await.unwrap();
        assert_eq!(matching(&store, &filter).await, vec!["d", "e", "f"]);
    }

    #[tokio::test]
    async fn inactive_rules_are_ignored() {
        let (_store, engine) = seeded().await;
        let mut rule = input(
            "off",
            RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["info"])]),
        );
        rule.is_active = Some(false);
        engine.create_rule("carol", rule).await.unwrap();

        assert!(engine.user_rules_filter("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rule_samples_newest_first_without_persisting() {
        let (_store, engine) = seeded().await;
        let config = RuleConfig::new("AND", vec![RuleCriterion::alert_name("equals", "DiskFull")]);

        let result = engine.test_rule("dave", &config, 2).await.unwrap();
        assert_eq!(result.total_count, 4);
        let fps: Vec<_> = result.samples.iter().map(|o| o.fingerprint.as_str()).collect();
        assert_eq!(fps, vec!["e", "c"]);

        let result = engine.test_rule("dave", &config, 0).await.unwrap();
        assert_eq!(result.samples.len(), 4);

        assert!(engine.list_rules("dave", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let (_store, engine) = seeded().await;
        let err = engine
            .create_rule("erin", input("bad", RuleConfig::new("XOR", vec![])))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(engine.list_rules("erin", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rules_are_owner_scoped() {
        let (_store, engine) = seeded().await;
        let rule = engine
            .create_rule(
                "alice",
                input(
                    "crit",
                    RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["critical"])]),
                ),
            )
            .await
            .unwrap();

        assert_eq!(engine.rule_match_count("alice", rule.id).await.unwrap(), 2);
        assert!(engine
            .rule_match_count("mallory", rule.id)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(engine.delete_rule("mallory", rule.id).await.unwrap_err().is_not_found());

        let updated = engine
            .update_rule(
                "alice",
                rule.id,
                input(
                    "warn",
                    RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["warning"])]),
                ),
            )
            .await
            .unwrap();
        assert_eq!(updated.rule_name, "warn");
        assert_eq!(updated.created_at, rule.created_at);
        assert_eq!(engine.rule_match_count("alice", rule.id).await.unwrap(), 1);

        engine.delete_rule("alice", rule.id).await.unwrap();
        assert!(engine.get_rule("alice", rule.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn match_count_ignores_other_rules() {
        let (_store, engine) = seeded().await;
        let crit = engine
            .create_rule(
                "frank",
                input(
                    "crit",
                    RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["critical"])]),
                ),
            )
            .await
            .unwrap();
        engine
            .create_rule(
                "frank",
                input(
                    "info",
                    RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["info"])]),
                ),
            )
            .await
            .unwrap();

        assert_eq!(engine.rule_match_count("frank", crit.id).await.unwrap(), 2);

        let union = engine.apply_rules("frank", Filter::True).await.unwrap();
        assert_eq!(engine.store.count_occurrences(&union).await.unwrap(), 5);

        let paused = engine
            .update_rule(
                "frank",
                crit.id,
                OnCallRuleInput {
                    is_active: Some(false),
                    ..input(
                        "crit",
                        RuleConfig::new("AND", vec![RuleCriterion::severity("in", &["critical"])]),
                    )
                },
            )
            .await
            .unwrap();
        assert!(!paused.is_active);
        assert_eq!(engine.rule_match_count("frank", crit.id).await.unwrap(), 2);
    }
}
