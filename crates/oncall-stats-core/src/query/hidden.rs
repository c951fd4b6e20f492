//! Per-user hidden alert resolution and management

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::StatisticsStore;
use crate::error::{Error, ErrorContext, Result};
use crate::models::{HiddenAlert, HiddenRule, HiddenRuleInput};
use crate::rules::is_valid_label_key;

/// A hidden rule ready to be matched against label snapshots
struct LabelMatcher {
    rule_id: Uuid,
    key: String,
    value: ValueMatch,
}

enum ValueMatch {
    Exact(String),
    Pattern(Regex),
}

impl LabelMatcher {
    fn from_rule(rule: &HiddenRule) -> Option<Self> {
        let value = if rule.is_regex {
            match Regex::new(&rule.label_value) {
                Ok(re) => ValueMatch::Pattern(re),
                Err(e) => {
                    warn!(rule_id = %rule.id, user_id = %rule.user_id, error = %e, "Skipping hidden rule with invalid regex");
                    return None;
                }
            }
        } else {
            ValueMatch::Exact(rule.label_value.clone())
        };
        Some(Self {
            rule_id: rule.id,
            key: rule.label_key.clone(),
            value,
        })
    }

    fn matches(&self, value: &str) -> bool {
        match &self.value {
            ValueMatch::Exact(expected) => expected == value,
            ValueMatch::Pattern(re) => re.is_match(value),
        }
    }
}

/// Decides which fingerprints a user has hidden
#[derive(Clone)]
pub struct HiddenAlertResolver {
    store: Arc<dyn StatisticsStore>,
}

impl HiddenAlertResolver {
    /// Create a resolver over a store
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    /// Fingerprints hidden for the user among `candidates`.
    ///
    /// A fingerprint is hidden if the user hid it directly, or if its most
    /// recent label snapshot matches one of the user's enabled hidden rules.
    /// Rules are tried in priority order and the first match wins.
    pub async fn hidden_fingerprints(
        &self,
        user_id: &str,
        candidates: &[String],
    ) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_set: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        let mut hidden: BTreeSet<String> = self
            .store
            .list_hidden_alerts(user_id)
            .await
            .context("load hidden alerts")?
            .into_iter()
            .filter(|h| candidate_set.contains(h.fingerprint.as_str()))
            .map(|h| h.fingerprint)
            .collect();
        let direct = hidden.len();

        let matchers: Vec<LabelMatcher> = self
            .store
            .list_hidden_rules(user_id, true)
            .await
            .context("load hidden rules")?
            .iter()
            .filter_map(LabelMatcher::from_rule)
            .collect();

        if !matchers.is_empty() {
            let remaining: Vec<String> = candidates
                .iter()
                .filter(|fp| !hidden.contains(fp.as_str()))
                .cloned()
                .collect();
            let snapshots = self
                .store
                .latest_labels(&remaining)
                .await
                .context("load latest label snapshots")?;

            for (fingerprint, labels) in snapshots {
                let matched = matchers.iter().find(|m| {
                    labels
                        .get(&m.key)
                        .is_some_and(|value| m.matches(value))
                });
                if let Some(matcher) = matched {
                    debug!(%fingerprint, rule_id = %matcher.rule_id, "Fingerprint hidden by rule");
                    hidden.insert(fingerprint);
                }
            }
        }

        debug!(
            user_id,
            candidates = candidates.len(),
            direct,
            by_rule = hidden.len() - direct,
            "Resolved hidden fingerprints"
        );
        Ok(hidden.into_iter().collect())
    }

    /// Hide a fingerprint for the user, replacing any previous hide
    pub async fn hide_alert(
        &self,
        user_id: &str,
        fingerprint: &str,
        alert_name: &str,
        reason: Option<String>,
    ) -> Result<HiddenAlert> {
        if fingerprint.is_empty() {
            return Err(Error::validation("fingerprint must not be empty"));
        }
        let alert = HiddenAlert {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            alert_name: alert_name.to_string(),
            reason,
            created_at: Utc::now(),
        };
        let stored = self.store.hide_alert(&alert).await.context("hide alert")?;
        info!(user_id, fingerprint, "Hid alert");
        Ok(stored)
    }

    /// Unhide a fingerprint. Unhiding something not hidden is not an error.
    pub async fn unhide_alert(&self, user_id: &str, fingerprint: &str) -> Result<()> {
        if self
            .store
            .unhide_alert(user_id, fingerprint)
            .await
            .context("unhide alert")?
        {
            info!(user_id, fingerprint, "Unhid alert");
        } else {
            warn!(user_id, fingerprint, "Alert was not hidden");
        }
        Ok(())
    }

    /// Hidden alerts of the user, newest first
    pub async fn list_hidden_alerts(&self, user_id: &str) -> Result<Vec<HiddenAlert>> {
        self.store
            .list_hidden_alerts(user_id)
            .await
            .context("list hidden alerts")
    }

    /// Unhide everything for the user
    pub async fn clear_hidden_alerts(&self, user_id: &str) -> Result<u64> {
        let removed = self
            .store
            .clear_hidden_alerts(user_id)
            .await
            .context("clear hidden alerts")?;
        info!(user_id, removed, "Cleared hidden alerts");
        Ok(removed)
    }

    /// Validate and store a hidden rule. An input id replaces the user's
    /// existing rule with that id.
    pub async fn save_hidden_rule(&self, user_id: &str, input: HiddenRuleInput) -> Result<HiddenRule> {
        if !is_valid_label_key(&input.label_key) {
            return Err(Error::validation(format!(
                "invalid label key: {:?}",
                input.label_key
            )));
        }
        if input.label_value.is_empty() {
            return Err(Error::validation("label value must not be empty"));
        }
        if input.is_regex {
            Regex::new(&input.label_value).map_err(|e| {
                Error::validation(format!("invalid regex {:?}: {e}", input.label_value))
            })?;
        }

        let now = Utc::now();
        let existing = match input.id {
            Some(id) => Some(self.owned_hidden_rule(user_id, id).await?),
            None => None,
        };
        let rule = HiddenRule {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |r| r.id),
            user_id: user_id.to_string(),
            name: input.name,
            label_key: input.label_key,
            label_value: input.label_value,
            is_regex: input.is_regex,
            is_enabled: input.is_enabled.unwrap_or(true),
            priority: input.priority,
            created_at: existing.as_ref().map_or(now, |r| r.created_at),
            updated_at: now,
        };

        self.store
            .save_hidden_rule(&rule)
            .await
            .context("save hidden rule")?;
        info!(user_id, rule_id = %rule.id, "Saved hidden rule");
        Ok(rule)
    }

    /// Delete a hidden rule owned by the user
    pub async fn delete_hidden_rule(&self, user_id: &str, id: Uuid) -> Result<()> {
        if !self
            .store
            .delete_hidden_rule(user_id, id)
            .await
            .context("delete hidden rule")?
        {
            return Err(Error::not_found("hidden rule", id.to_string()));
        }
        info!(user_id, rule_id = %id, "Deleted hidden rule");
        Ok(())
    }

    /// Hidden rules of the user, highest priority first
    pub async fn list_hidden_rules(&self, user_id: &str, enabled_only: bool) -> Result<Vec<HiddenRule>> {
        self.store
            .list_hidden_rules(user_id, enabled_only)
            .await
            .context("list hidden rules")
    }

    async fn owned_hidden_rule(&self, user_id: &str, id: Uuid) -> Result<HiddenRule> {
        self.list_hidden_rules(user_id, false)
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("hidden rule", id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{MemoryStore, OccurrenceStore};
    use crate::models::{AlertMetadata, FiredEvent};

    async fn fire(store: &MemoryStore, fp: &str, env: &str, minutes: i64) {
        let metadata = AlertMetadata {
            labels: BTreeMap::from([("env".to_string(), env.to_string())]),
            ..AlertMetadata::default()
        };
        let event = FiredEvent {
            fingerprint: fp.into(),
            alert_name: "HighLatency".into(),
            severity: "warning".into(),
            metadata,
            fired_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
        };
        store.insert_if_absent(&event).await.unwrap();
    }

    fn rule_input(key: &str, value: &str, is_regex: bool, priority: i32) -> HiddenRuleInput {
        HiddenRuleInput {
            id: None,
            name: format!("{key}={value}"),
            label_key: key.into(),
            label_value: value.into(),
            is_regex,
            is_enabled: None,
            priority,
        }
    }

    fn fps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn regex_rule_hides_matching_latest_label() {
        let store = Arc::new(MemoryStore::new());
        fire(&store, "prod", "prod-east", 0).await;
        fire(&store, "staging", "staging-east", 0).await;
        let resolver = HiddenAlertResolver::new(store.clone());

        resolver
            .save_hidden_rule("alice", rule_input("env", "^prod-.*", true, 0))
            .await
            .unwrap();

        let hidden = resolver
            .hidden_fingerprints("alice", &fps(&["prod", "staging"]))
            .await
            .unwrap();
        assert_eq!(hidden, fps(&["prod"]));

        // Rules are scoped to their owner.
        let hidden = resolver
            .hidden_fingerprints("bob", &fps(&["prod", "staging"]))
            .await
            .unwrap();
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn latest_snapshot_decides() {
        let store = Arc::new(MemoryStore::new());
        fire(&store, "moved", "prod-east", 0).await;
        fire(&store, "moved", "staging-east", 60).await;
        let resolver = HiddenAlertResolver::new(store.clone());
        resolver
            .save_hidden_rule("alice", rule_input("env", "prod-east", false, 0))
            .await
            .unwrap();

        let hidden = resolver
            .hidden_fingerprints("alice", &fps(&["moved"]))
            .await
            .unwrap();
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn direct_and_rule_hides_are_unioned() {
        let store = Arc::new(MemoryStore::new());
        fire(&store, "a", "prod-east", 0).await;
        fire(&store, "b", "dev", 0).await;
        fire(&store, "c", "dev", 0).await;
        let resolver = HiddenAlertResolver::new(store.clone());

        resolver.hide_alert("alice", "b", "HighLatency", None).await.unwrap();
        resolver
            .save_hidden_rule("alice", rule_input("env", "prod-east", false, 5))
            .await
            .unwrap();
        // Hidden rules with an unknown label never match.
        resolver
            .save_hidden_rule("alice", rule_input("region", "eu", false, 1))
            .await
            .unwrap();

        let hidden = resolver
            .hidden_fingerprints("alice", &fps(&["a", "b", "c"]))
            .await
            .unwrap();
        assert_eq!(hidden, fps(&["a", "b"]));
    }

    #[tokio::test]
    async fn disabled_rules_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        fire(&store, "a", "prod-east", 0).await;
        let resolver = HiddenAlertResolver::new(store.clone());
        let mut input = rule_input("env", "prod-east", false, 0);
        input.is_enabled = Some(false);
        resolver.save_hidden_rule("alice", input).await.unwrap();

        assert!(resolver
            .hidden_fingerprints("alice", &fps(&["a"]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn hidden_rule_validation() {
        let resolver = HiddenAlertResolver::new(Arc::new(MemoryStore::new()));

        let err = resolver
            .save_hidden_rule("alice", rule_input("a;b", "x", false, 0))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = resolver
            .save_hidden_rule("alice", rule_input("env", "((", true, 0))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn hidden_rule_update_and_delete_are_owner_checked() {
        let resolver = HiddenAlertResolver::new(Arc::new(MemoryStore::new()));
        let rule = resolver
            .save_hidden_rule("alice", rule_input("env", "dev", false, 0))
            .await
            .unwrap();

        let mut update = rule_input("env", "qa", false, 3);
        update.id = Some(rule.id);
        let err = resolver.save_hidden_rule("bob", update.clone()).await.unwrap_err();
        assert!(err.is_not_found());

        let updated = resolver.save_hidden_rule("alice", update).await.unwrap();
        assert_eq!(updated.id, rule.id);
        assert_eq!(updated.created_at, rule.created_at);
        assert_eq!(updated.label_value, "qa");
        assert_eq!(resolver.list_hidden_rules("alice", false).await.unwrap().len(), 1);

        assert!(resolver
            .delete_hidden_rule("bob", rule.id)
            .await
            .unwrap_err()
            .is_not_found());
        resolver.delete_hidden_rule("alice", rule.id).await.unwrap();
        assert!(resolver.list_hidden_rules("alice", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hide_management() {
        let resolver = HiddenAlertResolver::new(Arc::new(MemoryStore::new()));
        resolver.hide_alert("alice", "a", "A", None).await.unwrap();
        resolver
            .hide_alert("alice", "a", "A", Some("noisy".into()))
            .await
            .unwrap();
        resolver.hide_alert("alice", "b", "B", None).await.unwrap();

        let listed = resolver.list_hidden_alerts("alice").await.unwrap();
        assert_eq!(listed.len(), 2);

        resolver.unhide_alert("alice", "missing").await.unwrap();
        resolver.unhide_alert("alice", "b").await.unwrap();
        assert_eq!(resolver.clear_hidden_alerts("alice").await.unwrap(), 1);
        assert!(resolver.list_hidden_alerts("alice").await.unwrap().is_empty());
    }
}
