//! On-call rule models
//!
//! Rule configurations are kept loosely typed on the wire so that an
//! unsupported combinator or operator is reported by validation with the
//! offending criterion index, rather than surfacing as a parse error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of sample occurrences returned by a rule test
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// A single match condition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCriterion {
    /// `severity`, `label` or `alert_name`
    #[serde(rename = "type")]
    pub kind: String,
    /// Operator, legality depends on `kind`
    pub operator: String,
    /// Label key (label criteria only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Single comparison value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Value list for `in`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Alert-name pattern, preferred over `value`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl RuleCriterion {
    /// Severity criterion
    pub fn severity(operator: &str, values: &[&str]) -> Self {
        let values: Vec<String> = values.iter().map(|v| (*v).to_string()).collect();
        if operator == "in" {
            Self {
                kind: "severity".into(),
                operator: operator.into(),
                values,
                ..Self::default()
            }
        } else {
            Self {
                kind: "severity".into(),
                operator: operator.into(),
                value: values.into_iter().next(),
                ..Self::default()
            }
        }
    }

    /// Label criterion
    pub fn label(key: &str, operator: &str, value: &str) -> Self {
        Self {
            kind: "label".into(),
            operator: operator.into(),
            key: Some(key.into()),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Alert-name criterion
    pub fn alert_name(operator: &str, pattern: &str) -> Self {
        Self {
            kind: "alert_name".into(),
            operator: operator.into(),
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Ordered criteria plus the combinator applied across all of them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Criteria, in order
    #[serde(default)]
    pub criteria: Vec<RuleCriterion>,
    /// `AND` or `OR`
    #[serde(default)]
    pub logic: String,
}

impl RuleConfig {
    /// Build a config from parts
    pub fn new(logic: &str, criteria: Vec<RuleCriterion>) -> Self {
        Self {
            criteria,
            logic: logic.into(),
        }
    }
}

/// A stored rule owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallRule {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Human-readable name
    pub rule_name: String,
    /// Stored configuration; may fail to parse if written by older code
    pub rule_config: serde_json::Value,
    /// Whether the rule participates in filtering
    pub is_active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl OnCallRule {
    /// Parse the stored configuration
    pub fn config(&self) -> serde_json::Result<RuleConfig> {
        serde_json::from_value(self.rule_config.clone())
    }
}

/// Input for creating or updating a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallRuleInput {
    /// Human-readable name
    pub rule_name: String,
    /// Configuration, validated before storing
    pub rule_config: RuleConfig,
    /// Defaults to true
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Result of evaluating a rule against history without saving it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTestResult {
    /// Most recent matches, newest first
    pub samples: Vec<super::AlertOccurrence>,
    /// Total number of matching occurrences
    pub total_count: i64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn criterion_wire_format() {
        let json = serde_json::json!({
            "criteria": [
                {"type": "severity", "operator": "in", "values": ["critical", "warning"]},
                {"type": "label", "operator": "equals", "key": "team", "value": "sre"}
            ],
            "logic": "AND"
        });

        let config: RuleConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            config,
            RuleConfig::new(
                "AND",
                vec![
                    RuleCriterion::severity("in", &["critical", "warning"]),
                    RuleCriterion::label("team", "equals", "sre"),
                ]
            )
        );
    }

    #[test]
    fn unknown_logic_still_deserializes() {
        let config: RuleConfig =
            serde_json::from_str(r#"{"criteria": [], "logic": "XOR"}"#).unwrap();
        assert_eq!(config.logic, "XOR");
    }
}
