//! Rule validation and compilation
//!
//! Validation and compilation are one pass: a config that validates is
//! turned into a [`CompiledRule`] whose criteria are ready-to-evaluate
//! [`Filter`] nodes.

use regex::Regex;

use crate::error::RuleError;
use crate::filter::{Condition, Filter, TextMatch};
use crate::models::{RuleConfig, RuleCriterion, Severity};

/// Maximum label key length
pub const MAX_LABEL_KEY_LEN: usize = 100;

/// How criteria of one rule are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    /// Every criterion must match
    And,
    /// At least one criterion must match
    Or,
}

impl Logic {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

/// A validated rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Combinator
    pub logic: Logic,
    /// One filter per criterion, in order
    pub criteria: Vec<Filter>,
}

impl CompiledRule {
    /// The rule as a single filter group
    pub fn to_filter(&self) -> Filter {
        match self.logic {
            Logic::And => Filter::All(self.criteria.clone()),
            Logic::Or => Filter::Any(self.criteria.clone()),
        }
    }

    /// Consume into a single filter group
    pub fn into_filter(self) -> Filter {
        match self.logic {
            Logic::And => Filter::All(self.criteria),
            Logic::Or => Filter::Any(self.criteria),
        }
    }
}

/// Validate a rule configuration and compile it
pub fn compile(config: &RuleConfig) -> Result<CompiledRule, RuleError> {
    let logic =
        Logic::parse(&config.logic).ok_or_else(|| RuleError::InvalidLogic(config.logic.clone()))?;

    if config.criteria.is_empty() {
        return Err(RuleError::EmptyCriteria);
    }

    let criteria = config
        .criteria
        .iter()
        .enumerate()
        .map(|(index, criterion)| compile_criterion(index, criterion))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledRule { logic, criteria })
}

/// Whether a label key is safe to use as a structured-path component
pub fn is_valid_label_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_LABEL_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn compile_criterion(index: usize, criterion: &RuleCriterion) -> Result<Filter, RuleError> {
    match criterion.kind.as_str() {
        "severity" => compile_severity(index, criterion),
        "label" => compile_label(index, criterion),
        "alert_name" => compile_alert_name(index, criterion),
        other => Err(RuleError::UnknownType {
            index,
            kind: other.to_string(),
        }),
    }
}

fn unknown_operator(index: usize, criterion: &RuleCriterion) -> RuleError {
    RuleError::UnknownOperator {
        index,
        kind: criterion.kind.clone(),
        operator: criterion.operator.clone(),
    }
}

fn severity_value(index: usize, value: &str) -> Result<String, RuleError> {
    value
        .parse::<Severity>()
        .map(|s| s.as_str().to_string())
        .map_err(|_| RuleError::InvalidSeverity {
            index,
            value: value.to_string(),
        })
}

fn compile_severity(index: usize, criterion: &RuleCriterion) -> Result<Filter, RuleError> {
    match criterion.operator.as_str() {
        "in" => {
            if criterion.values.is_empty() {
                return Err(RuleError::MissingField {
                    index,
                    field: "values",
                });
            }
            let values = criterion
                .values
                .iter()
                .map(|v| severity_value(index, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::SeverityIn(values).into())
        }
        op @ ("equals" | "not_equals") => {
            let raw = match (&criterion.value, criterion.values.as_slice()) {
                (Some(v), []) if !v.is_empty() => v.as_str(),
                (None, [v]) => v.as_str(),
                (None, []) | (Some(_), []) => {
                    return Err(RuleError::MissingField {
                        index,
                        field: "value",
                    })
                }
                _ => {
                    return Err(RuleError::ValueCount {
                        index,
                        operator: op.to_string(),
                    })
                }
            };
            let filter: Filter = Condition::SeverityIn(vec![severity_value(index, raw)?]).into();
            Ok(if op == "equals" { filter } else { filter.not() })
        }
        _ => Err(unknown_operator(index, criterion)),
    }
}

fn compile_label(index: usize, criterion: &RuleCriterion) -> Result<Filter, RuleError> {
    if !matches!(
        criterion.operator.as_str(),
        "equals" | "not_equals" | "contains" | "regex"
    ) {
        return Err(unknown_operator(index, criterion));
    }

    let key = match criterion.key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => return Err(RuleError::MissingField { index, field: "key" }),
    };
    if !is_valid_label_key(key) {
        return Err(RuleError::InvalidLabelKey {
            index,
            key: key.to_string(),
        });
    }

    let value = match criterion.value.as_deref() {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Err(RuleError::MissingField {
                index,
                field: "value",
            })
        }
    };

    Ok(Condition::Label {
        key: key.to_string(),
        matcher: text_match(index, &criterion.operator, value)?,
    }
    .into())
}

fn compile_alert_name(index: usize, criterion: &RuleCriterion) -> Result<Filter, RuleError> {
    if !matches!(
        criterion.operator.as_str(),
        "equals" | "contains" | "regex" | "starts_with" | "ends_with"
    ) {
        return Err(unknown_operator(index, criterion));
    }

    let pattern = criterion
        .pattern
        .as_deref()
        .filter(|p| !p.is_empty())
        .or_else(|| criterion.value.as_deref().filter(|v| !v.is_empty()))
        .ok_or(RuleError::MissingField {
            index,
            field: "pattern",
        })?;

    Ok(Condition::AlertName(text_match(index, &criterion.operator, pattern)?).into())
}

fn text_match(index: usize, operator: &str, value: &str) -> Result<TextMatch, RuleError> {
    Ok(match operator {
        "not_equals" => TextMatch::NotEquals(value.to_string()),
        "contains" => TextMatch::Contains(value.to_string()),
        "starts_with" => TextMatch::StartsWith(value.to_string()),
        "ends_with" => TextMatch::EndsWith(value.to_string()),
        "regex" => TextMatch::Regex(Regex::new(value).map_err(|e| RuleError::InvalidRegex {
            index,
            pattern: value.to_string(),
            message: e.to_string(),
        })?),
        _ => TextMatch::Equals(value.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::filter::tests::occurrence;

    #[rstest]
    #[case::empty(RuleConfig::new("AND", vec![]), RuleError::EmptyCriteria)]
    #[case::xor(
        RuleConfig::new("XOR", vec![RuleCriterion::severity("equals", &["critical"])]),
        RuleError::InvalidLogic("XOR".into())
    )]
    #[case::fatal(
        RuleConfig::new("AND", vec![RuleCriterion::severity("equals", &["fatal"])]),
        RuleError::InvalidSeverity { index: 0, value: "fatal".into() }
    )]
    #[case::bad_key(
        RuleConfig::new(
            "OR",
            vec![
                RuleCriterion::severity("in", &["info"]),
                RuleCriterion::label("a;b", "equals", "x"),
            ]
        ),
        RuleError::InvalidLabelKey { index: 1, key: "a;b".into() }
    )]
    #[case::bad_regex(
        RuleConfig::new("AND", vec![RuleCriterion::alert_name("regex", "((")]),
        RuleError::InvalidRegex {
            index: 0,
            pattern: "((".into(),
            message: Regex::new("((").unwrap_err().to_string(),
        }
    )]
    #[case::unknown_type(
        RuleConfig::new("AND", vec![RuleCriterion { kind: "team".into(), ..RuleCriterion::default() }]),
        RuleError::UnknownType { index: 0, kind: "team".into() }
    )]
    #[case::label_operator(
        RuleConfig::new("AND", vec![RuleCriterion::label("env", "starts_with", "prod")]),
        RuleError::UnknownOperator { index: 0, kind: "label".into(), operator: "starts_with".into() }
    )]
    #[case::severity_in_empty(
        RuleConfig::new("AND", vec![RuleCriterion::severity("in", &[])]),
        RuleError::MissingField { index: 0, field: "values" }
    )]
    #[case::label_value_missing(
        RuleConfig::new("AND", vec![RuleCriterion::label("env", "equals", "")]),
        RuleError::MissingField { index: 0, field: "value" }
    )]
    #[case::alert_name_missing(
        RuleConfig::new("AND", vec![RuleCriterion::alert_name("contains", "")]),
        RuleError::MissingField { index: 0, field: "pattern" }
    )]
    fn rejects_invalid_configs(#[case] config: RuleConfig, #[case] expected: RuleError) {
        assert_eq!(compile(&config).unwrap_err(), expected);
    }

    #[test]
    fn label_key_charset() {
        assert!(is_valid_label_key("app.kubernetes.io-name_1"));
        assert!(!is_valid_label_key("a b"));
        assert!(!is_valid_label_key("labels'->>'x"));
        assert!(!is_valid_label_key(&"k".repeat(101)));
        assert!(is_valid_label_key(&"k".repeat(100)));
    }

    #[test]
    fn severity_compare_is_case_insensitive() {
        let rule = compile(&RuleConfig::new(
            "AND",
            vec![RuleCriterion::severity("in", &["Critical", "WARNING"])],
        ))
        .unwrap();
        let filter = rule.to_filter();
        assert!(filter.evaluate(&occurrence("CRITICAL", &[])));
        assert!(filter.evaluate(&occurrence("warning", &[])));
        assert!(!filter.evaluate(&occurrence("info", &[])));
    }

    #[test]
    fn not_equals_severity() {
        let filter = compile(&RuleConfig::new(
            "AND",
            vec![RuleCriterion::severity("not_equals", &["info"])],
        ))
        .unwrap()
        .into_filter();
        assert!(filter.evaluate(&occurrence("critical", &[])));
        assert!(!filter.evaluate(&occurrence("Info", &[])));
    }

    #[test]
    fn alert_name_pattern_precedes_value() {
        let criterion = RuleCriterion {
            value: Some("Memory".into()),
            ..RuleCriterion::alert_name("starts_with", "Disk")
        };
        let filter = compile(&RuleConfig::new("AND", vec![criterion]))
            .unwrap()
            .into_filter();
        assert!(filter.evaluate(&occurrence("info", &[])));
    }

    #[rstest]
    #[case("equals", "DiskFull", true)]
    #[case("contains", "skF", true)]
    #[case("starts_with", "Disk", true)]
    #[case("ends_with", "Full", true)]
    #[case("ends_with", "Disk", false)]
    #[case("regex", "^Disk(Full|Low)$", true)]
    #[case("regex", "Memory", false)]
    fn alert_name_operators(#[case] op: &str, #[case] pattern: &str, #[case] expected: bool) {
        let filter = compile(&RuleConfig::new(
            "AND",
            vec![RuleCriterion::alert_name(op, pattern)],
        ))
        .unwrap()
        .into_filter();
        assert_eq!(filter.evaluate(&occurrence("info", &[])), expected);
    }

    #[rstest]
    #[case("equals", "prod-east", true)]
    #[case("not_equals", "prod-east", false)]
    #[case("contains", "east", true)]
    #[case("regex", "^prod-", true)]
    #[case("regex", "^staging-", false)]
    fn label_operators(#[case] op: &str, #[case] value: &str, #[case] expected: bool) {
        let filter = compile(&RuleConfig::new(
            "AND",
            vec![RuleCriterion::label("env", op, value)],
        ))
        .unwrap()
        .into_filter();
        let occ = occurrence("info", &[("env", "prod-east")]);
        assert_eq!(filter.evaluate(&occ), expected);
    }
}
