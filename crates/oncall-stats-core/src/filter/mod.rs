//! Predicate tree over alert occurrences
//!
//! A [`Filter`] is built once and then interpreted two ways: evaluated in
//! memory against an [`AlertOccurrence`], or lowered to SQL by the PostgreSQL
//! store. Both interpretations walk the same tree, so rule semantics stay in
//! one place.

mod condition;

pub use condition::{parse_minutes, Condition, TextMatch, TimeOfDayWindow};

use chrono::{DateTime, Utc};

use crate::models::AlertOccurrence;

/// Boolean combination of conditions
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches everything
    True,
    /// Every child matches (empty matches everything)
    All(Vec<Filter>),
    /// At least one child matches (empty matches nothing)
    Any(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
    /// A single condition
    Leaf(Condition),
}

impl Filter {
    /// Evaluate against one occurrence
    pub fn evaluate(&self, occ: &AlertOccurrence) -> bool {
        match self {
            Self::True => true,
            Self::All(children) => children.iter().all(|c| c.evaluate(occ)),
            Self::Any(children) => children.iter().any(|c| c.evaluate(occ)),
            Self::Not(inner) => !inner.evaluate(occ),
            Self::Leaf(condition) => condition.evaluate(occ),
        }
    }

    /// Conjunction, flattening nested `All` nodes and dropping `True`
    #[must_use]
    pub fn and(self, other: Filter) -> Filter {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Self::True => {}
                Self::All(children) => parts.extend(children),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Self::True,
            1 => parts.pop().unwrap_or(Self::True),
            _ => Self::All(parts),
        }
    }

    /// Negate a filter
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Self::Not(Box::new(self))
    }

    /// Whether this filter trivially matches everything
    pub fn is_true(&self) -> bool {
        match self {
            Self::True => true,
            Self::All(children) => children.iter().all(Filter::is_true),
            _ => false,
        }
    }

    /// `start <= fired_at <= end`
    pub fn fired_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Filter {
        Self::Leaf(Condition::FiredBetween { start, end })
    }

    /// Fingerprint membership
    pub fn fingerprint_in(fingerprints: Vec<String>) -> Filter {
        Self::Leaf(Condition::FingerprintIn(fingerprints))
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::models::{AlertMetadata, FiredEvent};

    pub(crate) fn occurrence(severity: &str, labels: &[(&str, &str)]) -> AlertOccurrence {
        let fired = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut metadata = AlertMetadata::default();
        for (k, v) in labels {
            metadata.labels.insert((*k).to_string(), (*v).to_string());
        }
        AlertOccurrence::from_fired(
            1,
            FiredEvent {
                fingerprint: "fp".into(),
                alert_name: "DiskFull".into(),
                severity: severity.into(),
                metadata,
                fired_at: fired,
            },
            fired,
        )
    }

    fn constant(value: bool) -> Filter {
        if value {
            Filter::True
        } else {
            Filter::Any(Vec::new())
        }
    }

    #[test]
    fn and_flattens_and_drops_true() {
        let f = Filter::True
            .and(Filter::fingerprint_in(vec!["a".into()]))
            .and(Filter::Leaf(Condition::Suppressed).not());
        match f {
            Filter::All(children) => assert_eq!(children.len(), 2),
            other => panic!("expected All, got {other:?}"),
        }
        assert!(Filter::True.and(Filter::True).is_true());
    }

    #[test]
    fn not_over_missing_label_matches() {
        let occ = occurrence("warning", &[]);
        let label = Filter::Leaf(Condition::Label {
            key: "env".into(),
            matcher: TextMatch::Equals("prod".into()),
        });
        assert!(!label.evaluate(&occ));
        assert!(label.not().evaluate(&occ));
    }

    proptest! {
        #[test]
        fn all_is_conjunction(values in proptest::collection::vec(any::<bool>(), 0..8)) {
            let occ = occurrence("critical", &[]);
            let filter = Filter::All(values.iter().map(|v| constant(*v)).collect());
            prop_assert_eq!(filter.evaluate(&occ), values.iter().all(|v| *v));
        }

        #[test]
        fn any_is_disjunction(values in proptest::collection::vec(any::<bool>(), 0..8)) {
            let occ = occurrence("critical", &[]);
            let filter = Filter::Any(values.iter().map(|v| constant(*v)).collect());
            prop_assert_eq!(filter.evaluate(&occ), values.iter().any(|v| *v));
        }
    }
}
