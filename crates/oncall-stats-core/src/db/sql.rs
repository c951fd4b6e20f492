//! Lowering of [`Filter`] trees to PostgreSQL `WHERE` fragments
//!
//! Every value, label keys included, is bound as a parameter. Label lookups
//! that hit a missing key yield NULL in SQL; each such comparison is wrapped in
//! `COALESCE(.., FALSE)` so that negation agrees with in-memory evaluation.

use sqlx::{Postgres, QueryBuilder};

use crate::filter::{Condition, Filter, TextMatch};
use crate::models::SUPPRESSED_STATE;

const MINUTE_OF_DAY: &str = "(EXTRACT(HOUR FROM fired_at AT TIME ZONE 'UTC') * 60 \
     + EXTRACT(MINUTE FROM fired_at AT TIME ZONE 'UTC'))::int";

/// Column or JSON path a text matcher is applied to
enum Subject<'a> {
    AlertName,
    Label(&'a str),
}

impl Subject<'_> {
    fn push(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::AlertName => {
                qb.push("alert_name");
            }
            Self::Label(key) => {
                qb.push("(metadata->'labels'->>");
                qb.push_bind((*key).to_string());
                qb.push(")");
            }
        }
    }
}

/// Append `filter` as a boolean SQL expression
pub(crate) fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::True => {
            qb.push("TRUE");
        }
        Filter::All(children) => push_joined(qb, children, " AND ", "TRUE"),
        Filter::Any(children) => push_joined(qb, children, " OR ", "FALSE"),
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, inner);
            qb.push(")");
        }
        Filter::Leaf(condition) => push_condition(qb, condition),
    }
}

/// Append ` WHERE <filter>`
pub(crate) fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    qb.push(" WHERE ");
    push_filter(qb, filter);
}

fn push_joined(
    qb: &mut QueryBuilder<'_, Postgres>,
    children: &[Filter],
    separator: &str,
    empty: &str,
) {
    if children.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, child);
    }
    qb.push(")");
}

fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, condition: &Condition) {
    match condition {
        Condition::FiredBetween { start, end } => {
            qb.push("(fired_at BETWEEN ");
            qb.push_bind(*start);
            qb.push(" AND ");
            qb.push_bind(*end);
            qb.push(")");
        }
        Condition::Resolved { start, end } => {
            qb.push("(resolved_at IS NOT NULL");
            if let Some(start) = start {
                qb.push(" AND resolved_at >= ");
                qb.push_bind(*start);
            }
            if let Some(end) = end {
                qb.push(" AND resolved_at <= ");
                qb.push_bind(*end);
            }
            qb.push(")");
        }
        Condition::TimeOfDay(window) => {
            let start = i32::try_from(window.start_minute).unwrap_or(i32::MAX);
            let end = i32::try_from(window.end_minute).unwrap_or(i32::MAX);
            qb.push("(");
            qb.push(MINUTE_OF_DAY);
            if window.spans_midnight() {
                qb.push(" >= ");
                qb.push_bind(start);
                qb.push(" OR ");
                qb.push(MINUTE_OF_DAY);
                qb.push(" <= ");
                qb.push_bind(end);
            } else {
                qb.push(" BETWEEN ");
                qb.push_bind(start);
                qb.push(" AND ");
                qb.push_bind(end);
            }
            qb.push(")");
        }
        Condition::SeverityIn(values) => {
            qb.push("LOWER(severity) = ANY(");
            qb.push_bind(values.clone());
            qb.push(")");
        }
        Condition::Label { key, matcher } => push_text_match(qb, &Subject::Label(key), matcher),
        Condition::AlertName(matcher) => push_text_match(qb, &Subject::AlertName, matcher),
        Condition::Search(term) => {
            let pattern = format!("%{}%", escape_like(term));
            let columns = [
                "alert_name",
                "fingerprint",
                "metadata->>'source'",
                "metadata->>'instance'",
                "metadata->>'summary'",
                "metadata->>'description'",
                "metadata->'annotations'->>'summary'",
                "metadata->'annotations'->>'description'",
            ];
            qb.push("(");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("COALESCE(");
                qb.push(*column);
                qb.push(" ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(", FALSE)");
            }
            qb.push(")");
        }
        Condition::FingerprintIn(fingerprints) => {
            qb.push("fingerprint = ANY(");
            qb.push_bind(fingerprints.clone());
            qb.push(")");
        }
        Condition::Suppressed => {
            qb.push("COALESCE(metadata->'status'->>'state' = ");
            qb.push_bind(SUPPRESSED_STATE);
            qb.push(", FALSE)");
        }
    }
}

fn push_text_match(qb: &mut QueryBuilder<'_, Postgres>, subject: &Subject<'_>, matcher: &TextMatch) {
    qb.push("COALESCE(");
    match matcher {
        TextMatch::Equals(value) => {
            subject.push(qb);
            qb.push(" = ");
            qb.push_bind(value.clone());
        }
        TextMatch::NotEquals(value) => {
            subject.push(qb);
            qb.push(" <> ");
            qb.push_bind(value.clone());
        }
        TextMatch::Contains(value) => {
            qb.push("strpos(");
            subject.push(qb);
            qb.push(", ");
            qb.push_bind(value.clone());
            qb.push(") > 0");
        }
        TextMatch::StartsWith(value) => {
            qb.push("starts_with(");
            subject.push(qb);
            qb.push(", ");
            qb.push_bind(value.clone());
            qb.push(")");
        }
        TextMatch::EndsWith(value) => {
            qb.push("right(");
            subject.push(qb);
            qb.push(", char_length(");
            qb.push_bind(value.clone());
            qb.push(")) = ");
            qb.push_bind(value.clone());
        }
        TextMatch::Regex(re) => {
            subject.push(qb);
            qb.push(" ~ ");
            qb.push_bind(re.as_str().to_string());
        }
    }
    qb.push(", FALSE)");
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern
pub(crate) fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
