//! Alert occurrence models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Team reported for occurrences without a `team` label
pub const UNKNOWN_TEAM: &str = "unknown";

/// Upstream state marking an alert as silenced or inhibited
pub const SUPPRESSED_STATE: &str = "suppressed";

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical
    Critical,
    /// Warning
    #[default]
    Warning,
    /// Informational
    Info,
}

impl Severity {
    /// All severities, most severe first
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    /// Lowercase name as stored
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Upstream status snapshot (silences and inhibitions)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertState {
    /// "active", "suppressed", ...
    pub state: String,
    /// Silence IDs currently matching the alert
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub silenced_by: Vec<String>,
    /// Alerts inhibiting this one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inhibited_by: Vec<String>,
}

/// Structured metadata captured with an occurrence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertMetadata {
    /// Alert labels
    pub labels: BTreeMap<String, String>,
    /// Alert annotations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Originating system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Instance the alert refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Link back to the generating rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    /// Owning team, when known outside of labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Short summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Long description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Upstream status
    pub status: AlertState,
}

impl AlertMetadata {
    /// Look up a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Whether upstream tooling marked the alert as suppressed
    pub fn is_suppressed(&self) -> bool {
        self.status.state == SUPPRESSED_STATE
    }
}

/// One fired-through-resolved instance of an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOccurrence {
    /// Row identifier
    pub id: i64,
    /// Stable alert identity
    pub fingerprint: String,
    /// Alert name
    pub alert_name: String,
    /// Severity as reported by the source
    pub severity: String,
    /// Metadata snapshot
    pub metadata: AlertMetadata,
    /// When the alert fired
    pub fired_at: DateTime<Utc>,
    /// When the alert resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the alert was first acknowledged
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// resolved_at - fired_at
    pub duration_seconds: Option<i64>,
    /// acknowledged_at - fired_at
    pub mttr_seconds: Option<i64>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl AlertOccurrence {
    /// Build a fresh, unresolved occurrence from a fired event
    pub fn from_fired(id: i64, event: FiredEvent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            fingerprint: event.fingerprint,
            alert_name: event.alert_name,
            severity: event.severity,
            metadata: event.metadata,
            fired_at: event.fired_at,
            resolved_at: None,
            acknowledged_at: None,
            duration_seconds: None,
            mttr_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Label lookup on the metadata snapshot
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.label(key)
    }

    /// Team label, or `"unknown"`
    pub fn team(&self) -> &str {
        self.label("team").unwrap_or(UNKNOWN_TEAM)
    }

    /// Minute of the UTC day the alert fired at
    pub fn fired_minute_of_day(&self) -> u32 {
        use chrono::Timelike;
        self.fired_at.hour() * 60 + self.fired_at.minute()
    }

    /// Mark resolved. Returns false if already resolved.
    pub fn resolve(&mut self, at: DateTime<Utc>, metadata: Option<&AlertMetadata>) -> bool {
        if self.resolved_at.is_some() {
            return false;
        }
        self.resolved_at = Some(at);
        self.duration_seconds = Some(elapsed_seconds(self.fired_at, at));
        if let Some(metadata) = metadata {
            self.metadata = metadata.clone();
        }
        self.updated_at = Utc::now();
        true
    }

    /// Mark acknowledged. Returns false if already acknowledged.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        if self.acknowledged_at.is_some() {
            return false;
        }
        self.acknowledged_at = Some(at);
        self.mttr_seconds = Some(elapsed_seconds(self.fired_at, at));
        self.updated_at = Utc::now();
        true
    }
}

/// Whole seconds between two instants, never negative
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// An alert started firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredEvent {
    /// Stable alert identity
    pub fingerprint: String,
    /// Alert name
    pub alert_name: String,
    /// Severity as reported by the source
    pub severity: String,
    /// Metadata at firing time
    #[serde(default)]
    pub metadata: AlertMetadata,
    /// When the alert fired
    pub fired_at: DateTime<Utc>,
}

/// An alert stopped firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    /// Stable alert identity
    pub fingerprint: String,
    /// When the alert resolved
    pub resolved_at: DateTime<Utc>,
    /// Metadata at resolution time; replaces the stored snapshot when present
    #[serde(default)]
    pub metadata: Option<AlertMetadata>,
}

/// Someone responded to an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgedEvent {
    /// Stable alert identity
    pub fingerprint: String,
    /// When the alert was acknowledged
    pub acknowledged_at: DateTime<Utc>,
}

/// Result of a capture operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// A new row was written or an update applied
    Created,
    /// The occurrence already existed
    Duplicate,
    /// An update found the row already in the target state
    AlreadyApplied,
    /// No occurrence exists for the fingerprint
    Skipped,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn occurrence() -> AlertOccurrence {
        let fired = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        AlertOccurrence::from_fired(
            1,
            FiredEvent {
                fingerprint: "abc".into(),
                alert_name: "HighLatency".into(),
                severity: "critical".into(),
                metadata: AlertMetadata::default(),
                fired_at: fired,
            },
            fired,
        )
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("Info".parse::<Severity>(), Ok(Severity::Info));
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn lifecycle_updates_are_idempotent() {
        let mut occ = occurrence();
        let fired = occ.fired_at;

        assert!(occ.acknowledge(fired + chrono::Duration::minutes(5)));
        assert!(!occ.acknowledge(fired + chrono::Duration::minutes(9)));
        assert!(occ.resolve(fired + chrono::Duration::minutes(30), None));
        assert!(!occ.resolve(fired + chrono::Duration::minutes(40), None));

        assert_eq!(occ.mttr_seconds, Some(300));
        assert_eq!(occ.duration_seconds, Some(1800));
    }

    #[test]
    fn resolve_before_fire_clamps_to_zero() {
        let mut occ = occurrence();
        let fired = occ.fired_at;
        occ.resolve(fired - chrono::Duration::seconds(10), None);
        assert_eq!(occ.duration_seconds, Some(0));
    }

    #[test]
    fn team_defaults_to_unknown() {
        let mut occ = occurrence();
        assert_eq!(occ.team(), "unknown");
        occ.metadata.labels.insert("team".into(), "payments".into());
        assert_eq!(occ.team(), "payments");
        assert_eq!(occ.fired_minute_of_day(), 23 * 60 + 30);
    }
}
