//! Per-user hidden alerts and hiding rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fingerprint hidden by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenAlert {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Hidden fingerprint
    pub fingerprint: String,
    /// Alert name at the time it was hidden
    pub alert_name: String,
    /// Optional free-text reason
    pub reason: Option<String>,
    /// When it was hidden
    pub created_at: DateTime<Utc>,
}

/// Label pattern that hides matching alerts for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenRule {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Display name
    pub name: String,
    /// Label key to inspect
    pub label_key: String,
    /// Exact value, or a regex when `is_regex`
    pub label_value: String,
    /// Whether `label_value` is a regular expression
    pub is_regex: bool,
    /// Disabled rules are ignored
    pub is_enabled: bool,
    /// Evaluation order, highest first
    pub priority: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or updating a hidden rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenRuleInput {
    /// Existing rule to replace, if any
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Display name
    pub name: String,
    /// Label key to inspect
    pub label_key: String,
    /// Exact value or regex
    pub label_value: String,
    /// Whether `label_value` is a regular expression
    #[serde(default)]
    pub is_regex: bool,
    /// Defaults to true
    #[serde(default)]
    pub is_enabled: Option<bool>,
    /// Defaults to 0
    #[serde(default)]
    pub priority: i32,
}
