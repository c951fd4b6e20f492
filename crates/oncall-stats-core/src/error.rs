//! Error types for on-call statistics

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for statistics, rule and query operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A rule configuration failed validation
    #[error("Invalid rule: {0}")]
    InvalidRule(#[from] RuleError),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up
        entity: String,
        /// Identifier used for the lookup
        id: String,
    },

    /// A query did not finish within the configured timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error annotated with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        /// Operation being performed
        context: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the underlying error is a `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Whether the underlying error was caused by bad caller input
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_) | Self::InvalidRule(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Attach operation context to a fallible result
pub trait ErrorContext<T> {
    /// Wrap the error, if any, with a description of the failed operation
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}

/// Reasons a rule configuration is rejected
///
/// Criterion-level failures carry the zero-based index of the offending
/// criterion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The rule has no criteria
    #[error("rule must have at least one criterion")]
    EmptyCriteria,

    /// The combinator is not AND or OR
    #[error("logic must be AND or OR, got {0:?}")]
    InvalidLogic(String),

    /// Unsupported criterion type
    #[error("criterion {index}: unknown type {kind:?}")]
    UnknownType {
        /// Criterion index
        index: usize,
        /// The rejected type
        kind: String,
    },

    /// Operator not legal for the criterion type
    #[error("criterion {index}: operator {operator:?} is not valid for {kind} criteria")]
    UnknownOperator {
        /// Criterion index
        index: usize,
        /// Criterion type
        kind: String,
        /// The rejected operator
        operator: String,
    },

    /// A required field is absent or empty
    #[error("criterion {index}: {field} is required")]
    MissingField {
        /// Criterion index
        index: usize,
        /// Name of the missing field
        field: &'static str,
    },

    /// Severity value outside critical/warning/info
    #[error("criterion {index}: invalid severity {value:?}")]
    InvalidSeverity {
        /// Criterion index
        index: usize,
        /// The rejected value
        value: String,
    },

    /// Wrong number of values for the operator
    #[error("criterion {index}: operator {operator:?} requires exactly one value")]
    ValueCount {
        /// Criterion index
        index: usize,
        /// Operator being validated
        operator: String,
    },

    /// Label key contains disallowed characters or is too long
    #[error("criterion {index}: invalid label key {key:?}")]
    InvalidLabelKey {
        /// Criterion index
        index: usize,
        /// The rejected key
        key: String,
    },

    /// Pattern does not compile
    #[error("criterion {index}: invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// Criterion index
        index: usize,
        /// The rejected pattern
        pattern: String,
        /// Compiler message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_and_root_unwraps() {
        let res: std::result::Result<(), Error> = Err(Error::not_found("occurrence", "abc"));
        let err = res.context("resolve occurrence").unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_validation());
        assert_eq!(
            err.to_string(),
            "resolve occurrence: occurrence not found: abc"
        );
    }

    #[test]
    fn rule_error_converts_to_validation_kind() {
        let err: Error = RuleError::EmptyCriteria.into();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Invalid rule: rule must have at least one criterion"
        );
    }
}
