//! Storage error types

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by plan, history and metric operations
///
/// Lookups that find nothing return `Ok(None)` rather than an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Plan id is empty or whitespace
    #[error("invalid plan id: {0:?}")]
    InvalidId(String),

    /// Payload text is not well-formed JSON
    #[error("malformed payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// Payload parsed but is not a JSON object
    #[error("payload must be a JSON object, got {0}")]
    PayloadNotObject(&'static str),

    /// Metric sample failed validation
    #[error("invalid metric sample: {0}")]
    InvalidMetric(String),

    /// A sample with the same (plan, version, metric, step) already exists
    #[error(
        "metric sample already recorded: plan={plan_id} version={version} metric={metric_name} step={step}"
    )]
    DuplicateMetric {
        plan_id: String,
        version: i64,
        metric_name: String,
        step: i64,
    },

    /// A history row for this (plan, version) already exists
    #[error("history entry already exists: plan={id} version={version}")]
    DuplicateHistory { id: String, version: i64 },

    /// Conditional write found a different live version
    #[error("version conflict on plan {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: i64,
        actual: i64,
    },

    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the write was refused by validation or a constraint, as opposed
    /// to failing for an operational reason
    pub fn is_rejected_write(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidId(_)
                | StoreError::InvalidPayload(_)
                | StoreError::PayloadNotObject(_)
                | StoreError::InvalidMetric(_)
                | StoreError::DuplicateMetric { .. }
                | StoreError::DuplicateHistory { .. }
                | StoreError::VersionConflict { .. }
        )
    }
}

/// Check for a uniqueness / primary key violation
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Reject empty plan ids before touching the database
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}
