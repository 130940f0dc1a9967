//! Persistence layer
//!
//! SQLite-based storage for:
//! - Current plan state with content-hash dedup
//! - Append-only plan history (one row per superseded version)
//! - Time-series metrics keyed by plan, version, metric and step
//! - Opt-in retention of history and metrics

use chrono::{DateTime, Datelike, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;

mod database;
mod error;
mod fingerprint;
mod history;
mod metrics;
mod plans;
mod retention;


pub use database::Database;
pub use error::StoreError;
pub use fingerprint::{content_hash, CanonicalPayload};
pub use history::{PlanHistory, PlanVersion};
pub use metrics::{MetricSample, MetricsRecorder};
pub use plans::{Plan, PlanFilter, PlanStore, UpsertOutcome};
pub use retention::{PruneReport, Pruner, RetentionPolicy};

/// Current time truncated to the precision timestamps are stored with
#[inline]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp for storage
///
/// Fixed-width RFC 3339 in UTC, so lexical order in SQLite matches time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether a timestamp fits the four-digit-year storage format
pub(crate) fn is_storable_timestamp(ts: DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Read a stored timestamp column
pub(crate) fn timestamp_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a stored JSON payload column
pub(crate) fn json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::Database;

    /// Helper to create a temporary database for testing
    pub fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }
}
