//! Retention for history and metrics
//!
//! Nothing is pruned unless a policy field is set. Pruning history removes
//! archived versions, so `version == 1 + history_count` no longer holds for
//! plans it touches.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::database::Database;
use super::error::StoreError;
use super::{format_timestamp, is_storable_timestamp};

/// Which history and metric rows may be deleted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Keep only the newest N archived versions per plan
    pub keep_history_versions: Option<u32>,
    /// Drop history entries archived more than this many days ago
    pub history_max_age_days: Option<u32>,
    /// Drop metric samples older than this many days
    pub metrics_max_age_days: Option<u32>,
}

impl RetentionPolicy {
    /// Whether any rule is configured
    pub fn is_enabled(&self) -> bool {
        self.keep_history_versions.is_some()
            || self.history_max_age_days.is_some()
            || self.metrics_max_age_days.is_some()
    }
}

/// Rows removed (or that would be removed) by a prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub history_removed: usize,
    pub metrics_removed: usize,
}

/// Applies a retention policy to the database
pub struct Pruner<'a> {
    db: &'a Database,
    policy: RetentionPolicy,
}

/// A WHERE predicate with its positional parameters
struct Predicate {
    sql: String,
    params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl Predicate {
    fn count(&self, conn: &Connection, table: &str) -> rusqlite::Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, self.sql);
        let count: i64 = conn.query_row(
            &sql,
            rusqlite::params_from_iter(self.params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete(&self, conn: &Connection, table: &str) -> rusqlite::Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {}", table, self.sql);
        conn.execute(&sql, rusqlite::params_from_iter(self.params.iter()))
    }
}

impl<'a> Pruner<'a> {
    pub fn new(db: &'a Database, policy: RetentionPolicy) -> Self {
        Self { db, policy }
    }

    /// Count what `prune` would delete, without deleting
    pub fn preview(&self, now: DateTime<Utc>) -> Result<PruneReport, StoreError> {
        let conn = self.db.conn();
        let mut report = PruneReport::default();

        if let Some(predicate) = self.history_predicate(now) {
            report.history_removed = predicate.count(conn, "plan_history")?;
        }
        if let Some(predicate) = self.metrics_predicate(now) {
            report.metrics_removed = predicate.count(conn, "plan_metrics")?;
        }
        Ok(report)
    }

    /// Delete history and metric rows outside the policy in one transaction
    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport, StoreError> {
        if !self.policy.is_enabled() {
            return Ok(PruneReport::default());
        }

        let tx = Transaction::new_unchecked(self.db.conn(), TransactionBehavior::Immediate)?;
        let mut report = PruneReport::default();

        if let Some(predicate) = self.history_predicate(now) {
            report.history_removed = predicate.delete(&tx, "plan_history")?;
        }
        if let Some(predicate) = self.metrics_predicate(now) {
            report.metrics_removed = predicate.delete(&tx, "plan_metrics")?;
        }
        tx.commit()?;

        info!(
            history_removed = report.history_removed,
            metrics_removed = report.metrics_removed,
            "Pruned plan store"
        );
        Ok(report)
    }

    fn history_predicate(&self, now: DateTime<Utc>) -> Option<Predicate> {
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(keep) = self.policy.keep_history_versions {
            clauses.push(
                "(id, version) IN (
                    SELECT id, version FROM (
                        SELECT id, version,
                               ROW_NUMBER() OVER (PARTITION BY id ORDER BY version DESC) AS rn
                        FROM plan_history
                    ) WHERE rn > ?
                )",
            );
            params.push(Box::new(i64::from(keep)));
        }
        // A cutoff before the earliest representable time matches nothing
        if let Some(before) = self.policy.history_max_age_days.and_then(|days| cutoff(now, days)) {
            clauses.push("archived_at < ?");
            params.push(Box::new(before));
        }

        if clauses.is_empty() {
            return None;
        }
        Some(Predicate {
            sql: clauses.join(" OR "),
            params,
        })
    }

    fn metrics_predicate(&self, now: DateTime<Utc>) -> Option<Predicate> {
        let before = cutoff(now, self.policy.metrics_max_age_days?)?;
        Some(Predicate {
            sql: "timestamp < ?".to_string(),
            params: vec![Box::new(before)],
        })
    }
}

fn cutoff(now: DateTime<Utc>, days: u32) -> Option<String> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .filter(|ts| is_storable_timestamp(*ts))
        .map(format_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::history::PlanHistory;
    use crate::storage::metrics::MetricsRecorder;
    use crate::storage::plans::PlanStore;
    use crate::storage::test_support::create_test_db;

    fn seed(db: &Database) {
        let store = PlanStore::new(db);
        for i in 0..5 {
            store
                .upsert_plan("a", "a", &format!(r#"{{"step":{}}}"#, i), None)
                .expect("Failed to upsert");
        }
        for i in 0..2 {
            store
                .upsert_plan("b", "b", &format!(r#"{{"step":{}}}"#, i), None)
                .expect("Failed to upsert");
        }
    }

    #[test]
    fn test_default_policy_prunes_nothing() {
        let (db, _temp) = create_test_db();
        seed(&db);

        let pruner = Pruner::new(&db, RetentionPolicy::default());
        assert!(!RetentionPolicy::default().is_enabled());
        assert_eq!(
            pruner.prune(crate::storage::now()).expect("Prune failed"),
            PruneReport::default()
        );
        assert_eq!(PlanHistory::new(&db).history_count("a").expect("Count failed"), 4);
    }

    #[test]
    fn test_keep_newest_history_versions() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let now = crate::storage::now();

        let pruner = Pruner::new(
            &db,
            RetentionPolicy {
                keep_history_versions: Some(2),
                ..Default::default()
            },
        );
        let preview = pruner.preview(now).expect("Preview failed");
        assert_eq!(preview.history_removed, 2);

        let report = pruner.prune(now).expect("Prune failed");
        assert_eq!(report, preview);

        let versions: Vec<i64> = PlanHistory::new(&db)
            .list_versions("a")
            .expect("List failed")
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(PlanHistory::new(&db).history_count("b").expect("Count failed"), 1);
    }

    #[test]
    fn test_age_based_pruning() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let now = crate::storage::now();

        db.conn()
            .execute(
                "UPDATE plan_history SET archived_at = '2020-01-01T00:00:00.000000Z' WHERE id = 'b'",
                [],
            )
            .expect("Failed to backdate history");

        let metrics = MetricsRecorder::new(&db);
        metrics
            .record_metric("a", 1, "loss", 0, 1.0, now - Duration::days(40))
            .expect("Insert failed");
        metrics
            .record_metric("a", 1, "loss", 1, 0.5, now - Duration::days(1))
            .expect("Insert failed");

        let report = Pruner::new(
            &db,
            RetentionPolicy {
                history_max_age_days: Some(30),
                metrics_max_age_days: Some(30),
                ..Default::default()
            },
        )
        .prune(now)
        .expect("Prune failed");

        assert_eq!(
            report,
            PruneReport {
                history_removed: 1,
                metrics_removed: 1
            }
        );
        assert_eq!(PlanHistory::new(&db).history_count("a").expect("Count failed"), 4);
        let remaining = metrics.query_metric("a", 1, "loss").expect("Query failed");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].step, 1);
    }

    #[test]
    fn test_huge_max_age_prunes_nothing() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let now = crate::storage::now();
        MetricsRecorder::new(&db)
            .record_metric("a", 1, "loss", 0, 1.0, now - Duration::days(400))
            .expect("Insert failed");

        let policy: RetentionPolicy = toml::from_str(
            "history_max_age_days = 100000000\nmetrics_max_age_days = 4294967295",
        )
        .expect("Failed to parse policy");
        let pruner = Pruner::new(&db, policy);

        assert_eq!(pruner.preview(now).expect("Preview failed"), PruneReport::default());
        assert_eq!(pruner.prune(now).expect("Prune failed"), PruneReport::default());
        assert_eq!(PlanHistory::new(&db).history_count("a").expect("Count failed"), 4);
    }

    #[test]
    fn test_age_and_count_rules_combine() {
        let (db, _temp) = create_test_db();
        seed(&db);

        let report = Pruner::new(
            &db,
            RetentionPolicy {
                keep_history_versions: Some(1),
                history_max_age_days: Some(u32::MAX),
                ..Default::default()
            },
        )
        .prune(crate::storage::now())
        .expect("Prune failed");

        assert_eq!(report.history_removed, 3);
        assert_eq!(PlanHistory::new(&db).history_count("a").expect("Count failed"), 1);
    }
}
