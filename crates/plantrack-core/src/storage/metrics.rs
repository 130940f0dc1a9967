//! Metric time series for plan executions
//!
//! Samples are append-only. Writing a (plan, version, metric, step) that
//! already exists is rejected rather than overwritten.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::database::Database;
use super::error::{is_constraint_violation, validate_id, StoreError};
use super::{format_timestamp, is_storable_timestamp, timestamp_column};

/// One timestamped observation in a metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub plan_id: String,
    pub version: i64,
    pub metric_name: String,
    pub step: i64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            plan_id: row.get(0)?,
            version: row.get(1)?,
            metric_name: row.get(2)?,
            step: row.get(3)?,
            value: row.get(4)?,
            timestamp: timestamp_column(row, 5)?,
        })
    }

    fn validate(&self) -> Result<(), StoreError> {
        validate_id(&self.plan_id)?;
        if self.metric_name.trim().is_empty() {
            return Err(StoreError::InvalidMetric("metric name is empty".to_string()));
        }
        if !self.value.is_finite() {
            return Err(StoreError::InvalidMetric(format!(
                "{} step {} has non-finite value {}",
                self.metric_name, self.step, self.value
            )));
        }
        if !is_storable_timestamp(self.timestamp) {
            return Err(StoreError::InvalidMetric(format!(
                "{} step {} has timestamp {} outside years 0000-9999",
                self.metric_name, self.step, self.timestamp
            )));
        }
        Ok(())
    }
}

/// Append-only recorder and reader for metric samples
pub struct MetricsRecorder<'a> {
    db: &'a Database,
}

impl<'a> MetricsRecorder<'a> {
    /// Create a new metrics recorder with database reference
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record one sample
    pub fn record_metric(
        &self,
        plan_id: &str,
        version: i64,
        metric_name: &str,
        step: i64,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sample = MetricSample {
            plan_id: plan_id.to_string(),
            version,
            metric_name: metric_name.to_string(),
            step,
            value,
            timestamp,
        };
        sample.validate()?;
        insert_sample(self.db.conn(), &sample)
    }

    /// Record a batch of samples; either all are stored or none are
    pub fn record_metrics(&self, samples: &[MetricSample]) -> Result<(), StoreError> {
        for sample in samples {
            sample.validate()?;
        }

        let tx = Transaction::new_unchecked(self.db.conn(), TransactionBehavior::Immediate)?;
        for sample in samples {
            insert_sample(&tx, sample)?;
        }
        tx.commit()?;

        debug!(count = samples.len(), "Recorded metric batch");
        Ok(())
    }

    /// One series ordered by step
    pub fn query_metric(
        &self,
        plan_id: &str,
        version: i64,
        metric_name: &str,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT plan_id, version, metric_name, step, value, timestamp
             FROM plan_metrics
             WHERE plan_id = ?1 AND version = ?2 AND metric_name = ?3
             ORDER BY step",
        )?;
        let samples = stmt
            .query_map(params![plan_id, version, metric_name], MetricSample::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// All samples for a plan with timestamp in `[from, to)`, any version or metric
    pub fn query_metric_range(
        &self,
        plan_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT plan_id, version, metric_name, step, value, timestamp
             FROM plan_metrics
             WHERE plan_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp, metric_name, step",
        )?;
        let samples = stmt
            .query_map(
                params![plan_id, format_timestamp(from), format_timestamp(to)],
                MetricSample::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Distinct metric names recorded for a plan version
    pub fn metric_names(&self, plan_id: &str, version: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT DISTINCT metric_name FROM plan_metrics
             WHERE plan_id = ?1 AND version = ?2
             ORDER BY metric_name",
        )?;
        let names = stmt
            .query_map(params![plan_id, version], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn insert_sample(conn: &Connection, sample: &MetricSample) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO plan_metrics (plan_id, version, metric_name, step, value, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sample.plan_id,
            sample.version,
            sample.metric_name,
            sample.step,
            sample.value,
            format_timestamp(sample.timestamp),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => {
            warn!(
                plan_id = %sample.plan_id,
                version = sample.version,
                metric = %sample.metric_name,
                step = sample.step,
                "Rejected write: metric sample exists"
            );
            Err(StoreError::DuplicateMetric {
                plan_id: sample.plan_id.clone(),
                version: sample.version,
                metric_name: sample.metric_name.clone(),
                step: sample.step,
            })
        }
        Err(e) => Err(e.into()),
    }
}
