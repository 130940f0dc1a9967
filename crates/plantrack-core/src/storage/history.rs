//! Plan history reads
//!
//! History rows are written only by `PlanStore` when a version is superseded.
//! Reads that combine history with the live row run inside one transaction
//! so they see a single point in time.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::database::Database;
use super::error::StoreError;
use super::plans::{fetch_plan, Plan};
use super::{format_timestamp, json_column, timestamp_column};

const HISTORY_COLUMNS: &str =
    "id, version, data, content_hash, created_at, archived_at, change_summary";

/// One version of a plan, archived or live
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanVersion {
    pub id: String,
    pub version: i64,
    pub data: Value,
    pub content_hash: String,
    /// When this version went live
    pub created_at: DateTime<Utc>,
    /// When this version was superseded; `None` for the live version
    pub archived_at: Option<DateTime<Utc>>,
    pub change_summary: Option<String>,
}

impl PlanVersion {
    pub fn is_current(&self) -> bool {
        self.archived_at.is_none()
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            data: json_column(row, 2)?,
            content_hash: row.get(3)?,
            created_at: timestamp_column(row, 4)?,
            archived_at: Some(timestamp_column(row, 5)?),
            change_summary: row.get(6)?,
        })
    }
}

impl From<Plan> for PlanVersion {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            version: plan.version,
            data: plan.data,
            content_hash: plan.content_hash,
            created_at: plan.updated_at,
            archived_at: None,
            change_summary: None,
        }
    }
}

/// Read access to archived plan versions
pub struct PlanHistory<'a> {
    db: &'a Database,
}

impl<'a> PlanHistory<'a> {
    /// Create a new history reader with database reference
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get an exact version: the archived snapshot, or the live row when
    /// `version` is the current version
    pub fn get_version(&self, id: &str, version: i64) -> Result<Option<PlanVersion>, StoreError> {
        let tx = self.db.conn().unchecked_transaction()?;

        let archived = fetch_archived(&tx, id, version)?;
        let found = match archived {
            Some(entry) => Some(entry),
            None => fetch_plan(&tx, id)?
                .filter(|plan| plan.version == version)
                .map(PlanVersion::from),
        };

        tx.commit()?;
        Ok(found)
    }

    /// All known versions of a plan, ascending, ending with the live row
    ///
    /// Empty when the plan has neither a live row nor history.
    pub fn list_versions(&self, id: &str) -> Result<Vec<PlanVersion>, StoreError> {
        let tx = self.db.conn().unchecked_transaction()?;

        let sql = format!(
            "SELECT {} FROM plan_history WHERE id = ?1 ORDER BY version",
            HISTORY_COLUMNS
        );
        let mut versions = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([id], PlanVersion::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        if let Some(plan) = fetch_plan(&tx, id)? {
            versions.push(PlanVersion::from(plan));
        }

        tx.commit()?;
        Ok(versions)
    }

    /// Number of archived versions for a plan
    pub fn history_count(&self, id: &str) -> Result<usize, StoreError> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM plan_history WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Archived versions across all plans that went live in `[from, to)`
    pub fn archived_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PlanVersion>, StoreError> {
        let sql = format!(
            "SELECT {} FROM plan_history
             WHERE created_at >= ?1 AND created_at < ?2
             ORDER BY created_at, id, version",
            HISTORY_COLUMNS
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let entries = stmt
            .query_map(
                params![format_timestamp(from), format_timestamp(to)],
                PlanVersion::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn fetch_archived(
    conn: &Connection,
    id: &str,
    version: i64,
) -> Result<Option<PlanVersion>, StoreError> {
    let sql = format!(
        "SELECT {} FROM plan_history WHERE id = ?1 AND version = ?2",
        HISTORY_COLUMNS
    );
    let entry = conn
        .query_row(&sql, params![id, version], PlanVersion::from_row)
        .optional()?;
    Ok(entry)
}
