//! Plan store: current state of each plan
//!
//! Every content-changing write archives the superseded row into
//! `plan_history` and bumps the version inside one immediate transaction,
//! so concurrent writers serialize on the write lock and the lineage never
//! has gaps or duplicate versions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::database::Database;
use super::error::{is_constraint_violation, validate_id, StoreError};
use super::fingerprint::CanonicalPayload;
use super::{format_timestamp, json_column, now, timestamp_column};

const PLAN_COLUMNS: &str = "id, name, data, version, content_hash, created_at, updated_at";

/// Current state of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub data: Value,
    pub version: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Payload `status` field, when it is a string
    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }

    /// Payload `type` field, when it is a string
    pub fn kind(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            data: json_column(row, 2)?,
            version: row.get(3)?,
            content_hash: row.get(4)?,
            created_at: timestamp_column(row, 5)?,
            updated_at: timestamp_column(row, 6)?,
        })
    }
}

/// Result of an upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No prior row; the plan now exists at version 1
    Created { plan: Plan },
    /// Content changed; `archived_version` went to history
    Updated { plan: Plan, archived_version: i64 },
    /// Fingerprint matched the live row; nothing was written
    Unchanged { plan: Plan },
}

impl UpsertOutcome {
    pub fn plan(&self) -> &Plan {
        match self {
            UpsertOutcome::Created { plan }
            | UpsertOutcome::Updated { plan, .. }
            | UpsertOutcome::Unchanged { plan } => plan,
        }
    }

    pub fn into_plan(self) -> Plan {
        match self {
            UpsertOutcome::Created { plan }
            | UpsertOutcome::Updated { plan, .. }
            | UpsertOutcome::Unchanged { plan } => plan,
        }
    }

    /// Whether a row was written
    pub fn is_write(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged { .. })
    }
}

/// Filters for listing plans
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    /// Match payload `status`
    pub status: Option<String>,
    /// Match payload `type`
    pub kind: Option<String>,
    /// Inclusive lower bound on `updated_at`
    pub updated_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `updated_at`
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Plan store for reads and versioned writes
pub struct PlanStore<'a> {
    db: &'a Database,
}

impl<'a> PlanStore<'a> {
    /// Create a new plan store with database reference
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create or update a plan from raw JSON text
    ///
    /// Malformed payloads are rejected before any transaction is opened.
    /// An unchanged fingerprint is a no-op, including when only `name` differs.
    pub fn upsert_plan(
        &self,
        id: &str,
        name: &str,
        payload: &str,
        change_summary: Option<&str>,
    ) -> Result<UpsertOutcome, StoreError> {
        let payload = CanonicalPayload::parse(payload)?;
        self.write(id, name, &payload, change_summary, None)
    }

    /// Create or update a plan from an already-parsed payload
    pub fn upsert_plan_value(
        &self,
        id: &str,
        name: &str,
        payload: &Value,
        change_summary: Option<&str>,
    ) -> Result<UpsertOutcome, StoreError> {
        let payload = CanonicalPayload::from_value(payload)?;
        self.write(id, name, &payload, change_summary, None)
    }

    /// Conditional upsert: fails with `VersionConflict` unless the live
    /// version equals `expected_version` (0 meaning "plan must not exist")
    pub fn upsert_plan_if_version(
        &self,
        id: &str,
        name: &str,
        payload: &str,
        change_summary: Option<&str>,
        expected_version: i64,
    ) -> Result<UpsertOutcome, StoreError> {
        let payload = CanonicalPayload::parse(payload)?;
        self.write(id, name, &payload, change_summary, Some(expected_version))
    }

    fn write(
        &self,
        id: &str,
        name: &str,
        payload: &CanonicalPayload,
        change_summary: Option<&str>,
        expected_version: Option<i64>,
    ) -> Result<UpsertOutcome, StoreError> {
        validate_id(id)?;

        // IMMEDIATE takes the write lock before reading the live version
        let tx = Transaction::new_unchecked(self.db.conn(), TransactionBehavior::Immediate)?;
        let current = fetch_plan(&tx, id)?;

        if let Some(expected) = expected_version {
            let actual = current.as_ref().map_or(0, |plan| plan.version);
            if actual != expected {
                warn!(plan_id = id, expected, actual, "Rejected write: version conflict");
                return Err(StoreError::VersionConflict {
                    id: id.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let now = now();
        let outcome = match current {
            None => {
                let plan = Plan {
                    id: id.to_string(),
                    name: name.to_string(),
                    data: payload.value().clone(),
                    version: 1,
                    content_hash: payload.hash().to_string(),
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    "INSERT INTO plans (id, name, data, version, content_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        plan.id,
                        plan.name,
                        payload.text(),
                        plan.version,
                        plan.content_hash,
                        format_timestamp(now),
                        format_timestamp(now),
                    ],
                )?;
                debug!(plan_id = id, "Created plan at version 1");
                UpsertOutcome::Created { plan }
            }
            Some(prior) if prior.content_hash == payload.hash() => {
                debug!(plan_id = id, version = prior.version, "Unchanged content, skipping write");
                UpsertOutcome::Unchanged { plan: prior }
            }
            Some(prior) => {
                archive(&tx, &prior, change_summary, now)?;

                let plan = Plan {
                    name: name.to_string(),
                    data: payload.value().clone(),
                    version: prior.version + 1,
                    content_hash: payload.hash().to_string(),
                    updated_at: now,
                    ..prior
                };
                tx.execute(
                    "UPDATE plans
                     SET name = ?1, data = ?2, version = ?3, content_hash = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        plan.name,
                        payload.text(),
                        plan.version,
                        plan.content_hash,
                        format_timestamp(now),
                        plan.id,
                    ],
                )?;
                debug!(plan_id = id, version = plan.version, "Updated plan");
                UpsertOutcome::Updated {
                    archived_version: plan.version - 1,
                    plan,
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Get the current row for a plan
    pub fn get_plan(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        fetch_plan(self.db.conn(), id)
    }

    /// All current plans whose payload fingerprint equals `content_hash`
    pub fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<Plan>, StoreError> {
        let sql = format!(
            "SELECT {} FROM plans WHERE content_hash = ?1 ORDER BY id",
            PLAN_COLUMNS
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let plans = stmt
            .query_map([content_hash], Plan::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// List plans matching the filter, most recently updated first
    pub fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<Plan>, StoreError> {
        let updated_after = filter.updated_after.map(format_timestamp);
        let updated_before = filter.updated_before.map(format_timestamp);
        let limit = filter.limit.map(|l| l as i64);

        let mut clauses: Vec<&'static str> = Vec::new();
        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();

        if let Some(ref status) = filter.status {
            clauses.push("json_extract(data, '$.status') = ?");
            params.push(status);
        }
        if let Some(ref kind) = filter.kind {
            clauses.push("json_extract(data, '$.type') = ?");
            params.push(kind);
        }
        if let Some(ref after) = updated_after {
            clauses.push("updated_at >= ?");
            params.push(after);
        }
        if let Some(ref before) = updated_before {
            clauses.push("updated_at < ?");
            params.push(before);
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit_clause = match limit {
            Some(ref limit) => {
                params.push(limit);
                "LIMIT ?"
            }
            None => "",
        };

        let sql = format!(
            "SELECT {} FROM plans {} ORDER BY updated_at DESC, id {}",
            PLAN_COLUMNS, where_clause, limit_clause
        );

        let mut stmt = self.db.conn().prepare(&sql)?;
        let plans = stmt
            .query_map(params.as_slice(), Plan::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// Number of plans in the store
    pub fn count_plans(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub(crate) fn fetch_plan(conn: &Connection, id: &str) -> Result<Option<Plan>, StoreError> {
    let sql = format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLUMNS);
    let plan = conn.query_row(&sql, [id], Plan::from_row).optional()?;
    Ok(plan)
}

/// Copy the superseded row into history
///
/// The history `created_at` is when this version went live, which is the
/// prior row's `updated_at`.
fn archive(
    conn: &Connection,
    prior: &Plan,
    change_summary: Option<&str>,
    archived_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let data = serde_json::to_string(&prior.data)?;
    let result = conn.execute(
        "INSERT INTO plan_history (id, version, data, content_hash, created_at, archived_at, change_summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            prior.id,
            prior.version,
            data,
            prior.content_hash,
            format_timestamp(prior.updated_at),
            format_timestamp(archived_at),
            change_summary,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => {
            warn!(plan_id = %prior.id, version = prior.version, "Rejected write: history entry exists");
            Err(StoreError::DuplicateHistory {
                id: prior.id.clone(),
                version: prior.version,
            })
        }
        Err(e) => Err(e.into()),
    }
}
