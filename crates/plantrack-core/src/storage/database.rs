//! SQLite database wrapper with versioned migrations

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use crate::constants::storage::BUSY_TIMEOUT;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path and bring the schema up to date
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;

        // Concurrent writers wait for the lock instead of failing immediately
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL keeps readers unblocked while a plan write holds the lock
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get the current schema version from database
    pub(crate) fn get_schema_version(&self) -> i32 {
        if let Err(e) = self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            tracing::warn!("Failed to create schema_version table: {}", e);
            return 0;
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0)
    }

    /// Set schema version after successful migration
    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        Ok(())
    }

    /// Run database migrations incrementally
    pub(crate) fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        info!(
            "Database schema version: {} (target: {})",
            current_version, SCHEMA_VERSION
        );

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        // Migration 1: plans, history and metrics
        if current_version < 1 {
            info!("Running migration 1: Plan store, history and metrics");
            self.conn.execute_batch(
                r#"
                -- Current state, one row per plan
                CREATE TABLE IF NOT EXISTS plans (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    data JSON NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    content_hash TEXT NOT NULL,
                    created_at TIMESTAMP NOT NULL,
                    updated_at TIMESTAMP NOT NULL
                );

                -- Dedup lookups by payload fingerprint
                CREATE INDEX IF NOT EXISTS idx_plans_content_hash
                    ON plans(content_hash);

                CREATE INDEX IF NOT EXISTS idx_plans_updated
                    ON plans(updated_at DESC);

                -- Superseded versions, append-only
                -- created_at: when the version went live, archived_at: when it was replaced
                CREATE TABLE IF NOT EXISTS plan_history (
                    id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    data JSON NOT NULL,
                    content_hash TEXT NOT NULL,
                    created_at TIMESTAMP NOT NULL,
                    archived_at TIMESTAMP NOT NULL,
                    change_summary TEXT,
                    PRIMARY KEY (id, version)
                );

                CREATE INDEX IF NOT EXISTS idx_plan_history_created
                    ON plan_history(created_at);

                -- Time series per (plan, version, metric); duplicates are rejected
                CREATE TABLE IF NOT EXISTS plan_metrics (
                    plan_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    metric_name TEXT NOT NULL,
                    step INTEGER NOT NULL,
                    value REAL NOT NULL,
                    timestamp TIMESTAMP NOT NULL,
                    PRIMARY KEY (plan_id, version, metric_name, step)
                );

                CREATE INDEX IF NOT EXISTS idx_plan_metrics_timestamp
                    ON plan_metrics(timestamp);
                "#,
            )?;
            self.set_schema_version(1)?;
        }

        // Migration 2: Expression indexes over payload fields
        if current_version < 2 {
            info!("Running migration 2: Payload status/type indexes");
            self.conn.execute_batch(
                r#"
                CREATE INDEX IF NOT EXISTS idx_plans_status
                    ON plans(json_extract(data, '$.status'));

                CREATE INDEX IF NOT EXISTS idx_plans_type
                    ON plans(json_extract(data, '$.type'));
                "#,
            )?;
            self.set_schema_version(2)?;
        }

        info!("Migrations complete");
        Ok(())
    }
}
