//! Subcommand handlers
//!
//! Each handler returns the JSON value printed by `main`.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;

use plantrack_core::storage::Pruner;
use plantrack_core::{
    Config, Database, MetricsRecorder, PlanFilter, PlanHistory, PlanStore, StoreError,
};

use crate::{Commands, MetricCommands};

pub(crate) fn run(db: &Database, config: &Config, command: Commands) -> Result<Value> {
    match command {
        Commands::Put {
            id,
            name,
            data,
            file,
            summary,
            expect_version,
        } => {
            let payload = read_payload(data, file)?;
            put(db, &id, name, &payload, summary.as_deref(), expect_version)
        }
        Commands::Get { id, version } => get(db, &id, version),
        Commands::Versions { id } => {
            let versions = PlanHistory::new(db).list_versions(&id)?;
            if versions.is_empty() {
                bail!("plan not found: {}", id);
            }
            Ok(serde_json::to_value(versions)?)
        }
        Commands::List {
            status,
            kind,
            updated_after,
            updated_before,
            limit,
        } => {
            let filter = PlanFilter {
                status,
                kind,
                updated_after,
                updated_before,
                limit,
            };
            Ok(serde_json::to_value(PlanStore::new(db).list_plans(&filter)?)?)
        }
        Commands::FindHash { hash } => Ok(serde_json::to_value(
            PlanStore::new(db).find_by_content_hash(&hash)?,
        )?),
        Commands::Metric { action } => metric(db, action),
        Commands::Prune { dry_run } => prune(db, config, dry_run),
    }
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(data) = data {
        return Ok(data);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("reading payload from {}", path.display()));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading payload from stdin")?;
    Ok(buf)
}

fn put(
    db: &Database,
    id: &str,
    name: Option<String>,
    payload: &str,
    summary: Option<&str>,
    expect_version: Option<i64>,
) -> Result<Value> {
    let store = PlanStore::new(db);
    let name = match name {
        Some(name) => name,
        None => store
            .get_plan(id)?
            .map(|plan| plan.name)
            .unwrap_or_else(|| id.to_string()),
    };

    let outcome = match expect_version {
        Some(expected) => store.upsert_plan_if_version(id, &name, payload, summary, expected),
        None => store.upsert_plan(id, &name, payload, summary),
    };
    match outcome {
        Ok(outcome) => Ok(serde_json::to_value(outcome)?),
        Err(e) if e.is_rejected_write() => Err(anyhow::Error::new(e).context("write rejected")),
        Err(e) => Err(e.into()),
    }
}

fn get(db: &Database, id: &str, version: Option<i64>) -> Result<Value> {
    match version {
        Some(version) => match PlanHistory::new(db).get_version(id, version)? {
            Some(found) => Ok(serde_json::to_value(found)?),
            None => bail!("plan {} has no version {}", id, version),
        },
        None => match PlanStore::new(db).get_plan(id)? {
            Some(plan) => Ok(serde_json::to_value(plan)?),
            None => bail!("plan not found: {}", id),
        },
    }
}

fn metric(db: &Database, action: MetricCommands) -> Result<Value> {
    let recorder = MetricsRecorder::new(db);
    match action {
        MetricCommands::Record {
            plan_id,
            version,
            name,
            step,
            value,
            at,
        } => {
            let timestamp = at.unwrap_or_else(plantrack_core::storage::now);
            match recorder.record_metric(&plan_id, version, &name, step, value, timestamp) {
                Ok(()) => Ok(json!({
                    "recorded": {
                        "plan_id": plan_id,
                        "version": version,
                        "metric_name": name,
                        "step": step,
                        "value": value,
                        "timestamp": timestamp,
                    }
                })),
                Err(e @ StoreError::DuplicateMetric { .. }) => {
                    Err(anyhow::Error::new(e).context("choose a fresh step"))
                }
                Err(e) => Err(e.into()),
            }
        }
        MetricCommands::Query {
            plan_id,
            version,
            name,
        } => Ok(serde_json::to_value(
            recorder.query_metric(&plan_id, version, &name)?,
        )?),
        MetricCommands::Range { plan_id, from, to } => Ok(serde_json::to_value(
            recorder.query_metric_range(&plan_id, from, to)?,
        )?),
    }
}

fn prune(db: &Database, config: &Config, dry_run: bool) -> Result<Value> {
    let policy = config.retention.clone();
    if !policy.is_enabled() {
        tracing::warn!("No retention policy configured; nothing to prune");
    }

    let pruner = Pruner::new(db, policy.clone());
    let now = plantrack_core::storage::now();
    let report = if dry_run {
        pruner.preview(now)?
    } else {
        pruner.prune(now)?
    };

    Ok(json!({
        "dry_run": dry_run,
        "policy": policy,
        "report": report,
    }))
}
