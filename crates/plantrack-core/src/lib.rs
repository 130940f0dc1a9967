//! plantrack core - versioned plan storage
//!
//! This crate provides:
//! - A plan store keyed by id, with content-hash dedup and monotonic versions
//! - Append-only history of superseded plan versions
//! - Per-version metric time series
//! - Opt-in retention and TOML configuration

pub mod config;
pub mod constants;
pub mod paths;
pub mod storage;

// Re-exports for convenience
pub use config::Config;
pub use storage::{
    Database, MetricSample, MetricsRecorder, Plan, PlanFilter, PlanHistory, PlanStore,
    PlanVersion, RetentionPolicy, StoreError, UpsertOutcome,
};
