//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// SQLite storage configuration
pub mod storage {
    use super::*;

    /// Database file name inside the config directory
    pub const DB_FILE_NAME: &str = "plans.db";

    /// How long a writer waits for the lock held by another writer
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Configuration file and environment
pub mod config {
    /// Config directory name
    pub const CONFIG_DIR_NAME: &str = ".plantrack";

    /// Config file name inside the config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Environment variable that overrides the database path
    pub const DB_ENV_VAR: &str = "PLANTRACK_DB";

    /// Log filter used when neither RUST_LOG nor the config file sets one
    pub const DEFAULT_LOG_FILTER: &str = "warn";
}
