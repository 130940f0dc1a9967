//! User configuration
//!
//! Loaded from `~/.plantrack/config.toml`. Every key is optional:
//!
//! ```toml
//! database_path = "/var/lib/plantrack/plans.db"
//! log_filter = "plantrack_core=debug"
//!
//! [retention]
//! keep_history_versions = 50
//! metrics_max_age_days = 90
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::config::DB_ENV_VAR;
use crate::paths;
use crate::storage::RetentionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; `PLANTRACK_DB` and `--db` take precedence
    pub database_path: Option<PathBuf>,
    /// tracing EnvFilter directive used when RUST_LOG is unset
    pub log_filter: Option<String>,
    pub retention: RetentionPolicy,
}

impl Config {
    /// Load from the default config file
    pub fn load() -> Result<Self> {
        Self::load_from_path(&paths::config_file())
    }

    /// Load from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Resolve the database path: flag, then environment, then file, then default
    pub fn resolve_database_path(&self, flag: Option<&Path>) -> PathBuf {
        self.database_path_from(flag, std::env::var_os(DB_ENV_VAR))
    }

    fn database_path_from(&self, flag: Option<&Path>, env: Option<OsString>) -> PathBuf {
        if let Some(path) = flag {
            return path.to_path_buf();
        }
        if let Some(path) = env.filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        self.database_path
            .clone()
            .unwrap_or_else(paths::default_database_path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config =
            Config::load_from_path(&temp.path().join("absent.toml")).expect("Load failed");
        assert_eq!(config, Config::default());
        assert!(!config.retention.is_enabled());
    }

    #[test]
    fn test_parse_full_config() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
database_path = "/tmp/plans.db"
log_filter = "debug"

[retention]
keep_history_versions = 10
metrics_max_age_days = 30
"#,
        )
        .expect("Failed to write config");

        let config = Config::load_from_path(&path).expect("Load failed");
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/plans.db")));
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.retention.keep_history_versions, Some(10));
        assert_eq!(config.retention.history_max_age_days, None);
        assert_eq!(config.retention.metrics_max_age_days, Some(30));
    }

    #[test]
    fn test_malformed_config_names_path() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "retention = 5").expect("Failed to write config");

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(format!("{err}").contains("config.toml"));
    }

    #[test]
    fn test_database_path_precedence() {
        let config = Config {
            database_path: Some(PathBuf::from("/from/file.db")),
            ..Default::default()
        };

        assert_eq!(
            config.database_path_from(
                Some(Path::new("/from/flag.db")),
                Some(OsString::from("/from/env.db"))
            ),
            PathBuf::from("/from/flag.db")
        );
        assert_eq!(
            config.database_path_from(None, Some(OsString::from("/from/env.db"))),
            PathBuf::from("/from/env.db")
        );
        assert_eq!(
            config.database_path_from(None, Some(OsString::new())),
            PathBuf::from("/from/file.db")
        );
        assert_eq!(
            Config::default().database_path_from(None, None),
            paths::default_database_path()
        );
    }
}
