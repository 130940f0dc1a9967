//! Filesystem locations

use std::path::PathBuf;

use crate::constants::{config, storage};

/// Root config directory (`~/.plantrack`)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(config::CONFIG_DIR_NAME)
}

/// Config file path
pub fn config_file() -> PathBuf {
    config_dir().join(config::CONFIG_FILE_NAME)
}

/// Database path used when nothing overrides it
pub fn default_database_path() -> PathBuf {
    config_dir().join(storage::DB_FILE_NAME)
}
