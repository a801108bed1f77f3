// src/config.rs
// Configuration: env vars layered under a TOML file, mirroring mira-server's
// config/env.rs + config/file.rs split.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Environment-derived configuration (single source of truth for env vars).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `CONVOLINK_DB_PATH`, overrides the file config's `database.path`.
    pub db_path: Option<PathBuf>,
    /// `CONVOLINK_SUBTASK_WINDOW_SECS`.
    pub subtask_window_secs: Option<u64>,
    /// `CONVOLINK_CACHE_CAPACITY`.
    pub cache_capacity: Option<u64>,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup).
    pub fn load() -> Self {
        Self {
            db_path: std::env::var("CONVOLINK_DB_PATH").ok().map(PathBuf::from),
            subtask_window_secs: std::env::var("CONVOLINK_SUBTASK_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            cache_capacity: std::env::var("CONVOLINK_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// File-based configuration loaded from `~/.convolink/config.toml`. Every
/// field has a `default_*()` fn so the file may be partial or absent
/// entirely (mirrors `RetentionConfig` in `config/file.rs`).
#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    #[serde(default = "FileConfig::default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "FileConfig::default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "FileConfig::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "FileConfig::default_subtask_window_secs")]
    pub subtask_window_secs: u64,
    #[serde(default = "FileConfig::default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            pool_size: Self::default_pool_size(),
            batch_size: Self::default_batch_size(),
            subtask_window_secs: Self::default_subtask_window_secs(),
            cache_capacity: Self::default_cache_capacity(),
        }
    }
}

impl FileConfig {
    fn default_db_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".convolink")
            .join("convolink.db")
    }

    fn default_pool_size() -> usize {
        5
    }

    fn default_batch_size() -> usize {
        1000
    }

    fn default_subtask_window_secs() -> u64 {
        30
    }

    fn default_cache_capacity() -> u64 {
        crate::cache::DEFAULT_CAPACITY
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".convolink")
            .join("config.toml")
    }

    /// Load from `~/.convolink/config.toml`, falling back to defaults when
    /// the file is absent or fails to parse.
    pub fn load() -> Self {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
        }
    }
}

/// Fully resolved runtime configuration: file defaults overridden by env vars.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub pool_size: usize,
    pub batch_size: usize,
    pub subtask_window: std::time::Duration,
    pub cache_capacity: u64,
}

impl Config {
    pub fn load() -> Self {
        let file = FileConfig::load();
        let env = EnvConfig::load();
        Self {
            db_path: env.db_path.unwrap_or(file.db_path),
            pool_size: file.pool_size,
            batch_size: file.batch_size,
            subtask_window: std::time::Duration::from_secs(
                env.subtask_window_secs.unwrap_or(file.subtask_window_secs),
            ),
            cache_capacity: env.cache_capacity.unwrap_or(file.cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_defaults_when_empty() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.subtask_window_secs, 30);
    }

    #[test]
    fn file_config_partial_override() {
        let toml = "batch_size = 200\n";
        let config: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.pool_size, 5);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let toml = "batch_size = 50\nunknown_key = \"ignored\"\n";
        let config: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.batch_size, 50);
    }
}
