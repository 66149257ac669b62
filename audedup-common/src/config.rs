//! Bootstrap configuration loading
//!
//! Resolution order for the config file itself:
//! 1. Explicit path (command-line `--config`)
//! 2. `AUDEDUP_CONFIG` environment variable
//! 3. `~/.config/audedup/config.toml` (platform config dir)
//! 4. `/etc/audedup/config.toml`
//!
//! A missing file is not fatal: a warning is logged and built-in defaults are
//! used. Individual values may then be overridden from the command line.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AUDEDUP_CONFIG";

/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "AUDEDUP_DATABASE";

/// Top-level TOML configuration shared by the worker and the connector
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    /// Canonical view settings; reconciliation is disabled when absent
    #[serde(default)]
    pub view: Option<ViewConfig>,

    #[serde(default)]
    pub connector: ConnectorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Queue consumer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Sleep between polls when no job is pending
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Expire Processing jobs not updated for this long. Disabled when unset.
    #[serde(default)]
    pub job_lease_secs: Option<u64>,

    /// Endpoints receiving classification events
    #[serde(default)]
    pub webhook_urls: Vec<String>,

    /// Per-target delivery timeout
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    /// Upper bound on total retry time for a locked database
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            job_lease_secs: None,
            webhook_urls: Vec::new(),
            notify_timeout_ms: default_notify_timeout_ms(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_lease(&self) -> Option<Duration> {
        self.job_lease_secs.map(Duration::from_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// Canonical view (symlink tree) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewConfig {
    /// Directory holding the symlink tree
    pub view_root: PathBuf,

    /// Directory the symlinks point into
    pub source_root: PathBuf,

    /// Prefix stripped from store paths to obtain the view-relative path
    pub store_prefix: PathBuf,

    /// Paths per validity round-trip during stale removal
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Inbound HTTP connector settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prepended to `fname` of tgmount webhook requests
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            basedir: default_basedir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_notify_timeout_ms() -> u64 {
    2000
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    1000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_basedir() -> PathBuf {
    PathBuf::from("./")
}

impl TomlConfig {
    /// Load configuration, falling back to defaults when no file is found
    ///
    /// A file that exists but cannot be parsed is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match locate_config_file(explicit) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the database path: CLI → env → TOML → platform default
    pub fn resolve_database_path(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.database_path {
            return path.clone();
        }

        default_database_path()
    }
}

/// Find the first existing config file in priority order
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        // An explicit path is returned even if missing so the read error surfaces
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("audedup").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/audedup/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("audedup").join("dedup.sqlite3"))
        .unwrap_or_else(|| PathBuf::from("./data/dedup.sqlite3"))
}
