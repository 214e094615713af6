//! Configuration loading and well-known paths.
//!
//! Everything lives under `~/.cometa`:
//! - `results.toml`: watchdog and notification settings
//! - `notification_ids.json`: features the user wants completion notices for
//! - `results.sock`: daemon socket
//! - `logs/`: client log files

use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{ResultsError, Result};

pub const DATA_DIR_NAME: &str = ".cometa";
pub const CONFIG_FILE_NAME: &str = "results.toml";
pub const NOTIFICATION_IDS_FILE_NAME: &str = "notification_ids.json";
pub const SOCKET_FILE_NAME: &str = "results.sock";

const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
const MAX_RUN_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WatchdogConfig {
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl WatchdogConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::seconds(self.run_timeout_secs.min(MAX_RUN_TIMEOUT_SECS) as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ResultsConfig {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

/// Returns `~/.cometa`.
pub fn data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or(ResultsError::DataDirNotFound)
}

pub fn config_path() -> Result<PathBuf> {
    data_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

pub fn notification_ids_path() -> Result<PathBuf> {
    data_dir().map(|dir| dir.join(NOTIFICATION_IDS_FILE_NAME))
}

pub fn socket_path() -> Result<PathBuf> {
    data_dir().map(|dir| dir.join(SOCKET_FILE_NAME))
}

pub fn logs_dir() -> Result<PathBuf> {
    data_dir().map(|dir| dir.join("logs"))
}

/// Loads configuration, returning defaults when the file doesn't exist.
pub fn load_config(path: Option<PathBuf>) -> Result<ResultsConfig> {
    let path = match path {
        Some(path) => path,
        None => config_path()?,
    };

    if !path.exists() {
        return Ok(ResultsConfig::default());
    }

    let content = fs_err::read_to_string(&path).map_err(|source| ResultsError::Io {
        context: format!("reading {}", path.display()),
        source,
    })?;
    parse_config(&path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<ResultsConfig> {
    toml::from_str::<ResultsConfig>(content).map_err(|err| ResultsError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
