//! Configuration management for opsync
//!
//! Environment-based configuration with defaults, TOML files and
//! validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_oplog::apply::DEFAULT_MAX_HYDRATION_BATCH;
use crate::core_sync::DEFAULT_BATCH_SIZE;
use crate::logging::LogLevel;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Operation log configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Stable id of this device; generated on first run when absent
    pub client_id: Option<String>,

    /// Encrypt operation payloads before upload
    pub encryption_enabled: bool,

    /// Operations per upload request and download page
    pub upload_batch_size: usize,

    /// Per-request timeout handed to the transport
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Operation log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the commit log and state caches
    pub data_dir: PathBuf,

    /// Operations appended between compactions
    pub compaction_threshold: u64,

    /// Synced operations younger than this survive compaction
    #[serde(with = "humantime_serde")]
    pub compaction_retention: Duration,

    /// Hydration batches above this size are logged as a warning
    pub max_hydration_batch: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            encryption_enabled: false,
            upload_batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compaction_threshold: 500,
            compaction_retention: Duration::from_secs(7 * 24 * 3600),
            max_hydration_batch: DEFAULT_MAX_HYDRATION_BATCH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_duration_var(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: OPSYNC_<SECTION>_<KEY>
    /// Example: OPSYNC_STORE_DATA_DIR=/var/lib/opsync
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Sync config
        if let Ok(client_id) = env::var("OPSYNC_SYNC_CLIENT_ID") {
            config.sync.client_id = Some(client_id);
        }
        if let Some(enabled) = parse_var("OPSYNC_SYNC_ENCRYPTION_ENABLED")? {
            config.sync.encryption_enabled = enabled;
        }
        if let Some(size) = parse_var("OPSYNC_SYNC_UPLOAD_BATCH_SIZE")? {
            config.sync.upload_batch_size = size;
        }
        if let Some(timeout) = parse_duration_var("OPSYNC_SYNC_REQUEST_TIMEOUT")? {
            config.sync.request_timeout = timeout;
        }

        // Store config
        if let Ok(data_dir) = env::var("OPSYNC_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(threshold) =
            parse_var("OPSYNC_STORE_COMPACTION_THRESHOLD")?
        {
            config.store.compaction_threshold = threshold;
        }
        if let Some(retention) =
            parse_duration_var("OPSYNC_STORE_COMPACTION_RETENTION")?
        {
            config.store.compaction_retention = retention;
        }
        if let Some(batch) = parse_var("OPSYNC_STORE_MAX_HYDRATION_BATCH")? {
            config.store.max_hydration_batch = batch;
        }

        // Logging config
        if let Ok(level) = env::var("OPSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_var("OPSYNC_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(client_id) = &self.sync.client_id {
            if client_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "client_id must not be empty".to_string(),
                ));
            }
        }

        if self.sync.upload_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "upload_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.store.compaction_threshold == 0 {
            return Err(ConfigError::Invalid(
                "compaction_threshold must be greater than 0".to_string(),
            ));
        }

        if self.store.max_hydration_batch == 0 {
            return Err(ConfigError::Invalid(
                "max_hydration_batch must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}
