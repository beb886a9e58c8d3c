//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot encode configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An `OPSYNC_*` variable is set but does not parse
    #[error("Bad value in {var}: {reason}")]
    InvalidEnv { var: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
