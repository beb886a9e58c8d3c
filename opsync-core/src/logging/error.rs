//! Error types for the logging subsystem

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoggingError {
    /// A global subscriber is already installed, or installing one failed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}
