//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur while installing the tracing subscriber
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed, or the filter was rejected
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),
    /// The configured level could not be parsed
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}
