//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An `OASIS_*` override that does not parse
    #[error("Invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// Parsed fine, but out of range
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(field: &str) -> Self {
        ConfigError::Validation(format!("{} must be greater than 0", field))
    }
}
