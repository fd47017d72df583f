//! Configuration management
//!
//! Layered configuration for the log-access core: defaults, an optional
//! TOML file, then `OASIS_<SECTION>_<KEY>` environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::logging::LogLevel;
use crate::privacy::GateMode;
use crate::supervisor::StoreAddress;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where and how to reach the log store
    pub store: StoreConfig,

    /// Request/response behaviour
    pub rpc: RpcConfig,

    /// Redaction policy
    pub privacy: PrivacyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Log store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `tcp:<host:port>` or `unix:<path>`
    pub address: StoreAddress,

    /// Fixed wait between dial attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Upper bound on a single dial attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long a single-value call waits for its response
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Records buffered per open stream before the reader applies backpressure
    pub stream_buffer: usize,

    /// Maximum number of messages returned by list queries
    pub page_size: usize,
}

/// Privacy gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub mode: GateMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
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

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: StoreAddress::Tcp("127.0.0.1:8008".to_string()),
            retry_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            stream_buffer: 64,
            page_size: 50,
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

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        })
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: OASIS_<SECTION>_<KEY>
    /// Example: OASIS_STORE_ADDRESS=unix:/home/me/.ssb/socket
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OASIS_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Store config
        if let Some(addr) = lookup("OASIS_STORE_ADDRESS") {
            self.store.address = parse_value("store address", &addr)?;
        }
        if let Some(interval) = lookup("OASIS_STORE_RETRY_INTERVAL") {
            self.store.retry_interval = parse_duration("retry interval", &interval)?;
        }
        if let Some(timeout) = lookup("OASIS_STORE_CONNECT_TIMEOUT") {
            self.store.connect_timeout = parse_duration("connect timeout", &timeout)?;
        }

        // RPC config
        if let Some(timeout) = lookup("OASIS_RPC_CALL_TIMEOUT") {
            self.rpc.call_timeout = parse_duration("call timeout", &timeout)?;
        }
        if let Some(buffer) = lookup("OASIS_RPC_STREAM_BUFFER") {
            self.rpc.stream_buffer = parse_value("stream buffer", &buffer)?;
        }
        if let Some(page_size) = lookup("OASIS_RPC_PAGE_SIZE") {
            self.rpc.page_size = parse_value("page size", &page_size)?;
        }

        // Privacy config
        if let Some(mode) = lookup("OASIS_PRIVACY_MODE") {
            self.privacy.mode = parse_value("privacy mode", &mode)?;
        }

        // Logging config
        if let Some(level) = lookup("OASIS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("OASIS_LOG_JSON") {
            self.logging.json_format = parse_value("JSON flag", &json)?;
        }

        Ok(())
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| env::var(key).ok())?;
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

    /// Reject zero intervals and sizes, and unknown log levels
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("retry_interval", self.store.retry_interval.is_zero()),
            ("connect_timeout", self.store.connect_timeout.is_zero()),
            ("call_timeout", self.rpc.call_timeout.is_zero()),
            ("stream_buffer", self.rpc.stream_buffer == 0),
            ("page_size", self.rpc.page_size == 0),
        ];
        if let Some((field, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::out_of_range(field));
        }

        self.logging
            .level
            .parse::<LogLevel>()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
