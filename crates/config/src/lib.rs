//! chbulk Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use chbulk_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[client]\naddr = \"clickhouse:9000\"").unwrap();
//! assert_eq!(config.client.addr, "clickhouse:9000");
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [client]
//! addr = "clickhouse:9000"
//! database = "analytics"
//! compression = "lz4"
//! max_compression_buffer = 10485760
//! dial_timeout = "10s"
//!
//! [pool]
//! max_open_conns = 10
//! max_idle_conns = 5
//! conn_max_lifetime = "1h"
//!
//! [buffer_pool]
//! pool_size = 16
//! buffer_capacity = 262144
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

mod client;
mod error;
mod logging;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use client::{BufferPoolConfig, ClientConfig, PoolConfig};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, init_logging};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server connection settings
    pub client: ClientConfig,

    /// Connection pool sizing
    pub pool: PoolConfig,

    /// Encode buffer pool sizing
    pub buffer_pool: BufferPoolConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
