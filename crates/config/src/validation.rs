//! Configuration validation
//!
//! Validates config consistency:
//! - Required client fields are present
//! - Pool and buffer sizes are non-zero
//! - Idle connections do not exceed open connections

use crate::Config;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_client(config)?;
    validate_pool(config)?;
    validate_buffer_pool(config)?;
    Ok(())
}

fn validate_client(config: &Config) -> Result<()> {
    let client = &config.client;

    if client.addr.trim().is_empty() {
        return Err(ConfigError::missing_field("client", "addr"));
    }
    if !client.addr.contains(':') {
        return Err(ConfigError::invalid_value(
            "client",
            "addr",
            format!("'{}' must be host:port", client.addr),
        ));
    }
    if client.database.is_empty() {
        return Err(ConfigError::missing_field("client", "database"));
    }
    if client.max_compression_buffer == 0 {
        return Err(ConfigError::invalid_value(
            "client",
            "max_compression_buffer",
            "must be greater than 0",
        ));
    }
    if client.dial_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "client",
            "dial_timeout",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_pool(config: &Config) -> Result<()> {
    let pool = &config.pool;

    if pool.max_open_conns == 0 {
        return Err(ConfigError::invalid_value(
            "pool",
            "max_open_conns",
            "must be at least 1",
        ));
    }
    if pool.max_idle_conns > pool.max_open_conns {
        return Err(ConfigError::invalid_value(
            "pool",
            "max_idle_conns",
            format!(
                "{} exceeds max_open_conns ({})",
                pool.max_idle_conns, pool.max_open_conns
            ),
        ));
    }
    if pool.conn_max_lifetime.is_zero() {
        return Err(ConfigError::invalid_value(
            "pool",
            "conn_max_lifetime",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_buffer_pool(config: &Config) -> Result<()> {
    if config.buffer_pool.pool_size == 0 {
        return Err(ConfigError::invalid_value(
            "buffer_pool",
            "pool_size",
            "must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_empty_addr() {
        let mut config = Config::default();
        config.client.addr = "  ".into();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                section: "client",
                field: "addr"
            }
        ));
    }

    #[test]
    fn test_addr_without_port() {
        let err = Config::from_str("[client]\naddr = \"localhost\"").unwrap_err();
        assert!(err.to_string().contains("host:port"));
    }

    #[test]
    fn test_zero_compression_buffer() {
        let mut config = Config::default();
        config.client.max_compression_buffer = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_compression_buffer"));
    }

    #[test]
    fn test_zero_dial_timeout() {
        let mut config = Config::default();
        config.client.dial_timeout = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_open_conns() {
        let err = Config::from_str("[pool]\nmax_open_conns = 0").unwrap_err();
        assert!(err.to_string().contains("max_open_conns"));
    }

    #[test]
    fn test_idle_exceeds_open() {
        let toml = r#"
[pool]
max_open_conns = 2
max_idle_conns = 3
"#;
        let err = Config::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("exceeds max_open_conns (2)"));
    }

    #[test]
    fn test_zero_buffer_pool() {
        let mut config = Config::default();
        config.buffer_pool.pool_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("[buffer_pool]"));
    }
}
