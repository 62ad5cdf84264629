//! Client connection configuration

use std::time::Duration;

use chbulk_protocol::CompressionMethod;
use serde::Deserialize;

/// Connection settings for the ClickHouse native protocol
///
/// # Example
///
/// ```toml
/// [client]
/// addr = "clickhouse:9000"
/// database = "analytics"
/// username = "ingest"
/// password = "secret"
/// compression = "zstd"
/// dial_timeout = "5s"
/// keepalive = "30s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (host:port)
    /// Default: 127.0.0.1:9000
    pub addr: String,

    /// Database to use
    /// Default: "default"
    pub database: String,

    /// Username
    /// Default: "default"
    pub username: String,

    /// Password
    /// Default: empty
    pub password: String,

    /// Client name reported to the server
    /// Default: "chbulk"
    pub client_name: String,

    /// Data block compression (none, lz4, zstd)
    /// Default: lz4
    pub compression: CompressionMethod,

    /// Maximum uncompressed bytes per compressed chunk
    /// Default: 10MB
    pub max_compression_buffer: usize,

    /// TCP connect timeout
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// TCP keep-alive interval; "0s" disables keep-alive
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub keepalive: Option<Duration>,
}

impl ClientConfig {
    /// Keep-alive interval, `None` when disabled
    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive.filter(|d| !d.is_zero())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".into(),
            database: "default".into(),
            username: "default".into(),
            password: String::new(),
            client_name: "chbulk".into(),
            compression: CompressionMethod::Lz4,
            max_compression_buffer: 10 * 1024 * 1024,
            dial_timeout: Duration::from_secs(30),
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}

/// Connection pool sizing
///
/// # Example
///
/// ```toml
/// [pool]
/// max_open_conns = 20
/// max_idle_conns = 10
/// conn_max_lifetime = "30m"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections
    /// Default: 10
    pub max_open_conns: usize,

    /// Maximum idle connections kept for reuse
    /// Default: 5
    pub max_idle_conns: usize,

    /// Connections older than this are closed instead of reused
    /// Default: 1h
    #[serde(with = "humantime_serde")]
    pub conn_max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Encode buffer pool sizing
///
/// # Example
///
/// ```toml
/// [buffer_pool]
/// pool_size = 32
/// buffer_capacity = 1048576
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Number of pre-allocated buffers
    /// Default: 16
    pub pool_size: usize,

    /// Initial capacity of each buffer in bytes
    /// Default: 256KB
    pub buffer_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            buffer_capacity: 256 * 1024,
        }
    }
}
