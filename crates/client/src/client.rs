//! Client facade
//!
//! `Client` ties a connection pool to the batch pipeline: it opens INSERT
//! queries, hands out builders shaped by the target table, and creates
//! senders bound to pooled connections.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(ClientOptions::from(&config));
//! let ctx = Context::with_timeout(Duration::from_secs(30));
//!
//! let (mut batch, mut sender) = client.prepare_batch(&ctx, "INSERT INTO events").await?;
//! for event in events {
//!     batch.append_struct(&event)?;
//! }
//!
//! let mut buf = BufferPool::global().acquire();
//! batch.build(&mut buf)?;
//! sender.send(&ctx, &buf).await?;
//! ```

use std::time::Duration;

use chbulk_config::Config;

use crate::batch::BatchBuilder;
use crate::connection::{ConnectionOptions, QueryOptions};
use crate::context::Context;
use crate::error::Result;
use crate::pool::{ConnectionPool, PoolOptions, PoolStats};
use crate::sender::{OnceSender, ReusableSender, open_insert};
use crate::transport::{TcpDialer, TcpTransport, Transport};

/// Options for a TCP client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub addr: String,
    pub dial_timeout: Duration,
    pub keepalive: Option<Duration>,
    pub connection: ConnectionOptions,
    pub pool: PoolOptions,
}

impl ClientOptions {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.connection.database = database.into();
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.connection.username = username.into();
        self.connection.password = password.into();
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: chbulk_protocol::CompressionMethod) -> Self {
        self.connection.compression = compression;
        self
    }

    #[must_use]
    pub fn with_max_compression_buffer(mut self, bytes: usize) -> Self {
        self.connection.max_compression_buffer = bytes;
        self
    }

    /// Add a setting sent with every query
    #[must_use]
    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection.settings.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    fn dialer(&self) -> TcpDialer {
        TcpDialer::new(self.addr.clone())
            .with_dial_timeout(self.dial_timeout)
            .with_keepalive(self.keepalive)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            dial_timeout: Duration::from_secs(30),
            keepalive: Some(Duration::from_secs(30)),
            connection: ConnectionOptions::default(),
            pool: PoolOptions::default(),
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        let client = &config.client;
        Self {
            addr: client.addr.clone(),
            dial_timeout: client.dial_timeout,
            keepalive: client.keepalive(),
            connection: ConnectionOptions {
                database: client.database.clone(),
                username: client.username.clone(),
                password: client.password.clone(),
                client_name: client.client_name.clone(),
                compression: client.compression,
                max_compression_buffer: client.max_compression_buffer,
                settings: Vec::new(),
            },
            pool: PoolOptions {
                max_open: config.pool.max_open_conns,
                max_idle: config.pool.max_idle_conns,
                max_lifetime: config.pool.conn_max_lifetime,
            },
        }
    }
}

/// Bulk insert client over a connection pool
pub struct Client<T: Transport> {
    pool: ConnectionPool<T>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl Client<TcpTransport> {
    /// Client dialing over TCP; connections are opened on first use
    pub fn new(options: ClientOptions) -> Self {
        let pool = ConnectionPool::tcp(options.dialer(), options.connection, options.pool);
        Self { pool }
    }
}

impl<T: Transport> Client<T> {
    /// Client over an existing pool
    pub fn with_pool(pool: ConnectionPool<T>) -> Self {
        Self { pool }
    }

    /// Open an INSERT and return a builder for its rows and the sender that
    /// will transmit them
    ///
    /// `query` is completed with `VALUES` if it does not end with it. The
    /// returned sender holds a pooled connection until it sends, aborts or
    /// is dropped.
    pub async fn prepare_batch(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<(BatchBuilder, OnceSender<T>)> {
        self.prepare_batch_with(ctx, query, &QueryOptions::default())
            .await
    }

    /// `prepare_batch` with a query id and per-query settings
    pub async fn prepare_batch_with(
        &self,
        ctx: &Context,
        query: &str,
        options: &QueryOptions,
    ) -> Result<(BatchBuilder, OnceSender<T>)> {
        open_insert(&self.pool, ctx, query, options).await
    }

    /// Sender that opens a fresh connection for every buffer
    pub fn reusable_sender(&self) -> ReusableSender<T> {
        ReusableSender::new(self.pool.clone())
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool<T> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the pool; in-flight senders finish, new batches fail
    pub fn close(&self) {
        self.pool.close();
    }
}
