//! chbulk Client Library
//!
//! Chunked, cancellable bulk inserts over the ClickHouse native protocol.
//!
//! # Architecture
//!
//! A batch moves through three stages:
//!
//! - [`BatchBuilder`] - Accumulates rows into a block shaped by the target
//!   table
//! - [`ChunkedBuffer`] - Encodes the block as one Data packet and cuts it
//!   into independently compressed chunks, pooled by [`BufferPool`]
//! - [`OnceSender`] / [`ReusableSender`] - Write the chunks in order on a
//!   pooled connection, finish the query, and release the connection
//!
//! While a sender is writing, a [`watchdog`] bound to the caller's
//! [`Context`] shuts the socket down if the context is cancelled or reaches
//! its deadline, so a blocked write cannot hang the caller.
//!
//! # Quick Start
//!
//! ```ignore
//! use chbulk_client::{BufferPool, Client, ClientOptions, Context};
//! use std::time::Duration;
//!
//! let client = Client::new(ClientOptions::new("127.0.0.1:9000"));
//! let ctx = Context::with_timeout(Duration::from_secs(30));
//!
//! let (mut batch, mut sender) = client.prepare_batch(&ctx, "INSERT INTO events").await?;
//! batch.append(vec![1u64.into(), "page_view".into()])?;
//! batch.append(vec![2u64.into(), "click".into()])?;
//!
//! let mut buf = BufferPool::global().acquire();
//! batch.build(&mut buf)?;
//! sender.send(&ctx, &buf).await?;
//! ```
//!
//! # Connection hygiene
//!
//! A connection is discarded rather than pooled when a send fails, is
//! aborted, or is interrupted by its context. Broken pipes and unexpected
//! EOFs also mark the connection closed on the spot.

mod buffer;
mod buffer_pool;
mod client;
mod connection;
mod context;
mod error;
mod pool;
mod sender;
mod transport;

pub mod batch;
pub mod test;
pub mod watchdog;

// Re-export main types at crate root for convenience
pub use batch::{BatchBuilder, BatchColumn};
pub use buffer::ChunkedBuffer;
pub use buffer_pool::{
    BufferPool, BufferPoolMetrics, DEFAULT_BUFFER_CAPACITY, DEFAULT_POOL_SIZE, MetricsSnapshot,
    PooledBuffer,
};
pub use client::{Client, ClientOptions};
pub use connection::{
    Connection, ConnectionOptions, DEFAULT_MAX_COMPRESSION_BUFFER, OnProcess, QueryOptions,
};
pub use context::Context;
pub use error::{ClientError, Result};
pub use pool::{ConnectionPool, Dialer, PoolMetrics, PoolOptions, PoolStats, ReleaseFn};
pub use sender::{OnceSender, ReusableSender};
pub use transport::{Shutdown, ShutdownHandle, TcpDialer, TcpTransport, Transport};
pub use watchdog::WatchdogGuard;

// Re-export protocol types used in the public API
pub use chbulk_protocol::{Block, ColumnType, CompressionMethod, Row, Value};

#[cfg(test)]
mod client_test;
#[cfg(test)]
mod pool_test;
