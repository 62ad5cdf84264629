//! Batch senders
//!
//! `OnceSender` owns one connection on which an INSERT query is already
//! open. It transmits exactly one built buffer (or is aborted) and then
//! hands the connection back through its release callback. `send` and
//! `abort` are terminal: whichever runs first wins, and any later call
//! fails with `AlreadySent`. The release callback runs exactly once.
//!
//! `ReusableSender` wraps the same contract around a pool: each `send`
//! opens the INSERT on a freshly acquired connection, sends, and lets the
//! inner sender go, so the wrapper can be fed buffer after buffer.
//!
//! # Send sequence
//!
//! ```text
//! arm watchdog -> write chunk 0..n -> empty Data block -> read until
//! EndOfStream -> disarm watchdog -> release(conn, error)
//! ```

use std::fmt;

use chbulk_protocol::Block;

use crate::batch::BatchBuilder;
use crate::buffer::ChunkedBuffer;
use crate::connection::{Connection, OnProcess, QueryOptions};
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::pool::{ConnectionPool, ReleaseFn};
use crate::transport::Transport;
use crate::watchdog;

/// Single-use sender bound to one connection
pub struct OnceSender<T: Transport> {
    conn: Option<Connection<T>>,
    release: Option<ReleaseFn<T>>,
    on_process: OnProcess,
    used: bool,
}

impl<T: Transport> OnceSender<T> {
    /// Create a sender for a connection with an INSERT already open
    pub fn new(conn: Connection<T>, release: ReleaseFn<T>) -> Self {
        Self {
            conn: Some(conn),
            release: Some(release),
            on_process: OnProcess::default(),
            used: false,
        }
    }

    /// Set callbacks for server packets received after the data
    #[must_use]
    pub fn with_on_process(mut self, on_process: OnProcess) -> Self {
        self.on_process = on_process;
        self
    }

    /// Whether `send` or `abort` already ran
    #[inline]
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// The bound connection, until `send` or `abort` takes it
    #[inline]
    pub fn connection(&self) -> Option<&Connection<T>> {
        self.conn.as_ref()
    }

    /// Transmit `buffer` and finish the INSERT
    ///
    /// The connection is released when this returns, with the returned
    /// error if any. If `ctx` is cancelled or reaches its deadline while
    /// writing or waiting for the server, the transport is shut down and
    /// the error is `Cancelled` or `DeadlineExceeded`. If the returned
    /// future is dropped before it completes, the connection is closed and
    /// released as aborted.
    ///
    /// A buffer encoded with a compression or revision other than the
    /// connection's is rejected with `EncodingMismatch` before anything is
    /// written; the sender stays unused.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` holds no chunks, i.e. was never built.
    pub async fn send(&mut self, ctx: &Context, buffer: &ChunkedBuffer) -> Result<()> {
        if self.used {
            return Err(ClientError::AlreadySent { op: "send" });
        }
        assert!(buffer.num_chunks() > 0, "bug: sending a buffer with no chunks");
        if let Some(conn) = &self.conn {
            check_encoding(conn, buffer)?;
        }

        self.used = true;
        let mut flight = InFlight {
            conn: self.conn.take(),
            release: self.release.take(),
        };
        let result = match flight.conn.as_mut() {
            Some(conn) => transmit(conn, ctx, buffer, &mut self.on_process).await,
            None => Err(ClientError::AlreadySent { op: "send" }),
        };
        flight.finish(result.as_ref().err());
        result
    }

    /// Give up without sending; the connection is released as aborted
    pub fn abort(&mut self) -> Result<()> {
        if self.used {
            return Err(ClientError::AlreadySent { op: "abort" });
        }
        self.used = true;
        self.release(Some(&ClientError::Aborted));
        Ok(())
    }

    fn release(&mut self, err: Option<&ClientError>) {
        if let (Some(conn), Some(release)) = (self.conn.take(), self.release.take()) {
            release(conn, err);
        }
    }
}

impl<T: Transport> Drop for OnceSender<T> {
    fn drop(&mut self) {
        // Dropped unused, or unwinding before send took the connection
        if self.conn.is_some() {
            self.used = true;
            self.release(Some(&ClientError::Aborted));
        }
    }
}

impl<T: Transport> fmt::Debug for OnceSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceSender")
            .field("conn", &self.conn)
            .field("used", &self.used)
            .finish()
    }
}

/// Connection taken by a running `send`
///
/// Released through `finish`; if the send future is dropped first, the
/// connection is closed and released as aborted.
struct InFlight<T: Transport> {
    conn: Option<Connection<T>>,
    release: Option<ReleaseFn<T>>,
}

impl<T: Transport> InFlight<T> {
    fn finish(mut self, err: Option<&ClientError>) {
        if let (Some(conn), Some(release)) = (self.conn.take(), self.release.take()) {
            release(conn, err);
        }
    }
}

impl<T: Transport> Drop for InFlight<T> {
    fn drop(&mut self) {
        if let (Some(mut conn), Some(release)) = (self.conn.take(), self.release.take()) {
            // Part of the Data packet may already be on the wire
            conn.set_closed();
            tracing::debug!(conn_id = conn.id(), "send dropped before completion, closing connection");
            release(conn, Some(&ClientError::Aborted));
        }
    }
}

/// Reject a buffer encoded for other connection settings
fn check_encoding<T: Transport>(conn: &Connection<T>, buffer: &ChunkedBuffer) -> Result<()> {
    if buffer.compression() == conn.compression() && buffer.revision() == conn.revision() {
        return Ok(());
    }
    Err(ClientError::EncodingMismatch {
        buffer_compression: buffer.compression(),
        buffer_revision: buffer.revision(),
        compression: conn.compression(),
        revision: conn.revision(),
    })
}

/// Write the chunks and finish the query under a watchdog
async fn transmit<T: Transport>(
    conn: &mut Connection<T>,
    ctx: &Context,
    buffer: &ChunkedBuffer,
    on_process: &mut OnProcess,
) -> Result<()> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let handle = conn.shutdown_handle();
    let guard = watchdog::arm(ctx, move || handle.shutdown());

    let result = write_batch(conn, ctx, buffer, on_process).await;

    if guard.disarm() {
        conn.set_closed();
        let err = ctx.err().unwrap_or(ClientError::Cancelled);
        tracing::debug!(conn_id = conn.id(), error = %err, "send interrupted by context");
        return Err(err);
    }
    result
}

async fn write_batch<T: Transport>(
    conn: &mut Connection<T>,
    ctx: &Context,
    buffer: &ChunkedBuffer,
    on_process: &mut OnProcess,
) -> Result<()> {
    for (index, chunk) in buffer.chunks().enumerate() {
        if let Err(e) = conn.write_chunk(chunk).await {
            if e.is_fatal_io() {
                tracing::debug!(conn_id = conn.id(), chunk = index, error = %e, "transport is gone, closing connection");
                conn.set_closed();
            } else {
                tracing::debug!(conn_id = conn.id(), chunk = index, error = %e, "chunk write failed");
            }
            return Err(e);
        }
        tracing::trace!(conn_id = conn.id(), chunk = index, bytes = chunk.len(), "chunk written");
    }

    if let Err(e) = conn.send_data(&Block::default(), "").await {
        if e.is_fatal_io() {
            conn.set_closed();
        }
        return Err(e);
    }

    conn.process(ctx, on_process).await?;

    tracing::debug!(
        conn_id = conn.id(),
        chunks = buffer.num_chunks(),
        bytes = buffer.len(),
        "batch sent"
    );
    Ok(())
}

/// Make an INSERT query end in `VALUES`
pub(crate) fn insert_query(query: &str) -> String {
    let query = query.trim_end().trim_end_matches(';').trim_end();
    let has_values = query
        .len()
        .checked_sub(6)
        .and_then(|start| query.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case("values"));
    if has_values {
        query.to_string()
    } else {
        format!("{query} VALUES")
    }
}

/// Open an INSERT on a pooled connection
///
/// Sends the query, reads the server's header block and returns a builder
/// shaped by it together with a sender bound to the connection. On failure
/// the connection is released with the error.
pub(crate) async fn open_insert<T: Transport>(
    pool: &ConnectionPool<T>,
    ctx: &Context,
    query: &str,
    options: &QueryOptions,
) -> Result<(BatchBuilder, OnceSender<T>)> {
    let mut conn = pool.acquire(ctx).await?;
    let query = insert_query(query);

    let header = async {
        conn.send_query(&query, options).await?;
        conn.first_block(ctx, &mut OnProcess::default()).await
    };
    let header = match ctx.run(header).await {
        Ok(block) => block,
        Err(e) => {
            if e.is_fatal_io() || e.is_context() {
                conn.set_closed();
            }
            pool.release(conn, Some(&e));
            return Err(e);
        }
    };

    tracing::debug!(
        conn_id = conn.id(),
        columns = header.num_columns(),
        query = %query,
        "insert opened"
    );

    let builder = BatchBuilder::new(header)
        .with_query(query)
        .with_revision(conn.revision())
        .with_compression(conn.compression())
        .with_max_chunk_bytes(conn.max_compression_buffer());
    Ok((builder, OnceSender::new(conn, pool.release_fn())))
}

/// Sender that acquires a fresh connection for every batch
pub struct ReusableSender<T: Transport> {
    pool: ConnectionPool<T>,
    options: QueryOptions,
    prepared: Option<OnceSender<T>>,
}

impl<T: Transport> ReusableSender<T> {
    pub fn new(pool: ConnectionPool<T>) -> Self {
        Self {
            pool,
            options: QueryOptions::default(),
            prepared: None,
        }
    }

    /// Set options for the INSERT queries this sender opens
    #[must_use]
    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether a connection is held for the next `send`
    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Open `query` now and hold the connection for the next `send`
    ///
    /// Returns a builder shaped by the table's columns. A sender that was
    /// already prepared is aborted first.
    pub async fn prepare(&mut self, ctx: &Context, query: &str) -> Result<BatchBuilder> {
        self.abort()?;
        let (builder, sender) = open_insert(&self.pool, ctx, query, &self.options).await?;
        self.prepared = Some(sender);
        Ok(builder)
    }

    /// Send `buffer` on a fresh connection
    ///
    /// Uses the connection held by `prepare` if there is one, otherwise opens
    /// the buffer's own query first. Either way the next call starts over.
    pub async fn send(&mut self, ctx: &Context, buffer: &ChunkedBuffer) -> Result<()> {
        let mut sender = match self.prepared.take() {
            Some(sender) => sender,
            None => {
                let (_, sender) = open_insert(&self.pool, ctx, buffer.query(), &self.options).await?;
                sender
            }
        };
        sender.send(ctx, buffer).await
    }

    /// Release a prepared connection without sending
    ///
    /// Does nothing when no connection is held.
    pub fn abort(&mut self) -> Result<()> {
        match self.prepared.take() {
            Some(mut sender) => sender.abort(),
            None => Ok(()),
        }
    }
}

impl<T: Transport> fmt::Debug for ReusableSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusableSender")
            .field("options", &self.options)
            .field("prepared", &self.prepared)
            .finish()
    }
}
