//! Connection pool
//!
//! Idle connections live in a lock-free `ArrayQueue` bounded by
//! `max_idle`. A tokio `Semaphore` with `max_open` permits bounds the number
//! of open connections: a permit is taken (and forgotten) when a connection
//! is dialed and added back when one is discarded.
//!
//! A connection handed back with an error, marked closed, or older than
//! `max_lifetime` is discarded instead of pooled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use tokio::sync::{Notify, Semaphore, SemaphorePermit};

use crate::connection::{Connection, ConnectionOptions};
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::transport::{TcpDialer, TcpTransport, Transport};

/// Callback that returns a connection to its pool
///
/// A `Some` error or a closed connection means the connection is discarded.
pub type ReleaseFn<T> = Box<dyn FnOnce(Connection<T>, Option<&ClientError>) + Send>;

/// Opens new transports for the pool
#[async_trait]
pub trait Dialer<T: Transport>: Send + Sync + 'static {
    async fn dial(&self) -> Result<T>;
}

#[async_trait]
impl Dialer<TcpTransport> for TcpDialer {
    async fn dial(&self) -> Result<TcpTransport> {
        self.connect().await
    }
}

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 5,
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Metrics for connection pool monitoring
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Connections dialed
    pub opened: AtomicU64,
    /// Idle connections handed out again
    pub reused: AtomicU64,
    /// Connections dropped instead of pooled
    pub discarded: AtomicU64,
}

/// Point-in-time snapshot of pool state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub opened: u64,
    pub reused: u64,
    pub discarded: u64,
    pub idle: usize,
}

struct PoolInner<T: Transport> {
    dialer: Box<dyn Dialer<T>>,
    conn_options: ConnectionOptions,
    options: PoolOptions,
    idle: ArrayQueue<Connection<T>>,
    open: Semaphore,
    released: Notify,
    closed: AtomicBool,
    next_id: AtomicU64,
    metrics: PoolMetrics,
}

/// Shared pool of handshaken connections
pub struct ConnectionPool<T: Transport> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Transport> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ConnectionPool<T> {
    /// Create a pool; no connection is opened until the first `acquire`
    pub fn new(
        dialer: impl Dialer<T>,
        conn_options: ConnectionOptions,
        options: PoolOptions,
    ) -> Self {
        let max_open = options.max_open.max(1);
        let max_idle = options.max_idle.clamp(1, max_open);
        Self {
            inner: Arc::new(PoolInner {
                dialer: Box::new(dialer),
                conn_options,
                options: PoolOptions {
                    max_open,
                    max_idle,
                    max_lifetime: options.max_lifetime,
                },
                idle: ArrayQueue::new(max_idle),
                open: Semaphore::new(max_open),
                released: Notify::new(),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    #[inline]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    #[inline]
    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.inner.conn_options
    }

    /// Take an idle connection or dial a new one
    ///
    /// Waits for a free slot when `max_open` connections are in use, until
    /// one is released or `ctx` is done.
    pub async fn acquire(&self, ctx: &Context) -> Result<Connection<T>> {
        loop {
            if self.is_closed() {
                return Err(ClientError::PoolClosed);
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            if let Some(conn) = self.pop_idle() {
                return Ok(conn);
            }

            tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                permit = self.inner.open.acquire() => {
                    let permit = permit.map_err(|_| ClientError::PoolClosed)?;
                    return self.open(ctx, permit).await;
                }
                _ = self.inner.released.notified() => {}
            }
        }
    }

    fn pop_idle(&self) -> Option<Connection<T>> {
        while let Some(conn) = self.inner.idle.pop() {
            if conn.is_closed() || self.expired(&conn) {
                self.discard(conn, "stale");
                continue;
            }
            self.inner.metrics.reused.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(conn_id = conn.id(), "reusing idle connection");
            return Some(conn);
        }
        None
    }

    /// Dial and handshake while holding a permit
    ///
    /// The permit is forgotten once the connection exists and is otherwise
    /// dropped, so a failed or abandoned dial frees its slot.
    async fn open(&self, ctx: &Context, permit: SemaphorePermit<'_>) -> Result<Connection<T>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = &self.inner;
        let result = ctx
            .run(async {
                let transport = inner.dialer.dial().await?;
                Connection::open(id, transport, &inner.conn_options).await
            })
            .await;

        match result {
            Ok(conn) => {
                permit.forget();
                self.inner.metrics.opened.fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Err(e) => {
                drop(permit);
                tracing::debug!(conn_id = id, error = %e, "failed to open connection");
                Err(e)
            }
        }
    }

    /// Return a connection; discards it on error, closed or expired
    pub fn release(&self, conn: Connection<T>, err: Option<&ClientError>) {
        let reason = if err.is_some() {
            Some("error")
        } else if conn.is_closed() {
            Some("closed")
        } else if self.expired(&conn) {
            Some("expired")
        } else if self.is_closed() {
            Some("pool closed")
        } else {
            None
        };

        if let Some(reason) = reason {
            if let Some(e) = err {
                tracing::debug!(conn_id = conn.id(), error = %e, "releasing connection after error");
            }
            self.discard(conn, reason);
            return;
        }

        match self.inner.idle.push(conn) {
            Ok(()) => self.inner.released.notify_one(),
            Err(conn) => self.discard(conn, "idle pool full"),
        }
    }

    /// Build a release callback bound to this pool
    pub fn release_fn(&self) -> ReleaseFn<T> {
        let pool = self.clone();
        Box::new(move |conn, err| pool.release(conn, err))
    }

    fn discard(&self, conn: Connection<T>, reason: &'static str) {
        self.inner.metrics.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id = conn.id(), reason, "discarding connection");
        drop(conn);
        self.inner.open.add_permits(1);
        self.inner.released.notify_one();
    }

    fn expired(&self, conn: &Connection<T>) -> bool {
        conn.age() >= self.inner.options.max_lifetime
    }

    /// Close the pool: drop idle connections and fail pending and future
    /// acquires with `PoolClosed`
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.open.close();
        while let Some(conn) = self.inner.idle.pop() {
            self.discard(conn, "pool closed");
        }
        tracing::debug!("connection pool closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get snapshot of pool state
    pub fn stats(&self) -> PoolStats {
        let m = &self.inner.metrics;
        PoolStats {
            opened: m.opened.load(Ordering::Relaxed),
            reused: m.reused.load(Ordering::Relaxed),
            discarded: m.discarded.load(Ordering::Relaxed),
            idle: self.inner.idle.len(),
        }
    }
}

impl ConnectionPool<TcpTransport> {
    /// Pool dialing `addr` over TCP
    pub fn tcp(dialer: TcpDialer, conn_options: ConnectionOptions, options: PoolOptions) -> Self {
        Self::new(dialer, conn_options, options)
    }
}
