//! Tests for the connection pool

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chbulk_protocol::CompressionMethod;

use crate::connection::ConnectionOptions;
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::pool::{ConnectionPool, Dialer, PoolOptions, PoolStats};
use crate::test::{MockDialer, MockTransport, ServerReplies};

fn dialer() -> MockDialer {
    MockDialer::new(ServerReplies::new(CompressionMethod::None).hello())
}

fn pool(dialer: MockDialer, max_open: usize, max_idle: usize) -> ConnectionPool<MockTransport> {
    ConnectionPool::new(
        dialer,
        ConnectionOptions::default(),
        PoolOptions {
            max_open,
            max_idle,
            max_lifetime: Duration::from_secs(3600),
        },
    )
}

/// Dialer whose every attempt is refused
struct RefusingDialer {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Dialer<MockTransport> for RefusingDialer {
    async fn dial(&self) -> Result<MockTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Connect {
            addr: "mock".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }
}

/// Dialer whose first attempt never completes
struct StallFirstDialer {
    inner: MockDialer,
    attempts: AtomicUsize,
}

#[async_trait]
impl Dialer<MockTransport> for StallFirstDialer {
    async fn dial(&self) -> Result<MockTransport> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        self.inner.dial().await
    }
}

#[tokio::test]
async fn test_no_connection_until_acquire() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 4, 2);

    assert_eq!(dialer.dials(), 0);
    assert_eq!(pool.stats(), PoolStats::default());
}

#[tokio::test]
async fn test_release_then_reuse() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 4, 2);
    let ctx = Context::background();

    let conn = pool.acquire(&ctx).await.unwrap();
    let id = conn.id();
    pool.release(conn, None);
    assert_eq!(pool.stats().idle, 1);

    let conn = pool.acquire(&ctx).await.unwrap();

    assert_eq!(conn.id(), id);
    assert_eq!(dialer.dials(), 1);
    let stats = pool.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_release_with_error_discards() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 4, 2);
    let ctx = Context::background();

    let conn = pool.acquire(&ctx).await.unwrap();
    let id = conn.id();
    pool.release(conn, Some(&ClientError::Aborted));

    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().discarded, 1);

    let conn = pool.acquire(&ctx).await.unwrap();
    assert_ne!(conn.id(), id);
    assert_eq!(dialer.dials(), 2);
}

#[tokio::test]
async fn test_release_closed_discards() {
    let pool = pool(dialer(), 4, 2);
    let ctx = Context::background();

    let mut conn = pool.acquire(&ctx).await.unwrap();
    conn.set_closed();
    pool.release(conn, None);

    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().discarded, 1);
}

#[tokio::test]
async fn test_expired_connection_discarded() {
    let pool = ConnectionPool::new(
        dialer(),
        ConnectionOptions::default(),
        PoolOptions {
            max_lifetime: Duration::ZERO,
            ..PoolOptions::default()
        },
    );

    let conn = pool.acquire(&Context::background()).await.unwrap();
    pool.release(conn, None);

    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().discarded, 1);
}

#[tokio::test]
async fn test_idle_limit() {
    let pool = pool(dialer(), 4, 1);
    let ctx = Context::background();

    let a = pool.acquire(&ctx).await.unwrap();
    let b = pool.acquire(&ctx).await.unwrap();
    pool.release(a, None);
    pool.release(b, None);

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test]
async fn test_options_are_clamped() {
    let pool = pool(dialer(), 0, 10);

    assert_eq!(pool.options().max_open, 1);
    assert_eq!(pool.options().max_idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_open_waits_for_deadline() {
    let pool = pool(dialer(), 1, 1);
    let _held = pool.acquire(&Context::background()).await.unwrap();

    let ctx = Context::with_timeout(Duration::from_millis(50));
    let err = pool.acquire(&ctx).await.unwrap_err();

    assert!(matches!(err, ClientError::DeadlineExceeded));
}

#[tokio::test]
async fn test_max_open_waits_for_release() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 1, 1);
    let held = pool.acquire(&Context::background()).await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(&Context::background()).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    pool.release(held, None);
    let conn = waiter.await.unwrap().unwrap();

    assert_eq!(conn.id(), id);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn test_discard_frees_slot() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 1, 1);
    let held = pool.acquire(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(&Context::background()).await })
    };
    tokio::task::yield_now().await;

    pool.release(held, Some(&ClientError::Cancelled));
    waiter.await.unwrap().unwrap();

    assert_eq!(dialer.dials(), 2);
}

#[tokio::test]
async fn test_failed_dial_returns_permit() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let pool = ConnectionPool::new(
        RefusingDialer {
            attempts: Arc::clone(&attempts),
        },
        ConnectionOptions::default(),
        PoolOptions {
            max_open: 1,
            ..PoolOptions::default()
        },
    );
    let ctx = Context::background();

    for _ in 0..3 {
        let err = pool.acquire(&ctx).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_acquire_frees_slot() {
    let dialer = dialer();
    let pool = ConnectionPool::new(
        StallFirstDialer {
            inner: dialer.clone(),
            attempts: AtomicUsize::new(0),
        },
        ConnectionOptions::default(),
        PoolOptions {
            max_open: 1,
            ..PoolOptions::default()
        },
    );

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        pool.acquire(&Context::background()),
    )
    .await;
    assert!(abandoned.is_err());

    let ctx = Context::with_timeout(Duration::from_secs(5));
    let conn = pool.acquire(&ctx).await.unwrap();

    assert_eq!(conn.id(), 2);
    assert_eq!(dialer.dials(), 1);
    assert_eq!(pool.stats().opened, 1);
}

#[tokio::test]
async fn test_cancelled_context_fails_fast() {
    let dialer = dialer();
    let pool = pool(dialer.clone(), 4, 2);
    let ctx = Context::background();
    ctx.cancel();

    let err = pool.acquire(&ctx).await.unwrap_err();

    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn test_close() {
    let pool = pool(dialer(), 4, 2);
    let ctx = Context::background();
    let conn = pool.acquire(&ctx).await.unwrap();
    pool.release(conn, None);
    let in_flight = pool.acquire(&ctx).await.unwrap();

    pool.close();

    assert!(pool.is_closed());
    assert!(matches!(
        pool.acquire(&ctx).await,
        Err(ClientError::PoolClosed)
    ));

    // Connections handed back after close are dropped
    pool.release(in_flight, None);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    let pool = pool(dialer(), 1, 1);
    let _held = pool.acquire(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(&Context::background()).await })
    };
    tokio::task::yield_now().await;

    pool.close();

    assert!(matches!(
        waiter.await.unwrap(),
        Err(ClientError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_release_fn() {
    let pool = pool(dialer(), 4, 2);
    let conn = pool.acquire(&Context::background()).await.unwrap();

    let release = pool.release_fn();
    release(conn, None);

    assert_eq!(pool.stats().idle, 1);
}
