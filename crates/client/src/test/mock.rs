//! Scripted in-memory transport
//!
//! `MockTransport` records every `write_all` call as one entry and serves
//! reads from scripted server bytes. A `MockHandle` kept by the test can
//! inject write failures, make a write hang until the transport is shut
//! down, and inspect what was written.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionOptions};
use crate::error::Result;
use crate::pool::Dialer;
use crate::test::ServerReplies;
use crate::transport::{Shutdown, ShutdownHandle, Transport};

#[derive(Debug, Default)]
struct State {
    writes: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    /// Write attempt (counted since the last `clear_writes`) that fails, and how
    fail_write: Option<(usize, io::ErrorKind)>,
    /// Write number that blocks until shutdown
    hang_write: Option<usize>,
    attempts: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    readable: Notify,
    shutdown: CancellationToken,
}

impl Shutdown for Arc<Shared> {
    fn shutdown(&self) {
        self.shutdown.cancel();
        self.readable.notify_waiters();
    }
}

/// In-memory transport driven by a `MockHandle`
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side control of a `MockTransport`
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a transport and its control handle
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }

    /// Create a transport whose server will send `replies`
    pub fn with_replies(replies: ServerReplies) -> (Self, MockHandle) {
        let (transport, handle) = Self::new();
        handle.push_read(replies.into_bytes());
        (transport, handle)
    }
}

fn shut_down() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport shut down")
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let hang = {
            let mut state = self.shared.state.lock();
            if self.shared.shutdown.is_cancelled() {
                return Err(shut_down());
            }
            let attempt = state.attempts;
            state.attempts += 1;
            if let Some((index, kind)) = state.fail_write
                && index == attempt
            {
                return Err(io::Error::new(kind, "injected write failure"));
            }
            let hang = state.hang_write == Some(attempt);
            if !hang {
                state.writes.push(buf.to_vec());
            }
            hang
        };

        if hang {
            self.shared.shutdown.cancelled().await;
            return Err(shut_down());
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(chunk) = state.reads.pop_front() {
                    buf.extend_from_slice(&chunk);
                    return Ok(chunk.len());
                }
            }
            if self.shared.shutdown.is_cancelled() {
                return Ok(0);
            }
            readable.await;
        }
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.shared))
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}

impl MockHandle {
    /// Queue bytes for the client to read
    pub fn push_read(&self, bytes: impl Into<Vec<u8>>) {
        self.shared.state.lock().reads.push_back(bytes.into());
        self.shared.readable.notify_waiters();
    }

    /// Queue scripted server replies
    pub fn push_replies(&self, replies: ServerReplies) {
        self.push_read(replies.into_bytes());
    }

    /// Fail the `index`-th write attempt with `kind`
    ///
    /// Attempts are counted from creation or from the last `clear_writes`.
    pub fn fail_write_at(&self, index: usize, kind: io::ErrorKind) {
        self.shared.state.lock().fail_write = Some((index, kind));
    }

    /// Fail the next write attempt with `kind`
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        let mut state = self.shared.state.lock();
        state.fail_write = Some((state.attempts, kind));
    }

    /// Block the next write attempt until the transport is shut down
    pub fn hang_next_write(&self) {
        let mut state = self.shared.state.lock();
        state.hang_write = Some(state.attempts);
    }

    /// Successful writes, one entry per `write_all` call
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.shared.state.lock().writes.len()
    }

    /// Forget recorded writes (e.g. the handshake) and restart the attempt
    /// count
    pub fn clear_writes(&self) {
        let mut state = self.shared.state.lock();
        state.writes.clear();
        state.attempts = 0;
    }

    /// Whether the transport was shut down
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Shut the transport down as the watchdog would
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

/// Open a handshaken connection over a mock transport
///
/// The handshake writes are cleared from the handle before returning.
pub async fn mock_connection(
    replies: ServerReplies,
    options: &ConnectionOptions,
) -> Result<(Connection<MockTransport>, MockHandle)> {
    let (transport, handle) = MockTransport::with_replies(replies);
    let conn = Connection::open(1, transport, options).await?;
    handle.clear_writes();
    Ok((conn, handle))
}

/// Dialer producing mock transports with scripted replies
///
/// Every dialed transport starts with a copy of the same replies. Handles
/// of all dialed transports are kept for inspection.
#[derive(Debug, Clone)]
pub struct MockDialer {
    replies: ServerReplies,
    handles: Arc<Mutex<Vec<MockHandle>>>,
    dials: Arc<AtomicUsize>,
}

impl MockDialer {
    pub fn new(replies: ServerReplies) -> Self {
        Self {
            replies,
            handles: Arc::default(),
            dials: Arc::default(),
        }
    }

    /// Handles of all transports dialed so far, in dial order
    pub fn handles(&self) -> Vec<MockHandle> {
        self.handles.lock().clone()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dialer<MockTransport> for MockDialer {
    async fn dial(&self) -> Result<MockTransport> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let (transport, handle) = MockTransport::with_replies(self.replies.clone());
        self.handles.lock().push(handle);
        Ok(transport)
    }
}
