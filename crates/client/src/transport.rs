//! Byte transports
//!
//! `Transport` is the seam between a `Connection` and the network. The
//! production implementation is `TcpTransport`; tests substitute a scripted
//! mock. Every transport hands out a `ShutdownHandle` that can be used from
//! another task to force pending reads and writes to fail.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{SockRef, Socket, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ClientError, Result};

/// Something that can be shut down from another task
pub trait Shutdown: Send + Sync + 'static {
    fn shutdown(&self);
}

/// Cloneable, type-erased shutdown capability
#[derive(Clone)]
pub struct ShutdownHandle(Arc<dyn Shutdown>);

impl ShutdownHandle {
    pub fn new(inner: impl Shutdown) -> Self {
        Self(Arc::new(inner))
    }

    #[inline]
    pub fn shutdown(&self) {
        self.0.shutdown();
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownHandle")
    }
}

/// Bidirectional byte stream to the server
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write the whole buffer
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read available bytes, appending to `buf`; `Ok(0)` means EOF
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Handle that closes the transport from another task
    fn shutdown_handle(&self) -> ShutdownHandle;

    /// Remote address, for logging
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}

// =============================================================================
// TCP
// =============================================================================

/// Transport over a tokio `TcpStream`
pub struct TcpTransport {
    stream: TcpStream,
    /// Duplicate of the stream's socket, used only to shut it down
    socket: Arc<Socket>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let socket = SockRef::from(&stream).try_clone()?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            socket: Arc::new(socket),
            peer,
        })
    }
}

struct SharedSocket(Arc<Socket>);

impl Shutdown for SharedSocket {
    fn shutdown(&self) {
        let _ = self.0.shutdown(std::net::Shutdown::Both);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.stream.read_buf(buf).await
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(SharedSocket(Arc::clone(&self.socket)))
    }

    fn peer(&self) -> String {
        self.peer
            .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .finish()
    }
}

/// Opens TCP transports with a connect timeout and socket options
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub addr: String,
    pub dial_timeout: Duration,
    /// Keep-alive idle time and probe interval; `None` disables keep-alive
    pub keepalive: Option<Duration>,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            dial_timeout: Duration::from_secs(30),
            keepalive: Some(Duration::from_secs(30)),
        }
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

    /// Connect to `addr`
    pub async fn connect(&self) -> Result<TcpTransport> {
        let stream = match timeout(self.dial_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Connect {
                    addr: self.addr.clone(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(ClientError::ConnectTimeout {
                    addr: self.addr.clone(),
                });
            }
        };

        // Set TCP_NODELAY for lower latency (non-fatal if it fails)
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(
                addr = %self.addr,
                error = %e,
                "failed to set TCP_NODELAY, continuing with default buffering"
            );
        }

        // Set TCP keep-alive (non-fatal if it fails)
        if let Some(interval) = self.keepalive {
            let sock_ref = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(interval);

            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(interval);

            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                tracing::debug!(
                    addr = %self.addr,
                    error = %e,
                    "failed to set TCP keep-alive, continuing without keep-alive"
                );
            } else {
                tracing::trace!(
                    addr = %self.addr,
                    interval_secs = interval.as_secs(),
                    "TCP keep-alive enabled"
                );
            }
        }

        TcpTransport::new(stream).map_err(|e| ClientError::Connect {
            addr: self.addr.clone(),
            source: e,
        })
    }
}
