//! Error types for batch building and sending
//!
//! One enum covers the whole pipeline so that a sender can hand the same
//! error to its release callback and to the caller.

use std::io;

use chbulk_protocol::{CompressionMethod, ProtocolError, ServerException, ServerPacket};
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while building or sending a batch
#[derive(Debug, Error)]
pub enum ClientError {
    // =========================================================================
    // Batch errors
    // =========================================================================
    /// Row or block does not match the column set
    #[error("invalid batch: {0}")]
    InvalidBatch(#[source] ProtocolError),

    /// Block has no rows
    #[error("cannot send an empty batch")]
    EmptyBatch,

    /// Column index out of range
    #[error("column index {index} out of range ({columns} columns)")]
    InvalidColumnIndex { index: usize, columns: usize },

    // =========================================================================
    // Sender errors
    // =========================================================================
    /// Terminal sender operation called twice
    #[error("{op} must be called only once")]
    AlreadySent { op: &'static str },

    /// Sender was aborted before sending
    #[error("batch aborted")]
    Aborted,

    /// Buffer was encoded for other connection settings
    #[error(
        "buffer encoded with {buffer_compression} at revision {buffer_revision}, \
         connection uses {compression} at revision {revision}"
    )]
    EncodingMismatch {
        buffer_compression: CompressionMethod,
        buffer_revision: u64,
        compression: CompressionMethod,
        revision: u64,
    },

    /// Context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// Context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // =========================================================================
    // Connection errors
    // =========================================================================
    /// Transport read or write failed
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Packet could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server sent an exception
    #[error("server exception: {0}")]
    Server(#[from] ServerException),

    /// Server sent a packet that is not valid at this point
    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket {
        expected: &'static str,
        got: ServerPacket,
    },

    /// Connection pool has been closed
    #[error("connection pool is closed")]
    PoolClosed,

    /// Dial did not complete in time
    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// Dial failed
    #[error("connection failed to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    /// Create an invalid batch error
    #[inline]
    pub fn invalid_batch(err: ProtocolError) -> Self {
        Self::InvalidBatch(err)
    }

    /// Create an unexpected packet error
    #[inline]
    pub fn unexpected(expected: &'static str, got: ServerPacket) -> Self {
        Self::UnexpectedPacket { expected, got }
    }

    /// Whether the error came from context cancellation or deadline
    #[inline]
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Whether the error is an I/O error that leaves the stream unusable
    pub fn is_fatal_io(&self) -> bool {
        match self {
            Self::Io(e) => is_fatal_io(e),
            _ => false,
        }
    }
}

/// Broken pipe and unexpected EOF mean the peer is gone
#[inline]
pub(crate) fn is_fatal_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}
