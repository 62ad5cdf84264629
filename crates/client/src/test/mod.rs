//! Test doubles for the batch pipeline
//!
//! In-process stand-ins for the server side of an insert, used by this
//! crate's unit tests and its integration tests.
//!
//! - [`MockTransport`] - Scripted in-memory transport with injectable
//!   write failures and hanging writes
//! - [`ServerReplies`] - Builder for encoded server packets
//! - [`FakeServer`] - Loopback TCP server that collects inserted blocks
//!
//! # Example
//!
//! ```ignore
//! use chbulk_client::test::{ServerReplies, mock_connection};
//!
//! let replies = ServerReplies::new(CompressionMethod::Lz4).hello().insert(&header)?;
//! let (conn, handle) = mock_connection(replies, &ConnectionOptions::default()).await?;
//! // ... drive the connection, then inspect handle.writes()
//! ```

mod mock;

pub use mock::{MockDialer, MockHandle, MockTransport, mock_connection};
pub use replies::ServerReplies;
pub use server::{FakeServer, ReceivedInsert};
