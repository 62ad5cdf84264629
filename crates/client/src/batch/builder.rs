//! Batch builder
//!
//! Accumulates rows for one INSERT into a `Block`. The block's columns come
//! from the header block the server sends after the INSERT query, so every
//! appended row is validated against the table's real schema.
//!
//! # Example
//!
//! ```ignore
//! let (mut batch, mut sender) = client.prepare_batch(&ctx, "INSERT INTO events").await?;
//!
//! batch.append(vec![1u64.into(), "click".into()])?;
//! batch.append_struct(&event)?;
//!
//! let mut buf = BufferPool::global().acquire();
//! batch.build(&mut buf)?;
//! sender.send(&ctx, &buf).await?;
//! ```

use chbulk_protocol::packet::CLIENT_REVISION;
use chbulk_protocol::{Block, CompressionMethod, Row, Value};

use crate::batch::BatchColumn;
use crate::buffer::ChunkedBuffer;
use crate::connection::DEFAULT_MAX_COMPRESSION_BUFFER;
use crate::error::{ClientError, Result};

/// Builder for the rows of one INSERT
///
/// A builder is meant to be built once. Building it again encodes the same
/// rows a second time; the block is not reused across builds.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    block: Block,
    query: String,
    revision: u64,
    compression: CompressionMethod,
    max_chunk_bytes: usize,
}

impl BatchBuilder {
    /// Create a builder over `block`'s columns
    ///
    /// Any rows already in `block` are dropped. Defaults to the client's own
    /// revision, no compression and 10 MiB chunks.
    pub fn new(mut block: Block) -> Self {
        block.clear();
        Self {
            block,
            query: String::new(),
            revision: CLIENT_REVISION,
            compression: CompressionMethod::None,
            max_chunk_bytes: DEFAULT_MAX_COMPRESSION_BUFFER,
        }
    }

    /// Set the INSERT query the batch belongs to
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set the negotiated protocol revision
    #[inline]
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Set the chunk compression method
    #[inline]
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    /// Set the pre-compression chunk size threshold
    #[inline]
    #[must_use]
    pub fn with_max_chunk_bytes(mut self, max_chunk_bytes: usize) -> Self {
        self.max_chunk_bytes = max_chunk_bytes.max(1);
        self
    }

    // =========================================================================
    // Appending
    // =========================================================================

    /// Append one row, in column order
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if the arity or a value type does not match.
    /// The block is unchanged in that case.
    pub fn append(&mut self, row: Vec<Value>) -> Result<()> {
        self.block.append(row).map_err(ClientError::invalid_batch)
    }

    /// Append a record, matching its fields to columns by name
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if a column has no matching field or a value
    /// type does not match.
    pub fn append_struct<R: Row + ?Sized>(&mut self, row: &R) -> Result<()> {
        let values = row
            .map_to(&self.block.column_names())
            .map_err(ClientError::invalid_batch)?;
        self.append(values)
    }

    /// Columnar access to column `index`
    ///
    /// An out-of-range index yields a handle whose every operation fails
    /// with `InvalidColumnIndex`.
    pub fn column(&mut self, index: usize) -> BatchColumn<'_> {
        let columns = self.block.num_columns();
        match self.block.column_mut(index) {
            Some(column) => BatchColumn::new(column),
            None => BatchColumn::invalid(index, columns),
        }
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Encode the accumulated rows into `buf`
    ///
    /// # Errors
    ///
    /// Returns `EmptyBatch` if no rows were appended, or `InvalidBatch` if
    /// columnar appends left the columns with different lengths. `buf` is
    /// left reset on error.
    pub fn build(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        buf.try_init(
            &self.block,
            "",
            self.revision,
            self.max_chunk_bytes,
            self.compression,
            &self.query,
        )
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Rows appended so far
    #[inline]
    pub fn rows(&self) -> usize {
        self.block.rows()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.block.column_names()
    }

    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[inline]
    pub fn block(&self) -> &Block {
        &self.block
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    #[inline]
    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }
}
