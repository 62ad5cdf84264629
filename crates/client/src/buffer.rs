//! Chunked, compressed encoding of one Data packet
//!
//! `ChunkedBuffer` encodes a block as a complete Data packet and cuts the
//! encoded stream into chunks at column boundaries. With compression on,
//! every chunk's column bytes are replaced in place by a single compressed
//! frame, so each chunk can be written (and decompressed by the server)
//! independently. The server reassembles the frames into one block.
//!
//! # Layout
//!
//! ```text
//! chunk 0: [Data tag][stream name][frame: block header + columns 0..i]
//! chunk 1: [frame: columns i+1..j]
//! ...
//! ```
//!
//! The packet tag and stream name are never compressed. A column is never
//! split across chunks, even when it alone exceeds the chunk limit.

use chbulk_protocol::packet::ClientPacket;
use chbulk_protocol::{Block, CompressionMethod, Compressor, WireBuffer};

use crate::error::{ClientError, Result};

/// Reusable byte area holding one encoded, chunked Data packet
#[derive(Debug, Default)]
pub struct ChunkedBuffer {
    bytes: WireBuffer,
    /// Offset of each chunk's first byte; strictly increasing, `starts[0] == 0`
    starts: Vec<usize>,
    query: String,
    /// Encoding settings of the current contents; a sender checks them
    /// against its connection
    compression: CompressionMethod,
    revision: u64,
    compressor: Compressor,
}

impl ChunkedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: WireBuffer::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Forget the contents, keeping all allocations
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.starts.clear();
        self.query.clear();
    }

    /// Encode `block` as a Data packet for `stream_name`
    ///
    /// Columns are appended in order; whenever the bytes not yet compressed
    /// reach `max_chunk_bytes`, they are sealed into a chunk. On error the
    /// buffer is left reset and can be reused.
    pub fn try_init(
        &mut self,
        block: &Block,
        stream_name: &str,
        revision: u64,
        max_chunk_bytes: usize,
        compression: CompressionMethod,
        query: &str,
    ) -> Result<()> {
        self.reset();
        let result = self.encode(block, stream_name, revision, max_chunk_bytes, compression);
        match result {
            Ok(()) => {
                self.query.push_str(query);
                self.compression = compression;
                self.revision = revision;
                tracing::trace!(
                    rows = block.rows(),
                    chunks = self.starts.len(),
                    bytes = self.bytes.len(),
                    "batch encoded"
                );
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn encode(
        &mut self,
        block: &Block,
        stream_name: &str,
        revision: u64,
        max_chunk_bytes: usize,
        compression: CompressionMethod,
    ) -> Result<()> {
        if block.rows() == 0 {
            return Err(ClientError::EmptyBatch);
        }
        block.validate().map_err(ClientError::invalid_batch)?;

        self.bytes.put_uvarint(ClientPacket::Data.code());
        self.bytes.put_string(stream_name);

        let mut chunk_start = 0;
        let mut pending = self.bytes.len();

        block.encode_header(&mut self.bytes, revision);
        for index in 0..block.num_columns() {
            block.encode_column(&mut self.bytes, revision, index)?;
            if self.bytes.len() - pending >= max_chunk_bytes {
                pending = self.seal_chunk(chunk_start, pending, compression)?;
                chunk_start = pending;
            }
        }

        if self.bytes.len() > pending {
            self.seal_chunk(chunk_start, pending, compression)?;
        }
        Ok(())
    }

    /// Compress `[pending, len)` in place and record the chunk start
    ///
    /// Returns the new end of the buffer, where the next chunk begins.
    fn seal_chunk(
        &mut self,
        chunk_start: usize,
        pending: usize,
        compression: CompressionMethod,
    ) -> Result<usize> {
        if compression.is_enabled() {
            let frame = self.compressor.compress(compression, self.bytes.tail(pending))?;
            self.bytes.truncate(pending);
            self.bytes.put_raw(frame);
        }
        if self.starts.last() != Some(&chunk_start) {
            self.starts.push(chunk_start);
        }
        Ok(self.bytes.len())
    }

    /// INSERT query this buffer was built for
    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Compression the chunks were encoded with
    #[inline]
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    /// Protocol revision the block was encoded for
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of chunks; zero when uninitialized
    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.starts.len()
    }

    /// Bytes of chunk `index`
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        let start = *self.starts.get(index)?;
        let end = self
            .starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.bytes.len());
        Some(&self.bytes.as_slice()[start..end])
    }

    /// Chunks in write order
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.starts.len()).filter_map(|i| self.chunk(i))
    }

    /// Whole encoded packet (all chunks back to back)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Allocated capacity of the byte area
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }
}
