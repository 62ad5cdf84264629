//! chbulk protocol - Native wire format for bulk inserts
//!
//! This crate provides the types a bulk insert puts on the wire:
//! - `WireBuffer` / `WireReader` - Little-endian and varint primitives
//! - `ColumnType` / `Value` - Supported column types and cell values
//! - `Column` / `Block` - Typed columnar storage and the native block codec
//! - `Compressor` - Checksummed LZ4/ZSTD frame codec
//! - `packet` - Packet codes, revision gates and handshake/query packets
//! - `Row` - Struct-to-row mapping by column name
//!
//! # Design Principles
//!
//! - **Validate before mutate**: a rejected row never leaves a block ragged
//! - **Reusable buffers**: encoders write into caller-owned buffers that keep
//!   their allocation across resets
//! - **Revision-aware**: every optional field is gated on the negotiated
//!   protocol revision

mod block;
mod column;
mod compress;
mod error;
mod row;
mod types;
mod value;
mod wire;

pub mod packet;

pub use block::Block;
pub use column::Column;
pub use compress::{
    CHECKSUM_SIZE, CompressionMethod, Compressor, FRAME_OVERHEAD, HEADER_SIZE,
    decompress_frame_into, decompress_stream,
};
pub use error::ProtocolError;
pub use packet::{ClientPacket, ServerException, ServerPacket};
pub use row::Row;
pub use types::ColumnType;
pub use value::Value;
pub use wire::{WireBuffer, WireReader};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod row_test;
