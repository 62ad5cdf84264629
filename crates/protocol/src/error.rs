//! Protocol error types
//!
//! Errors that can occur when encoding, decoding or validating native
//! protocol data.

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input ended before a complete value could be read
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Type name could not be parsed
    #[error("invalid column type: {0}")]
    InvalidType(String),

    /// Row has the wrong number of values
    #[error("expected {expected} values per row, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    /// Value does not fit the column type
    #[error("column '{column}' ({ty}): cannot append {value}")]
    TypeMismatch {
        column: String,
        ty: String,
        value: String,
    },

    /// FixedString value has the wrong length
    #[error("column '{column}': FixedString({size}) cannot hold {actual} bytes")]
    FixedStringLength {
        column: String,
        size: usize,
        actual: usize,
    },

    /// Column name is not part of the block
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Column name appears twice in a block
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    /// Record field required by the block is missing
    #[error("missing value for column '{0}'")]
    MissingField(String),

    /// Columns hold different numbers of rows
    #[error("ragged block: column '{column}' has {actual} rows, expected {expected}")]
    RaggedBlock {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// Column index is out of range
    #[error("column index {index} out of range ({columns} columns)")]
    ColumnIndex { index: usize, columns: usize },

    /// Compressed frame uses an unknown method byte
    #[error("unknown compression method 0x{0:02x}")]
    UnknownCompressionMethod(u8),

    /// Compressed frame failed its checksum
    #[error("checksum mismatch in compressed frame")]
    ChecksumMismatch,

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// String is not valid UTF-8
    #[error("invalid utf-8 in string value")]
    InvalidUtf8,

    /// Unknown packet code received
    #[error("unknown server packet code {0}")]
    UnknownPacket(u64),

    /// Length does not fit the platform
    #[error("length {0} exceeds platform limits")]
    LengthOverflow(u64),
}

impl ProtocolError {
    /// Create an invalid type error
    #[inline]
    pub fn invalid_type(name: impl Into<String>) -> Self {
        Self::InvalidType(name.into())
    }

    /// Create a type mismatch error
    #[inline]
    pub fn type_mismatch(
        column: impl Into<String>,
        ty: impl ToString,
        value: impl std::fmt::Debug,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            ty: ty.to_string(),
            value: format!("{value:?}"),
        }
    }

    /// Create a compression error
    #[inline]
    pub fn compression(msg: impl ToString) -> Self {
        Self::Compression(msg.to_string())
    }

    /// Check whether more input would let decoding succeed
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof)
    }
}
