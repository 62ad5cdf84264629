//! Columnar blocks
//!
//! A `Block` is an ordered set of named, typed columns with equal row
//! counts. It is the unit the server exchanges in Data packets.
//!
//! # Native layout
//!
//! ```text
//! [block info]          only when revision >= 51903
//!   uvarint 1, u8  is_overflows (0)
//!   uvarint 2, i32 bucket_num   (-1)
//!   uvarint 0
//! uvarint column count
//! uvarint row count
//! per column:
//!   string name
//!   string type name
//!   u8 custom serialization (0)   only when revision >= 54454
//!   column payload
//! ```

use crate::column::Column;
use crate::compress::decompress_frame_into;
use crate::error::ProtocolError;
use crate::packet::{REVISION_WITH_BLOCK_INFO, REVISION_WITH_CUSTOM_SERIALIZATION};
use crate::types::ColumnType;
use crate::value::Value;
use crate::wire::{WireBuffer, WireReader};
use crate::Result;

/// Ordered set of equal-length columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    columns: Vec<Column>,
}

impl Block {
    /// Create an empty block with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty block from a column list
    pub fn with_schema<I, S>(schema: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut block = Self::new();
        for (name, ty) in schema {
            block.add_column(name, ty)?;
        }
        Ok(block)
    }

    /// Add an empty column
    ///
    /// Columns can only be added while the block holds no rows.
    pub fn add_column(&mut self, name: impl Into<String>, ty: ColumnType) -> Result<()> {
        let name = name.into();
        if self.columns.iter().any(|c| c.name() == name) {
            return Err(ProtocolError::DuplicateColumn(name));
        }
        let rows = self.rows();
        if rows > 0 {
            return Err(ProtocolError::RaggedBlock {
                column: name,
                expected: rows,
                actual: 0,
            });
        }
        self.columns.push(Column::new(name, ty));
        Ok(())
    }

    /// Append one row
    ///
    /// Arity and every value are checked before any column is touched, so a
    /// rejected row leaves the block unchanged.
    pub fn append(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ProtocolError::ColumnCount {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (column, value) in self.columns.iter().zip(&row) {
            column.check(value)?;
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push_checked(value)?;
        }
        Ok(())
    }

    /// Number of rows (taken from the first column)
    #[inline]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the block holds no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[inline]
    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    /// Check that every column holds the same number of rows
    pub fn validate(&self) -> Result<()> {
        let expected = self.rows();
        for column in &self.columns {
            if column.len() != expected {
                return Err(ProtocolError::RaggedBlock {
                    column: column.name().to_owned(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        Ok(())
    }

    /// Read back row `index` across all columns
    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        self.columns.iter().map(|c| c.value(index)).collect()
    }

    /// Column names and types
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name().to_owned(), c.column_type().clone()))
            .collect()
    }

    /// Drop all rows, keeping the columns
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Write the block info and the column and row counts
    pub fn encode_header(&self, buf: &mut WireBuffer, revision: u64) {
        if revision >= REVISION_WITH_BLOCK_INFO {
            buf.put_uvarint(1);
            buf.put_u8(0);
            buf.put_uvarint(2);
            buf.put_i32(-1);
            buf.put_uvarint(0);
        }
        buf.put_uvarint(self.columns.len() as u64);
        buf.put_uvarint(self.rows() as u64);
    }

    /// Write column `index`: name, type, then its payload
    pub fn encode_column(&self, buf: &mut WireBuffer, revision: u64, index: usize) -> Result<()> {
        let column = self.columns.get(index).ok_or(ProtocolError::ColumnIndex {
            index,
            columns: self.columns.len(),
        })?;
        buf.put_string(column.name());
        buf.put_string(&column.column_type().to_string());
        if revision >= REVISION_WITH_CUSTOM_SERIALIZATION {
            buf.put_u8(0);
        }
        column.encode(buf);
        Ok(())
    }

    /// Write the whole block
    pub fn encode(&self, buf: &mut WireBuffer, revision: u64) -> Result<()> {
        self.encode_header(buf, revision);
        for index in 0..self.columns.len() {
            self.encode_column(buf, revision, index)?;
        }
        Ok(())
    }

    /// Read a block written by `encode`
    pub fn decode(reader: &mut WireReader<'_>, revision: u64) -> Result<Self> {
        if revision >= REVISION_WITH_BLOCK_INFO {
            loop {
                match reader.get_uvarint()? {
                    0 => break,
                    1 => {
                        reader.get_u8()?;
                    }
                    2 => {
                        reader.get_i32()?;
                    }
                    other => {
                        return Err(ProtocolError::invalid_type(format!(
                            "block info field {other}"
                        )));
                    }
                }
            }
        }

        let num_columns = read_len(reader)?;
        let rows = read_len(reader)?;

        let mut columns = Vec::with_capacity(num_columns.min(1024));
        for _ in 0..num_columns {
            let name = reader.get_string()?;
            let ty: ColumnType = reader.get_string()?.parse()?;
            if revision >= REVISION_WITH_CUSTOM_SERIALIZATION && reader.get_u8()? != 0 {
                return Err(ProtocolError::invalid_type(format!(
                    "custom serialization for column '{name}'"
                )));
            }
            columns.push(Column::decode(name, ty, rows, reader)?);
        }

        Ok(Self { columns })
    }
}

impl Block {
    /// Read a block carried in compressed frames
    ///
    /// Frames are decompressed one at a time until the accumulated bytes
    /// hold a complete block, so a block split at any column boundary
    /// decodes the same as one sent in a single frame.
    pub fn decode_compressed(reader: &mut WireReader<'_>, revision: u64) -> Result<Self> {
        let mut raw = Vec::new();
        loop {
            let consumed = decompress_frame_into(reader.rest(), &mut raw)?;
            reader.get_raw(consumed)?;
            match Self::decode(&mut WireReader::new(&raw), revision) {
                Ok(block) => return Ok(block),
                Err(e) if e.is_eof() => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn read_len(reader: &mut WireReader<'_>) -> Result<usize> {
    let n = reader.get_uvarint()?;
    usize::try_from(n).map_err(|_| ProtocolError::LengthOverflow(n))
}
