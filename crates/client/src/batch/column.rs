//! Columnar append handle

use chbulk_protocol::{Column, ColumnType, Value};

use crate::error::{ClientError, Result};

/// Write access to one column of a batch
///
/// Obtained from `BatchBuilder::column`. When the index was out of range the
/// handle carries that error instead, and every method returns it, so calls
/// can be chained without checking the index first.
///
/// Columnar appends do not keep the other columns in step; `build` rejects
/// a batch whose columns end up with different lengths.
#[derive(Debug)]
pub struct BatchColumn<'a> {
    inner: std::result::Result<&'a mut Column, (usize, usize)>,
}

impl<'a> BatchColumn<'a> {
    pub(crate) fn new(column: &'a mut Column) -> Self {
        Self { inner: Ok(column) }
    }

    pub(crate) fn invalid(index: usize, columns: usize) -> Self {
        Self {
            inner: Err((index, columns)),
        }
    }

    fn column(&self) -> Result<&Column> {
        match &self.inner {
            Ok(column) => Ok(&**column),
            Err((index, columns)) => Err(ClientError::InvalidColumnIndex {
                index: *index,
                columns: *columns,
            }),
        }
    }

    fn column_mut(&mut self) -> Result<&mut Column> {
        match &mut self.inner {
            Ok(column) => Ok(&mut **column),
            Err((index, columns)) => Err(ClientError::InvalidColumnIndex {
                index: *index,
                columns: *columns,
            }),
        }
    }

    /// Whether the handle points at a real column
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.inner.is_ok()
    }

    pub fn name(&self) -> Result<&str> {
        self.column().map(Column::name)
    }

    pub fn column_type(&self) -> Result<&ColumnType> {
        self.column().map(Column::column_type)
    }

    pub fn len(&self) -> Result<usize> {
        self.column().map(Column::len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.column().map(Column::is_empty)
    }

    /// Append one value
    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        self.column_mut()?
            .push(value.into())
            .map_err(ClientError::invalid_batch)
    }

    /// Append many values; either all are appended or none
    pub fn extend<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.column_mut()?
            .extend(values)
            .map_err(ClientError::invalid_batch)
    }
}
