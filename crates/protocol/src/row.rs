//! Struct-to-row mapping
//!
//! `Row` lets a record type be appended by column name instead of by
//! position. Implementors describe their fields once; `map_to` reorders them
//! to match a block's columns. Fields without a matching column are ignored.

use crate::error::ProtocolError;
use crate::value::Value;
use crate::Result;

/// A record that can be appended to a block by column name
///
/// ```
/// use chbulk_protocol::{Row, Value};
///
/// struct Event {
///     id: u64,
///     name: String,
/// }
///
/// impl Row for Event {
///     fn fields(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("name", self.name.clone().into())]
///     }
/// }
///
/// let row = Event { id: 7, name: "click".into() }.map_to(&["name", "id"]).unwrap();
/// assert_eq!(row, vec![Value::from("click"), Value::from(7u64)]);
/// ```
pub trait Row {
    /// Field names and values, in any order
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// Values ordered to match `columns`
    ///
    /// Fails with `ProtocolError::MissingField` if a column has no field.
    fn map_to(&self, columns: &[&str]) -> Result<Vec<Value>> {
        let mut fields = self.fields();
        columns
            .iter()
            .map(|column| {
                let pos = fields
                    .iter()
                    .position(|(name, _)| name == column)
                    .ok_or_else(|| ProtocolError::MissingField((*column).to_owned()))?;
                Ok(fields.swap_remove(pos).1)
            })
            .collect()
    }
}
