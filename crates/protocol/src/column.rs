//! Typed column storage with native encoding
//!
//! A `Column` owns one typed vector per leaf type. Appends are two-phase:
//! `check` validates a value against the column type without touching the
//! storage, and `push` only runs after every check passed. `Block::append`
//! relies on this to stay rectangular when a row is rejected.
//!
//! # Native layout
//!
//! | Type | Encoding |
//! |------|----------|
//! | integers, floats, Date, DateTime | fixed-width little-endian |
//! | Bool | one byte, 0 or 1 |
//! | String | uvarint length + bytes |
//! | FixedString(n) | n raw bytes, zero padded |
//! | UUID | high u64 LE, then low u64 LE |
//! | Nullable(T) | one null-map byte per row, then T with defaults for nulls |
//! | Array(T) | cumulative u64 LE end offsets per row, then flattened T |

use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::ColumnType;
use crate::value::Value;
use crate::wire::{WireBuffer, WireReader};
use crate::Result;

/// A named, typed column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    ty: ColumnType,
    data: ColumnData,
}

#[derive(Debug, Clone, PartialEq)]
enum ColumnData {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    UInt128(Vec<u128>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int128(Vec<i128>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    String(Vec<Vec<u8>>),
    FixedString { size: usize, data: Vec<u8> },
    Date(Vec<u16>),
    DateTime(Vec<u32>),
    Uuid(Vec<Uuid>),
    Nullable { nulls: Vec<u8>, inner: Box<ColumnData> },
    Array { offsets: Vec<u64>, inner: Box<ColumnData> },
}

impl Column {
    /// Create an empty column
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        let data = ColumnData::new(&ty);
        Self {
            name: name.into(),
            ty,
            data,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn column_type(&self) -> &ColumnType {
        &self.ty
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate a value against the column type without mutating
    pub fn check(&self, value: &Value) -> Result<()> {
        check_value(&self.name, &self.ty, value)
    }

    /// Append one value
    pub fn push(&mut self, value: Value) -> Result<()> {
        self.check(&value)?;
        self.data.push(&self.name, &self.ty, value)
    }

    /// Append many values; either all are appended or none
    pub fn extend(&mut self, values: Vec<Value>) -> Result<()> {
        for value in &values {
            self.check(value)?;
        }
        for value in values {
            self.data.push(&self.name, &self.ty, value)?;
        }
        Ok(())
    }

    /// Push a value that already passed `check`
    pub(crate) fn push_checked(&mut self, value: Value) -> Result<()> {
        self.data.push(&self.name, &self.ty, value)
    }

    /// Read back the value at `row`
    pub fn value(&self, row: usize) -> Option<Value> {
        if row >= self.len() {
            return None;
        }
        Some(self.data.value(row))
    }

    /// Remove all rows, keeping the type
    pub fn clear(&mut self) {
        self.data = ColumnData::new(&self.ty);
    }

    /// Write the column payload (no name or type header)
    pub fn encode(&self, buf: &mut WireBuffer) {
        self.data.encode(buf);
    }

    /// Read a column payload of `rows` rows
    pub fn decode(
        name: impl Into<String>,
        ty: ColumnType,
        rows: usize,
        reader: &mut WireReader<'_>,
    ) -> Result<Self> {
        let data = ColumnData::decode(&ty, rows, reader)?;
        Ok(Self {
            name: name.into(),
            ty,
            data,
        })
    }
}

// =============================================================================
// Value validation
// =============================================================================

fn check_value(column: &str, ty: &ColumnType, value: &Value) -> Result<()> {
    let mismatch = || ProtocolError::type_mismatch(column, ty, value);

    match (ty, value) {
        (ColumnType::Nullable(_), Value::Null) => Ok(()),
        (ColumnType::Nullable(inner), v) => check_value(column, inner, v),
        (ColumnType::Array(inner), Value::Array(items)) => {
            for item in items {
                check_value(column, inner, item)?;
            }
            Ok(())
        }
        (ColumnType::FixedString(size), v) => match string_bytes(v) {
            Some(b) if b.len() <= *size => Ok(()),
            Some(b) => Err(ProtocolError::FixedStringLength {
                column: column.to_owned(),
                size: *size,
                actual: b.len(),
            }),
            None => Err(mismatch()),
        },
        _ => {
            let ok = match ty {
                ColumnType::UInt8 => int_as::<u8>(value).is_some(),
                ColumnType::UInt16 => int_as::<u16>(value).is_some(),
                ColumnType::UInt32 => int_as::<u32>(value).is_some(),
                ColumnType::UInt64 => int_as::<u64>(value).is_some(),
                ColumnType::UInt128 => as_u128(value).is_some(),
                ColumnType::Int8 => int_as::<i8>(value).is_some(),
                ColumnType::Int16 => int_as::<i16>(value).is_some(),
                ColumnType::Int32 => int_as::<i32>(value).is_some(),
                ColumnType::Int64 => int_as::<i64>(value).is_some(),
                ColumnType::Int128 => int_as::<i128>(value).is_some(),
                ColumnType::Float32 => as_f32(value).is_some(),
                ColumnType::Float64 => as_f64(value).is_some(),
                ColumnType::Bool => matches!(value, Value::Bool(_)),
                ColumnType::String => string_bytes(value).is_some(),
                ColumnType::Date => as_date(value).is_some(),
                ColumnType::DateTime => as_datetime(value).is_some(),
                ColumnType::Uuid => as_uuid(value).is_some(),
                ColumnType::Nullable(_)
                | ColumnType::Array(_)
                | ColumnType::FixedString(_) => false,
            };
            if ok { Ok(()) } else { Err(mismatch()) }
        }
    }
}

/// Any integer value widened to i128
fn int_value(v: &Value) -> Option<i128> {
    Some(match v {
        Value::UInt8(x) => i128::from(*x),
        Value::UInt16(x) => i128::from(*x),
        Value::UInt32(x) => i128::from(*x),
        Value::UInt64(x) => i128::from(*x),
        Value::UInt128(x) => return i128::try_from(*x).ok(),
        Value::Int8(x) => i128::from(*x),
        Value::Int16(x) => i128::from(*x),
        Value::Int32(x) => i128::from(*x),
        Value::Int64(x) => i128::from(*x),
        Value::Int128(x) => *x,
        _ => return None,
    })
}

/// Integer value narrowed to `T` if it fits
fn int_as<T: TryFrom<i128>>(v: &Value) -> Option<T> {
    int_value(v).and_then(|i| T::try_from(i).ok())
}

fn as_u128(v: &Value) -> Option<u128> {
    match v {
        Value::UInt128(x) => Some(*x),
        other => int_as::<u128>(other),
    }
}

fn as_f32(v: &Value) -> Option<f32> {
    match v {
        Value::Float32(x) => Some(*x),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Float64(x) => Some(*x),
        Value::Float32(x) => Some(f64::from(*x)),
        _ => None,
    }
}

fn as_date(v: &Value) -> Option<u16> {
    match v {
        Value::Date(d) => Some(*d),
        other => int_as::<u16>(other),
    }
}

fn as_datetime(v: &Value) -> Option<u32> {
    match v {
        Value::DateTime(s) => Some(*s),
        other => int_as::<u32>(other),
    }
}

fn as_uuid(v: &Value) -> Option<Uuid> {
    match v {
        Value::Uuid(u) => Some(*u),
        Value::String(s) => Uuid::parse_str(s).ok(),
        _ => None,
    }
}

fn string_bytes(v: &Value) -> Option<&[u8]> {
    match v {
        Value::String(s) => Some(s.as_bytes()),
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

// =============================================================================
// Storage
// =============================================================================

macro_rules! push_scalar {
    ($vec:expr, $conv:expr, $column:expr, $ty:expr, $value:expr) => {{
        match $conv(&$value) {
            Some(x) => {
                $vec.push(x);
                Ok(())
            }
            None => Err(ProtocolError::type_mismatch($column, $ty, &$value)),
        }
    }};
}

impl ColumnData {
    fn new(ty: &ColumnType) -> Self {
        match ty {
            ColumnType::UInt8 => Self::UInt8(Vec::new()),
            ColumnType::UInt16 => Self::UInt16(Vec::new()),
            ColumnType::UInt32 => Self::UInt32(Vec::new()),
            ColumnType::UInt64 => Self::UInt64(Vec::new()),
            ColumnType::UInt128 => Self::UInt128(Vec::new()),
            ColumnType::Int8 => Self::Int8(Vec::new()),
            ColumnType::Int16 => Self::Int16(Vec::new()),
            ColumnType::Int32 => Self::Int32(Vec::new()),
            ColumnType::Int64 => Self::Int64(Vec::new()),
            ColumnType::Int128 => Self::Int128(Vec::new()),
            ColumnType::Float32 => Self::Float32(Vec::new()),
            ColumnType::Float64 => Self::Float64(Vec::new()),
            ColumnType::Bool => Self::Bool(Vec::new()),
            ColumnType::String => Self::String(Vec::new()),
            ColumnType::FixedString(size) => Self::FixedString {
                size: *size,
                data: Vec::new(),
            },
            ColumnType::Date => Self::Date(Vec::new()),
            ColumnType::DateTime => Self::DateTime(Vec::new()),
            ColumnType::Uuid => Self::Uuid(Vec::new()),
            ColumnType::Nullable(inner) => Self::Nullable {
                nulls: Vec::new(),
                inner: Box::new(Self::new(inner)),
            },
            ColumnType::Array(inner) => Self::Array {
                offsets: Vec::new(),
                inner: Box::new(Self::new(inner)),
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::UInt8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::UInt128(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Int128(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
            Self::FixedString { size, data } => data.len() / size,
            Self::Date(v) => v.len(),
            Self::DateTime(v) => v.len(),
            Self::Uuid(v) => v.len(),
            Self::Nullable { nulls, .. } => nulls.len(),
            Self::Array { offsets, .. } => offsets.len(),
        }
    }

    fn push(&mut self, column: &str, ty: &ColumnType, value: Value) -> Result<()> {
        match self {
            Self::UInt8(v) => push_scalar!(v, int_as::<u8>, column, ty, value),
            Self::UInt16(v) => push_scalar!(v, int_as::<u16>, column, ty, value),
            Self::UInt32(v) => push_scalar!(v, int_as::<u32>, column, ty, value),
            Self::UInt64(v) => push_scalar!(v, int_as::<u64>, column, ty, value),
            Self::UInt128(v) => push_scalar!(v, as_u128, column, ty, value),
            Self::Int8(v) => push_scalar!(v, int_as::<i8>, column, ty, value),
            Self::Int16(v) => push_scalar!(v, int_as::<i16>, column, ty, value),
            Self::Int32(v) => push_scalar!(v, int_as::<i32>, column, ty, value),
            Self::Int64(v) => push_scalar!(v, int_as::<i64>, column, ty, value),
            Self::Int128(v) => push_scalar!(v, int_as::<i128>, column, ty, value),
            Self::Float32(v) => push_scalar!(v, as_f32, column, ty, value),
            Self::Float64(v) => push_scalar!(v, as_f64, column, ty, value),
            Self::Date(v) => push_scalar!(v, as_date, column, ty, value),
            Self::DateTime(v) => push_scalar!(v, as_datetime, column, ty, value),
            Self::Uuid(v) => push_scalar!(v, as_uuid, column, ty, value),
            Self::Bool(v) => match value {
                Value::Bool(b) => {
                    v.push(b);
                    Ok(())
                }
                other => Err(ProtocolError::type_mismatch(column, ty, other)),
            },
            Self::String(v) => match value {
                Value::String(s) => {
                    v.push(s.into_bytes());
                    Ok(())
                }
                Value::Bytes(b) => {
                    v.push(b);
                    Ok(())
                }
                other => Err(ProtocolError::type_mismatch(column, ty, other)),
            },
            Self::FixedString { size, data } => {
                let Some(bytes) = string_bytes(&value) else {
                    return Err(ProtocolError::type_mismatch(column, ty, &value));
                };
                if bytes.len() > *size {
                    return Err(ProtocolError::FixedStringLength {
                        column: column.to_owned(),
                        size: *size,
                        actual: bytes.len(),
                    });
                }
                data.extend_from_slice(bytes);
                data.resize(data.len() + (*size - bytes.len()), 0);
                Ok(())
            }
            Self::Nullable { nulls, inner } => {
                let ColumnType::Nullable(inner_ty) = ty else {
                    return Err(ProtocolError::type_mismatch(column, ty, value));
                };
                if value.is_null() {
                    inner.push_default();
                    nulls.push(1);
                } else {
                    inner.push(column, inner_ty, value)?;
                    nulls.push(0);
                }
                Ok(())
            }
            Self::Array { offsets, inner } => {
                let ColumnType::Array(inner_ty) = ty else {
                    return Err(ProtocolError::type_mismatch(column, ty, value));
                };
                let items = match value {
                    Value::Array(items) => items,
                    other => return Err(ProtocolError::type_mismatch(column, ty, other)),
                };
                let count = items.len() as u64;
                for item in items {
                    inner.push(column, inner_ty, item)?;
                }
                let end = offsets.last().copied().unwrap_or(0) + count;
                offsets.push(end);
                Ok(())
            }
        }
    }

    /// Append the type's zero value (backing slot for a null)
    fn push_default(&mut self) {
        match self {
            Self::UInt8(v) => v.push(0),
            Self::UInt16(v) => v.push(0),
            Self::UInt32(v) => v.push(0),
            Self::UInt64(v) => v.push(0),
            Self::UInt128(v) => v.push(0),
            Self::Int8(v) => v.push(0),
            Self::Int16(v) => v.push(0),
            Self::Int32(v) => v.push(0),
            Self::Int64(v) => v.push(0),
            Self::Int128(v) => v.push(0),
            Self::Float32(v) => v.push(0.0),
            Self::Float64(v) => v.push(0.0),
            Self::Bool(v) => v.push(false),
            Self::String(v) => v.push(Vec::new()),
            Self::FixedString { size, data } => data.resize(data.len() + *size, 0),
            Self::Date(v) => v.push(0),
            Self::DateTime(v) => v.push(0),
            Self::Uuid(v) => v.push(Uuid::nil()),
            Self::Nullable { nulls, inner } => {
                inner.push_default();
                nulls.push(1);
            }
            Self::Array { offsets, .. } => {
                let end = offsets.last().copied().unwrap_or(0);
                offsets.push(end);
            }
        }
    }

    fn value(&self, row: usize) -> Value {
        match self {
            Self::UInt8(v) => Value::UInt8(v[row]),
            Self::UInt16(v) => Value::UInt16(v[row]),
            Self::UInt32(v) => Value::UInt32(v[row]),
            Self::UInt64(v) => Value::UInt64(v[row]),
            Self::UInt128(v) => Value::UInt128(v[row]),
            Self::Int8(v) => Value::Int8(v[row]),
            Self::Int16(v) => Value::Int16(v[row]),
            Self::Int32(v) => Value::Int32(v[row]),
            Self::Int64(v) => Value::Int64(v[row]),
            Self::Int128(v) => Value::Int128(v[row]),
            Self::Float32(v) => Value::Float32(v[row]),
            Self::Float64(v) => Value::Float64(v[row]),
            Self::Bool(v) => Value::Bool(v[row]),
            Self::String(v) => match String::from_utf8(v[row].clone()) {
                Ok(s) => Value::String(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            },
            Self::FixedString { size, data } => {
                Value::Bytes(data[row * size..(row + 1) * size].to_vec())
            }
            Self::Date(v) => Value::Date(v[row]),
            Self::DateTime(v) => Value::DateTime(v[row]),
            Self::Uuid(v) => Value::Uuid(v[row]),
            Self::Nullable { nulls, inner } => {
                if nulls[row] != 0 {
                    Value::Null
                } else {
                    inner.value(row)
                }
            }
            Self::Array { offsets, inner } => {
                let start = match row {
                    0 => 0,
                    _ => offsets[row - 1] as usize,
                };
                let end = offsets[row] as usize;
                Value::Array((start..end).map(|i| inner.value(i)).collect())
            }
        }
    }

    fn encode(&self, buf: &mut WireBuffer) {
        match self {
            Self::UInt8(v) => buf.put_raw(v),
            Self::UInt16(v) => v.iter().for_each(|x| buf.put_u16(*x)),
            Self::UInt32(v) => v.iter().for_each(|x| buf.put_u32(*x)),
            Self::UInt64(v) => v.iter().for_each(|x| buf.put_u64(*x)),
            Self::UInt128(v) => v.iter().for_each(|x| buf.put_u128(*x)),
            Self::Int8(v) => v.iter().for_each(|x| buf.put_i8(*x)),
            Self::Int16(v) => v.iter().for_each(|x| buf.put_i16(*x)),
            Self::Int32(v) => v.iter().for_each(|x| buf.put_i32(*x)),
            Self::Int64(v) => v.iter().for_each(|x| buf.put_i64(*x)),
            Self::Int128(v) => v.iter().for_each(|x| buf.put_i128(*x)),
            Self::Float32(v) => v.iter().for_each(|x| buf.put_f32(*x)),
            Self::Float64(v) => v.iter().for_each(|x| buf.put_f64(*x)),
            Self::Bool(v) => v.iter().for_each(|x| buf.put_bool(*x)),
            Self::String(v) => v.iter().for_each(|x| buf.put_bytes(x)),
            Self::FixedString { data, .. } => buf.put_raw(data),
            Self::Date(v) => v.iter().for_each(|x| buf.put_u16(*x)),
            Self::DateTime(v) => v.iter().for_each(|x| buf.put_u32(*x)),
            Self::Uuid(v) => v.iter().for_each(|u| {
                let (hi, lo) = u.as_u64_pair();
                buf.put_u64(hi);
                buf.put_u64(lo);
            }),
            Self::Nullable { nulls, inner } => {
                buf.put_raw(nulls);
                inner.encode(buf);
            }
            Self::Array { offsets, inner } => {
                offsets.iter().for_each(|x| buf.put_u64(*x));
                inner.encode(buf);
            }
        }
    }

    fn decode(ty: &ColumnType, rows: usize, r: &mut WireReader<'_>) -> Result<Self> {
        fn many<'a, T>(
            rows: usize,
            r: &mut WireReader<'a>,
            mut get: impl FnMut(&mut WireReader<'a>) -> Result<T>,
        ) -> Result<Vec<T>> {
            let mut out = Vec::with_capacity(rows.min(1 << 16));
            for _ in 0..rows {
                out.push(get(r)?);
            }
            Ok(out)
        }

        Ok(match ty {
            ColumnType::UInt8 => Self::UInt8(r.get_raw(rows)?.to_vec()),
            ColumnType::UInt16 => Self::UInt16(many(rows, r, WireReader::get_u16)?),
            ColumnType::UInt32 => Self::UInt32(many(rows, r, WireReader::get_u32)?),
            ColumnType::UInt64 => Self::UInt64(many(rows, r, WireReader::get_u64)?),
            ColumnType::UInt128 => Self::UInt128(many(rows, r, WireReader::get_u128)?),
            ColumnType::Int8 => Self::Int8(many(rows, r, WireReader::get_i8)?),
            ColumnType::Int16 => Self::Int16(many(rows, r, WireReader::get_i16)?),
            ColumnType::Int32 => Self::Int32(many(rows, r, WireReader::get_i32)?),
            ColumnType::Int64 => Self::Int64(many(rows, r, WireReader::get_i64)?),
            ColumnType::Int128 => Self::Int128(many(rows, r, WireReader::get_i128)?),
            ColumnType::Float32 => Self::Float32(many(rows, r, WireReader::get_f32)?),
            ColumnType::Float64 => Self::Float64(many(rows, r, WireReader::get_f64)?),
            ColumnType::Bool => Self::Bool(many(rows, r, WireReader::get_bool)?),
            ColumnType::String => {
                Self::String(many(rows, r, |r| r.get_bytes().map(<[u8]>::to_vec))?)
            }
            ColumnType::FixedString(size) => {
                let len = rows
                    .checked_mul(*size)
                    .ok_or(ProtocolError::LengthOverflow(rows as u64))?;
                Self::FixedString {
                    size: *size,
                    data: r.get_raw(len)?.to_vec(),
                }
            }
            ColumnType::Date => Self::Date(many(rows, r, WireReader::get_u16)?),
            ColumnType::DateTime => Self::DateTime(many(rows, r, WireReader::get_u32)?),
            ColumnType::Uuid => Self::Uuid(many(rows, r, |r| {
                let hi = r.get_u64()?;
                let lo = r.get_u64()?;
                Ok(Uuid::from_u64_pair(hi, lo))
            })?),
            ColumnType::Nullable(inner) => {
                let nulls = r.get_raw(rows)?.to_vec();
                let inner = Self::decode(inner, rows, r)?;
                Self::Nullable {
                    nulls,
                    inner: Box::new(inner),
                }
            }
            ColumnType::Array(inner) => {
                let offsets = many(rows, r, WireReader::get_u64)?;
                let total = offsets.last().copied().unwrap_or(0);
                let total =
                    usize::try_from(total).map_err(|_| ProtocolError::LengthOverflow(total))?;
                let inner = Self::decode(inner, total, r)?;
                Self::Array {
                    offsets,
                    inner: Box::new(inner),
                }
            }
        })
    }
}
