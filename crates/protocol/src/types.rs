//! Column types
//!
//! The subset of server column types this client can encode and decode,
//! parsed from and rendered back to their canonical type names.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::Result;

/// A column's wire type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Float32,
    Float64,
    Bool,
    String,
    /// Fixed-length binary string of `n` bytes
    FixedString(usize),
    /// Days since the Unix epoch, u16
    Date,
    /// Seconds since the Unix epoch, u32
    DateTime,
    Uuid,
    Nullable(Box<ColumnType>),
    Array(Box<ColumnType>),
}

impl ColumnType {
    /// Encoded width of one value, for fixed-width types
    pub fn fixed_width(&self) -> Option<usize> {
        Some(match self {
            Self::UInt8 | Self::Int8 | Self::Bool => 1,
            Self::UInt16 | Self::Int16 | Self::Date => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 | Self::DateTime => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
            Self::UInt128 | Self::Int128 | Self::Uuid => 16,
            Self::FixedString(n) => *n,
            Self::String | Self::Nullable(_) | Self::Array(_) => return None,
        })
    }

    /// Whether the type accepts `Value::Null`
    #[inline]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = unwrap_call(s, "Nullable") {
            let inner = Self::parse(inner)?;
            if matches!(inner, Self::Nullable(_) | Self::Array(_)) {
                return Err(ProtocolError::invalid_type(s));
            }
            return Ok(Self::Nullable(Box::new(inner)));
        }
        if let Some(inner) = unwrap_call(s, "Array") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }
        if let Some(size) = unwrap_call(s, "FixedString") {
            let n = size
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::invalid_type(s))?;
            if n == 0 {
                return Err(ProtocolError::invalid_type(s));
            }
            return Ok(Self::FixedString(n));
        }
        // Timezone only affects rendering; the wire value is the same u32
        if unwrap_call(s, "DateTime").is_some() {
            return Ok(Self::DateTime);
        }

        Ok(match s {
            "UInt8" => Self::UInt8,
            "UInt16" => Self::UInt16,
            "UInt32" => Self::UInt32,
            "UInt64" => Self::UInt64,
            "UInt128" => Self::UInt128,
            "Int8" => Self::Int8,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Int128" => Self::Int128,
            "Float32" => Self::Float32,
            "Float64" => Self::Float64,
            "Bool" | "Boolean" => Self::Bool,
            "String" => Self::String,
            "Date" => Self::Date,
            "DateTime" => Self::DateTime,
            "UUID" => Self::Uuid,
            _ => return Err(ProtocolError::invalid_type(s)),
        })
    }
}

/// Strip `Name(` ... `)` and return the inside
fn unwrap_call<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

impl FromStr for ColumnType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt8 => f.write_str("UInt8"),
            Self::UInt16 => f.write_str("UInt16"),
            Self::UInt32 => f.write_str("UInt32"),
            Self::UInt64 => f.write_str("UInt64"),
            Self::UInt128 => f.write_str("UInt128"),
            Self::Int8 => f.write_str("Int8"),
            Self::Int16 => f.write_str("Int16"),
            Self::Int32 => f.write_str("Int32"),
            Self::Int64 => f.write_str("Int64"),
            Self::Int128 => f.write_str("Int128"),
            Self::Float32 => f.write_str("Float32"),
            Self::Float64 => f.write_str("Float64"),
            Self::Bool => f.write_str("Bool"),
            Self::String => f.write_str("String"),
            Self::FixedString(n) => write!(f, "FixedString({n})"),
            Self::Date => f.write_str("Date"),
            Self::DateTime => f.write_str("DateTime"),
            Self::Uuid => f.write_str("UUID"),
            Self::Nullable(inner) => write!(f, "Nullable({inner})"),
            Self::Array(inner) => write!(f, "Array({inner})"),
        }
    }
}
