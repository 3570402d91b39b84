//! Sink-native values and row inserts.
//!
//! - [`NativeValue`]: a value already converted to its column's exact type
//! - [`RowInsert`]: one row destined for one table

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::collector::StoredType;

/// A value in the sink's native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
}

impl NativeValue {
    /// The zero sentinel of `stored_type`.
    ///
    /// Equals what a non-nullable column reports for rows written before the
    /// column existed, so a null and a missing value read back identically.
    pub fn zero(stored_type: StoredType) -> Self {
        match stored_type {
            StoredType::String => Self::String(String::new()),
            StoredType::Date => Self::Date(NaiveDate::default()),
            StoredType::DateTime => Self::DateTime(NaiveDateTime::default()),
            StoredType::UInt8 => Self::UInt8(0),
            StoredType::UInt16 => Self::UInt16(0),
            StoredType::UInt32 => Self::UInt32(0),
            StoredType::UInt64 => Self::UInt64(0),
            StoredType::Int8 => Self::Int8(0),
            StoredType::Int16 => Self::Int16(0),
            StoredType::Int32 => Self::Int32(0),
            StoredType::Int64 => Self::Int64(0),
            StoredType::Float32 => Self::Float32(0.0),
            StoredType::Float64 => Self::Float64(0.0),
            StoredType::Decimal => Self::Decimal(Decimal::ZERO),
        }
    }

    pub fn stored_type(&self) -> StoredType {
        match self {
            Self::String(_) => StoredType::String,
            Self::Date(_) => StoredType::Date,
            Self::DateTime(_) => StoredType::DateTime,
            Self::UInt8(_) => StoredType::UInt8,
            Self::UInt16(_) => StoredType::UInt16,
            Self::UInt32(_) => StoredType::UInt32,
            Self::UInt64(_) => StoredType::UInt64,
            Self::Int8(_) => StoredType::Int8,
            Self::Int16(_) => StoredType::Int16,
            Self::Int32(_) => StoredType::Int32,
            Self::Int64(_) => StoredType::Int64,
            Self::Float32(_) => StoredType::Float32,
            Self::Float64(_) => StoredType::Float64,
            Self::Decimal(_) => StoredType::Decimal,
        }
    }

    /// Render as a SQL literal suitable for a `VALUES` clause.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::String(s) => quote(s),
            Self::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            Self::UInt8(v) => v.to_string(),
            Self::UInt16(v) => v.to_string(),
            Self::UInt32(v) => v.to_string(),
            Self::UInt64(v) => v.to_string(),
            Self::Int8(v) => v.to_string(),
            Self::Int16(v) => v.to_string(),
            Self::Int32(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Float32(v) => float_literal(f64::from(*v)),
            Self::Float64(v) => float_literal(*v),
            Self::Decimal(v) => v.to_string(),
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => f.write_str(other.to_sql_literal().trim_matches('\'')),
        }
    }
}

/// Single-quote a string, escaping backslashes and quotes.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "nan".to_owned()
    } else if v == f64::INFINITY {
        "inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else {
        v.to_string()
    }
}

/// One row for one table, columns in batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowInsert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<NativeValue>,
}

impl RowInsert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append a column and its value.
    pub fn push(&mut self, column: impl Into<String>, value: NativeValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    pub fn get(&self, column: &str) -> Option<&NativeValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// `INSERT` statement for `database`.
    pub fn to_sql(&self, database: &str) -> String {
        let values = self
            .values
            .iter()
            .map(NativeValue::to_sql_literal)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {database}.{} ({}) VALUES ({values})",
            self.table,
            self.columns.join(", ")
        )
    }
}
