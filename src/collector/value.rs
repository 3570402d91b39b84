//! Metric values and their declared storage types.
//!
//! A [`MetricValue`] is one named scalar observed during a collection cycle.
//! Its [`StoredType`] is fixed when the producing collector is built and never
//! changes afterwards; the [`RawValue`] is whatever the producer handed back
//! before any coercion to the sink's column type.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Column holding the observation date (partition key).
pub const DT_COLUMN: &str = "dt";
/// Column holding the observation instant.
pub const TS_COLUMN: &str = "ts";
/// Column holding the monitored database name.
pub const DBNAME_COLUMN: &str = "dbname";
/// Column holding the monitored database host.
pub const DBHOST_COLUMN: &str = "dbhost";
/// Column holding the monitored database port.
pub const DBPORT_COLUMN: &str = "dbport";

/// Meta columns carried by every batch and every metric table, in table order.
pub const META_COLUMNS: [(&str, StoredType); 5] = [
    (DT_COLUMN, StoredType::Date),
    (TS_COLUMN, StoredType::DateTime),
    (DBNAME_COLUMN, StoredType::String),
    (DBHOST_COLUMN, StoredType::String),
    (DBPORT_COLUMN, StoredType::UInt16),
];

/// Returns true if `name` is one of the fixed meta columns.
pub fn is_meta_column(name: &str) -> bool {
    META_COLUMNS.iter().any(|(meta, _)| *meta == name)
}

/// Returns true if `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// Table, column and view names are interpolated into DDL unquoted, so
/// everything reaching the sink passes through this check.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Storage type declared for a metric.
///
/// Variant names match the sink's type names, so parsing accepts the same
/// spelling used in metric definition headers (case-insensitive).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum StoredType {
    String,
    Date,
    DateTime,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
}

impl StoredType {
    /// Every declarable storage type.
    pub const ALL: [StoredType; 14] = [
        Self::String,
        Self::Date,
        Self::DateTime,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
        Self::Decimal,
    ];

    /// Column type used when the sink creates a column of this kind.
    pub fn sink_type(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Decimal => "Decimal(38, 10)",
        }
    }

    /// True for the eight fixed-width integer kinds.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
        )
    }
}

/// Producer-native value, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Textual form of the raw value. `Null` renders as the empty string.
impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for RawValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Decimal> for RawValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One named, typed observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Column name in the destination table.
    pub name: String,
    /// Declared storage type.
    pub stored_type: StoredType,
    /// Value as produced, before coercion.
    pub raw: RawValue,
}

impl MetricValue {
    pub fn new(name: impl Into<String>, stored_type: StoredType, raw: impl Into<RawValue>) -> Self {
        Self {
            name: name.into(),
            stored_type,
            raw: raw.into(),
        }
    }
}
