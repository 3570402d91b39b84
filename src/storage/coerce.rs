//! Conversion of raw metric values into their declared column types.
//!
//! | declared     | accepted raw values                                   |
//! |--------------|-------------------------------------------------------|
//! | integer kind | bool, integer, float/decimal (truncated), integer text |
//! | float kind   | bool, integer, float, decimal, numeric text           |
//! | `Decimal`    | bool, integer, finite float, decimal, numeric text    |
//! | `String`     | anything (textual form)                               |
//! | `Date`       | date, date-time (date part), `YYYY-MM-DD` text        |
//! | `DateTime`   | date-time, date (midnight), `YYYY-MM-DD hh:mm:ss` text |
//!
//! A null raw value becomes the zero sentinel of the declared type.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::{MetricValue, RawValue, StoredType};
use crate::storage::error::StoreError;
use crate::storage::types::NativeValue;

/// Scale of the sink's `Decimal(38, 10)` columns.
const DECIMAL_SCALE: u32 = 10;

/// Digits left of the point in a `Decimal(38, 10)` column.
const DECIMAL_INTEGER_DIGITS: u32 = 38 - DECIMAL_SCALE;

/// What to do with a value that does not fit its declared type.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MismatchPolicy {
    /// Fail the whole batch.
    #[default]
    Reject,
    /// Store the zero sentinel and log a warning.
    Substitute,
}

/// Convert `value` to its declared type.
///
/// # Errors
/// `StoreError::TypeMismatch` when the raw value is not representable.
pub fn coerce(value: &MetricValue) -> Result<NativeValue, StoreError> {
    let kind = value.stored_type;
    if value.raw.is_null() {
        return Ok(NativeValue::zero(kind));
    }

    let converted = match kind {
        StoredType::String => Some(NativeValue::String(value.raw.to_string())),
        StoredType::Date => to_date(&value.raw).map(NativeValue::Date),
        StoredType::DateTime => to_datetime(&value.raw).map(NativeValue::DateTime),
        StoredType::Float32 => to_f64(&value.raw)
            .filter(|v| !v.is_finite() || v.abs() <= f64::from(f32::MAX))
            .map(|v| NativeValue::Float32(v as f32)),
        StoredType::Float64 => to_f64(&value.raw).map(NativeValue::Float64),
        StoredType::Decimal => to_decimal(&value.raw).map(NativeValue::Decimal),
        integer if integer.is_integer() => to_i128(&value.raw).and_then(|v| narrow(v, integer)),
        _ => None,
    };

    converted.ok_or_else(|| StoreError::TypeMismatch {
        name: value.name.clone(),
        stored_type: kind,
        value: value.raw.to_string(),
    })
}

/// [`coerce`] under `policy`.
pub fn coerce_with_policy(
    value: &MetricValue,
    policy: MismatchPolicy,
) -> Result<NativeValue, StoreError> {
    match (coerce(value), policy) {
        (Ok(native), _) => Ok(native),
        (Err(err), MismatchPolicy::Substitute) => {
            tracing::warn!(metric = %value.name, error = %err, "Substituting zero for unrepresentable value");
            Ok(NativeValue::zero(value.stored_type))
        }
        (Err(err), MismatchPolicy::Reject) => Err(err),
    }
}

fn to_i128(raw: &RawValue) -> Option<i128> {
    match raw {
        RawValue::Bool(b) => Some(i128::from(*b)),
        RawValue::Int(v) => Some(i128::from(*v)),
        RawValue::Float(v) if v.is_finite() => Some(v.trunc() as i128),
        RawValue::Decimal(d) => d.trunc().to_i128(),
        RawValue::Text(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}

fn narrow(v: i128, kind: StoredType) -> Option<NativeValue> {
    let native = match kind {
        StoredType::UInt8 => NativeValue::UInt8(u8::try_from(v).ok()?),
        StoredType::UInt16 => NativeValue::UInt16(u16::try_from(v).ok()?),
        StoredType::UInt32 => NativeValue::UInt32(u32::try_from(v).ok()?),
        StoredType::UInt64 => NativeValue::UInt64(u64::try_from(v).ok()?),
        StoredType::Int8 => NativeValue::Int8(i8::try_from(v).ok()?),
        StoredType::Int16 => NativeValue::Int16(i16::try_from(v).ok()?),
        StoredType::Int32 => NativeValue::Int32(i32::try_from(v).ok()?),
        StoredType::Int64 => NativeValue::Int64(i64::try_from(v).ok()?),
        _ => return None,
    };
    Some(native)
}

fn to_f64(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Bool(b) => Some(f64::from(u8::from(*b))),
        RawValue::Int(v) => Some(*v as f64),
        RawValue::Float(v) => Some(*v),
        RawValue::Decimal(d) => d.to_f64(),
        RawValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn to_decimal(raw: &RawValue) -> Option<Decimal> {
    let decimal = match raw {
        RawValue::Bool(b) => Decimal::from(u8::from(*b)),
        RawValue::Int(v) => Decimal::from(*v),
        RawValue::Float(v) => Decimal::from_f64(*v)?,
        RawValue::Decimal(d) => *d,
        RawValue::Text(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()?
        }
        _ => return None,
    };
    let decimal = decimal.round_dp(DECIMAL_SCALE);
    let bound = Decimal::from_i128_with_scale(10_i128.pow(DECIMAL_INTEGER_DIGITS), 0);
    (decimal.abs() < bound).then_some(decimal)
}

fn to_date(raw: &RawValue) -> Option<NaiveDate> {
    match raw {
        RawValue::Date(d) => Some(*d),
        RawValue::DateTime(dt) => Some(dt.date()),
        RawValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

fn to_datetime(raw: &RawValue) -> Option<NaiveDateTime> {
    match raw {
        RawValue::DateTime(dt) => Some(*dt),
        RawValue::Date(d) => d.and_hms_opt(0, 0, 0),
        RawValue::Text(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        }
        _ => None,
    }
}
