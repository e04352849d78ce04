//! Typed values held by devices, datastores and predicate literals

use crate::error::HubError;
use leaf_protocol::Format;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A scalar value with a format tag
///
/// Values are replaced wholesale when their owner changes; comparing or
/// combining two values requires them to share a format. Numbers are
/// decimals and keep the scale they were written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "value")]
pub enum Value {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "number")]
    Number(Decimal),
    #[serde(rename = "number+units")]
    NumberWithUnits { value: Decimal, units: String },
    #[serde(rename = "bool")]
    Boolean(bool),
}

impl Value {
    /// Format tag of this value
    #[must_use]
    pub fn format(&self) -> Format {
        match self {
            Value::String(_) => Format::String,
            Value::Number(_) => Format::Number,
            Value::NumberWithUnits { .. } => Format::NumberWithUnits,
            Value::Boolean(_) => Format::Bool,
        }
    }

    /// Units of a number+units value
    #[must_use]
    pub fn units(&self) -> Option<&str> {
        match self {
            Value::NumberWithUnits { units, .. } => Some(units),
            _ => None,
        }
    }

    /// Read a raw JSON value as the given format
    #[allow(clippy::missing_errors_doc)]
    pub fn from_json(format: Format, raw: &JsonValue, units: Option<&str>) -> Result<Self, HubError> {
        let invalid = || HubError::InvalidValue {
            format,
            value: raw.to_string(),
        };

        match format {
            Format::String => raw
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(invalid),
            Format::Bool => raw.as_bool().map(Value::Boolean).ok_or_else(invalid),
            Format::Number => parse_number(raw).map(Value::Number).ok_or_else(invalid),
            Format::NumberWithUnits => parse_number(raw)
                .map(|value| Value::NumberWithUnits {
                    value,
                    units: units.unwrap_or_default().to_string(),
                })
                .ok_or_else(invalid),
        }
    }

    /// Read a literal whose format is implied by its JSON type
    #[allow(clippy::missing_errors_doc)]
    pub fn from_literal(raw: &JsonValue) -> Result<Self, HubError> {
        match raw {
            JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Number(_) => Value::from_json(Format::Number, raw, None),
            other => Err(HubError::InvalidValue {
                format: Format::String,
                value: other.to_string(),
            }),
        }
    }

    /// JSON form of the bare value, without format or units
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Number(n) | Value::NumberWithUnits { value: n, .. } => number_json(n),
            Value::Boolean(b) => JsonValue::Bool(*b),
        }
    }

    /// Adapt a literal to the format of the slot it will be compared with
    /// or written to. Only a plain number may gain units; every other
    /// disagreement is a [`HubError::FormatMismatch`].
    #[allow(clippy::missing_errors_doc)]
    pub fn coerce_to(self, format: Format, units: Option<&str>) -> Result<Self, HubError> {
        match (self, format) {
            (Value::Number(value), Format::NumberWithUnits) => Ok(Value::NumberWithUnits {
                value,
                units: units.unwrap_or_default().to_string(),
            }),
            (value, format) if value.format() == format => Ok(value),
            (value, format) => Err(HubError::FormatMismatch {
                expected: format,
                found: value.format(),
            }),
        }
    }

    /// Order two values of the same format
    ///
    /// Strings order lexicographically, `false < true`, and number+units
    /// values compare by magnitude only.
    #[allow(clippy::missing_errors_doc)]
    pub fn compare(&self, other: &Value) -> Result<Ordering, HubError> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Number(a), Value::Number(b))
            | (
                Value::NumberWithUnits { value: a, .. },
                Value::NumberWithUnits { value: b, .. },
            ) => Ok(a.cmp(b)),
            _ => Err(HubError::FormatMismatch {
                expected: self.format(),
                found: other.format(),
            }),
        }
    }

    /// Exact decimal sum; the result keeps the units of `self`
    #[allow(clippy::missing_errors_doc)]
    pub fn add(&self, delta: &Value) -> Result<Value, HubError> {
        let mismatch = || HubError::FormatMismatch {
            expected: self.format(),
            found: delta.format(),
        };
        let step = match delta {
            Value::Number(d) | Value::NumberWithUnits { value: d, .. } => *d,
            _ => return Err(mismatch()),
        };
        let (base, units) = match self {
            Value::Number(n) if delta.format() == Format::Number => (*n, None),
            Value::NumberWithUnits { value, units } => (*value, Some(units)),
            _ => return Err(mismatch()),
        };

        let sum = base.checked_add(step).ok_or_else(|| HubError::InvalidValue {
            format: self.format(),
            value: format!("{base} + {step}"),
        })?;
        Ok(match units {
            None => Value::Number(sum),
            Some(units) => Value::NumberWithUnits {
                value: sum,
                units: units.clone(),
            },
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::NumberWithUnits { value, units } => write!(f, "{value} {units}"),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Numbers are read through their text so `0.1` stays `0.1` and `1.0`
/// keeps its scale
fn parse_number(raw: &JsonValue) -> Option<Decimal> {
    let text = match raw {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Rendered through the decimal text, so `33790` stays an integer and
/// `1.0` stays a float
fn number_json(n: &Decimal) -> JsonValue {
    serde_json::Number::from_str(&n.to_string()).map_or(JsonValue::Null, JsonValue::Number)
}
