//! Literal values used by seed rows, defaults and data operations.

pub use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Canonical text form of timestamps in ledger files and SQL literals.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Canonical text form of dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A literal value.
///
/// Ledger files only carry YAML scalars, so timestamps and dates arrive as
/// [`Value::Text`] and become [`Value::Timestamp`]/[`Value::Date`] once
/// they are coerced to a column type. Decimal columns hold a
/// [`Value::Decimal`] at the column's scale; quote long decimals in ledger
/// files so they do not pass through a float on the way in.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Shorthand for a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A string that is equal for two values exactly when the values are
    /// equal, used to key rows and detect duplicates.
    pub fn key_repr(&self) -> String {
        match self {
            Value::Null => "n".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{f:?}"),
            Value::Decimal(d) => format!("m:{}", d.normalized().to_plain_string()),
            Value::Text(s) => format!("s:{s}"),
            Value::Date(d) => format!("d:{}", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => format!("t:{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }

    /// Human-readable variant name, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal(d) => f.write_str(&d.to_plain_string()),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Date(d) => write!(f, "'{}'", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => write!(f, "'{}'", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Render a key tuple as `(1)` or `(1, 'BSE')`.
pub fn format_key(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}

/// Parse the timestamp spellings accepted in ledger files.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Decimal(d) => serializer.collect_str(&d.to_plain_string()),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.collect_str(&d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let scalar = Option::<Scalar>::deserialize(deserializer)?;
        Ok(match scalar {
            None => Value::Null,
            Some(Scalar::Bool(b)) => Value::Bool(b),
            Some(Scalar::Int(i)) => Value::Int(i),
            Some(Scalar::Float(x)) => Value::Float(x),
            Some(Scalar::Text(s)) => Value::Text(s),
        })
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod tests;
