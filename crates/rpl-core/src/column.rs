//! Column descriptors: storage type, nullability and defaults.

use crate::names::ColumnName;
use crate::value::{parse_date, parse_timestamp, BigDecimal, Value};
use bigdecimal::{RoundingMode, ToPrimitive};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Storage type of a column.
///
/// Written in ledger files in its SQL spelling (`int`, `varchar(100)`,
/// `longtext`, `decimal(18,2)`, `datetime(6)`, `tinyint(1)`, ...); the
/// canonical spelling is produced by [`Display`](fmt::Display).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Double,
    Varchar(u32),
    Text,
    Date,
    Timestamp,
    Uuid,
    Blob,
}

/// Type families; conversions never cross a family boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Bool,
    Numeric,
    String,
    Temporal,
    Uuid,
    Blob,
}

static TYPE_RE: OnceLock<Regex> = OnceLock::new();

fn type_regex() -> &'static Regex {
    TYPE_RE.get_or_init(|| {
        Regex::new(r"^([a-z][a-z0-9 ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?$")
            .expect("valid regex literal")
    })
}

impl ColumnType {
    fn family(&self) -> Family {
        match self {
            ColumnType::Bool => Family::Bool,
            ColumnType::SmallInt
            | ColumnType::Int
            | ColumnType::BigInt
            | ColumnType::Decimal { .. }
            | ColumnType::Double => Family::Numeric,
            ColumnType::Varchar(_) | ColumnType::Text => Family::String,
            ColumnType::Date | ColumnType::Timestamp => Family::Temporal,
            ColumnType::Uuid => Family::Uuid,
            ColumnType::Blob => Family::Blob,
        }
    }

    /// Number of integer digits an integer type can hold.
    fn integer_digits(&self) -> Option<u8> {
        match self {
            ColumnType::SmallInt => Some(5),
            ColumnType::Int => Some(10),
            ColumnType::BigInt => Some(19),
            _ => None,
        }
    }

    /// Returns `true` if every value of `self` is representable in `to`
    /// without loss, so an alter from `self` to `to` never needs a data check.
    pub fn widens_to(&self, to: &ColumnType) -> bool {
        use ColumnType::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (SmallInt, Int | BigInt) | (Int, BigInt) => true,
            (SmallInt | Int, Double) => true,
            (SmallInt | Int | BigInt, Decimal { precision, scale }) => self
                .integer_digits()
                .is_some_and(|digits| precision.saturating_sub(*scale) >= digits),
            (
                Decimal {
                    precision: p1,
                    scale: s1,
                },
                Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s2 >= s1 && p2.saturating_sub(*s2) >= p1.saturating_sub(*s1),
            (Varchar(a), Varchar(b)) => b >= a,
            (Varchar(_), Text) => true,
            (Date, Timestamp) => true,
            _ => false,
        }
    }

    /// Returns `true` if a conversion between the two types is meaningful at
    /// all (it may still need existing values to be checked).
    pub fn is_convertible_to(&self, to: &ColumnType) -> bool {
        self.family() == to.family()
    }

    /// Coerce a literal to this type, returning `None` if it does not fit.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        use ColumnType::*;
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (Bool, Value::Int(i)) if *i == 0 || *i == 1 => Some(Value::Bool(*i == 1)),
            (Bool, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (SmallInt | Int | BigInt, Value::Int(i)) => self.fit_integer(*i),
            (SmallInt | Int | BigInt, Value::Text(s)) => {
                s.trim().parse::<i64>().ok().and_then(|i| self.fit_integer(i))
            }
            (SmallInt | Int | BigInt, Value::Decimal(d)) if d.with_scale(0) == *d => {
                d.to_i64().and_then(|i| self.fit_integer(i))
            }
            (Decimal { precision, scale }, v) => {
                let rounded = decimal_of(v)?.with_scale_round(i64::from(*scale), RoundingMode::HalfUp);
                (rounded.digits() <= u64::from(*precision)).then_some(Value::Decimal(rounded))
            }
            (Double, v) => numeric_of(v).map(Value::Float),
            (Varchar(n), v) => {
                let s = text_of(v)?;
                (s.chars().count() <= *n as usize).then_some(Value::Text(s))
            }
            (Text, v) => text_of(v).map(Value::Text),
            (Date, Value::Date(d)) => Some(Value::Date(*d)),
            (Date, Value::Timestamp(ts)) => is_midnight(ts).then_some(Value::Date(ts.date())),
            (Date, Value::Text(s)) => parse_date(s)
                .or_else(|| {
                    parse_timestamp(s)
                        .filter(is_midnight)
                        .map(|ts| ts.date())
                })
                .map(Value::Date),
            (Timestamp, Value::Timestamp(ts)) => Some(Value::Timestamp(*ts)),
            (Timestamp, Value::Date(d)) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
            (Timestamp, Value::Text(s)) => parse_timestamp(s).map(Value::Timestamp),
            (Uuid, Value::Text(s)) => uuid::Uuid::parse_str(s.trim())
                .ok()
                .map(|u| Value::Text(u.hyphenated().to_string())),
            (Blob, Value::Text(s)) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }

    fn fit_integer(&self, i: i64) -> Option<Value> {
        let fits = match self {
            ColumnType::SmallInt => i16::try_from(i).is_ok(),
            ColumnType::Int => i32::try_from(i).is_ok(),
            _ => true,
        };
        fits.then_some(Value::Int(i))
    }
}

fn is_midnight(ts: &chrono::NaiveDateTime) -> bool {
    use chrono::Timelike;
    ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0
}

fn numeric_of(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Decimal(d) => d.to_f64(),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Exact decimal form of a numeric literal. Floats go through their
/// shortest text so `0.1` stays `0.1`.
fn decimal_of(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Int(i) => Some(BigDecimal::from(*i)),
        Value::Float(x) if x.is_finite() => BigDecimal::from_str(&x.to_string()).ok(),
        Value::Decimal(d) => Some(d.clone()),
        Value::Text(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(x) => Some(x.to_string()),
        Value::Decimal(d) => Some(d.to_plain_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Bool => f.write_str("bool"),
            ColumnType::SmallInt => f.write_str("smallint"),
            ColumnType::Int => f.write_str("int"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            ColumnType::Double => f.write_str("double"),
            ColumnType::Varchar(n) => write!(f, "varchar({n})"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Date => f.write_str("date"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Uuid => f.write_str("uuid"),
            ColumnType::Blob => f.write_str("blob"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let caps = type_regex()
            .captures(&lowered)
            .ok_or_else(|| format!("unrecognized column type '{s}'"))?;
        let name = caps.get(1).map_or("", |m| m.as_str().trim());
        let arg = |i: usize| -> Result<Option<u32>, String> {
            caps.get(i)
                .map(|m| {
                    m.as_str()
                        .parse::<u32>()
                        .map_err(|_| format!("type argument out of range in '{s}'"))
                })
                .transpose()
        };
        let (a, b) = (arg(2)?, arg(3)?);

        let ty = match name {
            "bool" | "boolean" | "bit" => ColumnType::Bool,
            "tinyint" if a == Some(1) => ColumnType::Bool,
            "tinyint" | "smallint" => ColumnType::SmallInt,
            "int" | "integer" => ColumnType::Int,
            "bigint" => ColumnType::BigInt,
            "decimal" | "numeric" => {
                let precision = a.unwrap_or(18);
                let scale = b.unwrap_or(0);
                if precision == 0 || precision > 38 || scale > precision {
                    return Err(format!("invalid decimal precision/scale in '{s}'"));
                }
                ColumnType::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                }
            }
            "double" | "double precision" | "float" | "real" => ColumnType::Double,
            "varchar" | "nvarchar" | "character varying" | "char" | "nchar" => match a {
                Some(0) => return Err(format!("zero-length string type '{s}'")),
                Some(n) => ColumnType::Varchar(n),
                None => ColumnType::Text,
            },
            "tinytext" => ColumnType::Varchar(255),
            "text" | "mediumtext" | "longtext" => ColumnType::Text,
            "date" => ColumnType::Date,
            "datetime" | "datetime2" | "timestamp" => ColumnType::Timestamp,
            "uuid" | "guid" => ColumnType::Uuid,
            "blob" | "longblob" | "bytea" | "varbinary" => ColumnType::Blob,
            _ => return Err(format!("unrecognized column type '{s}'")),
        };
        Ok(ty)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ColumnType> for String {
    fn from(ty: ColumnType) -> Self {
        ty.to_string()
    }
}

/// Default of a column: a literal or a SQL expression.
///
/// In YAML a literal is written as the bare scalar (`default: 0`) and an
/// expression as a map (`default: { sql: CURRENT_TIMESTAMP }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Expression { sql: String },
    Literal(Value),
}

impl DefaultValue {
    pub fn expression(sql: impl Into<String>) -> Self {
        DefaultValue::Expression { sql: sql.into() }
    }

    /// Coerce a literal default to `ty`; expressions are kept as written.
    pub fn normalized_for(&self, ty: &ColumnType) -> Option<DefaultValue> {
        match self {
            DefaultValue::Literal(v) => ty.coerce(v).map(DefaultValue::Literal),
            DefaultValue::Expression { sql } => Some(DefaultValue::Expression {
                sql: sql.trim().to_string(),
            }),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The mutable part of a column: what an `alter_column` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    #[serde(rename = "type")]
    pub ty: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

impl fmt::Display for ColumnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)?;
        f.write_str(if self.nullable { " null" } else { " not null" })?;
        match &self.default {
            Some(DefaultValue::Literal(v)) => write!(f, " default {v}"),
            Some(DefaultValue::Expression { sql }) => write!(f, " default {sql}"),
            None => Ok(()),
        }
    }
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: ColumnName,

    #[serde(rename = "type")]
    pub ty: ColumnType,

    /// Columns are NOT NULL unless declared nullable
    #[serde(default)]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    /// Value generated from a per-table sequence when omitted on insert
    #[serde(default, skip_serializing_if = "is_false")]
    pub identity: bool,
}

impl ColumnDef {
    /// A NOT NULL column without default.
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: ColumnName::new(name),
            ty,
            nullable: false,
            default: None,
            identity: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn shape(&self) -> ColumnShape {
        ColumnShape {
            ty: self.ty,
            nullable: self.nullable,
            default: self.default.clone(),
        }
    }
}

#[cfg(test)]
#[path = "column_test.rs"]
mod tests;
