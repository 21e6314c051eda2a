//! Primitive EDM types and runtime values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Primitive property types understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    #[serde(rename = "Edm.String")]
    String,
    #[serde(rename = "Edm.Int32")]
    Int32,
    #[serde(rename = "Edm.Int64")]
    Int64,
    #[serde(rename = "Edm.Decimal")]
    Decimal,
    #[serde(rename = "Edm.Double")]
    Double,
    #[serde(rename = "Edm.Boolean")]
    Boolean,
    #[serde(rename = "Edm.Date")]
    Date,
    #[serde(rename = "Edm.DateTimeOffset")]
    DateTimeOffset,
    #[serde(rename = "Edm.TimeOfDay")]
    TimeOfDay,
    #[serde(rename = "Edm.Guid")]
    Guid,
    #[serde(rename = "Edm.Binary")]
    Binary,
}

impl PrimitiveType {
    #[must_use]
    pub fn edm_name(self) -> &'static str {
        match self {
            PrimitiveType::String => "Edm.String",
            PrimitiveType::Int32 => "Edm.Int32",
            PrimitiveType::Int64 => "Edm.Int64",
            PrimitiveType::Decimal => "Edm.Decimal",
            PrimitiveType::Double => "Edm.Double",
            PrimitiveType::Boolean => "Edm.Boolean",
            PrimitiveType::Date => "Edm.Date",
            PrimitiveType::DateTimeOffset => "Edm.DateTimeOffset",
            PrimitiveType::TimeOfDay => "Edm.TimeOfDay",
            PrimitiveType::Guid => "Edm.Guid",
            PrimitiveType::Binary => "Edm.Binary",
        }
    }

    /// Widening rank for numeric types; `None` for everything else.
    #[must_use]
    pub fn numeric_rank(self) -> Option<u8> {
        match self {
            PrimitiveType::Int32 => Some(0),
            PrimitiveType::Int64 => Some(1),
            PrimitiveType::Decimal => Some(2),
            PrimitiveType::Double => Some(3),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }

    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(self, PrimitiveType::Int32 | PrimitiveType::Int64)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

impl FromStr for PrimitiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s {
            "Edm.String" => PrimitiveType::String,
            "Edm.Int32" => PrimitiveType::Int32,
            "Edm.Int64" => PrimitiveType::Int64,
            "Edm.Decimal" => PrimitiveType::Decimal,
            "Edm.Double" => PrimitiveType::Double,
            "Edm.Boolean" => PrimitiveType::Boolean,
            "Edm.Date" => PrimitiveType::Date,
            "Edm.DateTimeOffset" => PrimitiveType::DateTimeOffset,
            "Edm.TimeOfDay" => PrimitiveType::TimeOfDay,
            "Edm.Guid" => PrimitiveType::Guid,
            "Edm.Binary" => PrimitiveType::Binary,
            other => {
                return Err(Error::configuration(
                    "unknown_primitive_type",
                    format!("unknown primitive type '{other}'"),
                ));
            }
        };
        Ok(ty)
    }
}

/// A scalar value held by an entity property or produced by an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(BigDecimal),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTimeOffset(DateTime<Utc>),
    TimeOfDay(NaiveTime),
    Binary(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The natural type of this value; integers report `Edm.Int64`.
    #[must_use]
    pub fn type_of(&self) -> Option<PrimitiveType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PrimitiveType::Boolean),
            Value::Int(_) => Some(PrimitiveType::Int64),
            Value::Decimal(_) => Some(PrimitiveType::Decimal),
            Value::Double(_) => Some(PrimitiveType::Double),
            Value::String(_) => Some(PrimitiveType::String),
            Value::Guid(_) => Some(PrimitiveType::Guid),
            Value::Date(_) => Some(PrimitiveType::Date),
            Value::DateTimeOffset(_) => Some(PrimitiveType::DateTimeOffset),
            Value::TimeOfDay(_) => Some(PrimitiveType::TimeOfDay),
            Value::Binary(_) => Some(PrimitiveType::Binary),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.is_integer() => d.to_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Int(i) => Some(BigDecimal::from(*i)),
            Value::Decimal(d) => Some(d.clone()),
            Value::Double(f) => BigDecimal::from_f64(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => i.to_f64(),
            Value::Decimal(d) => d.to_f64(),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two non-null values of compatible types. Numbers compare
    /// across representations; anything else must share a variant.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Double(_), _) | (_, Value::Double(_)) => {
                self.to_f64()?.partial_cmp(&other.to_f64()?)
            }
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Some(self.to_decimal()?.cmp(&other.to_decimal()?))
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTimeOffset(a), Value::DateTimeOffset(b)) => Some(a.cmp(b)),
            (Value::TimeOfDay(a), Value::TimeOfDay(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls sort lowest, incomparable values
    /// are treated as equal.
    #[must_use]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Convert a numeric value to the representation of `ty`.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` if the value cannot be represented.
    pub fn coerce_to(self, ty: PrimitiveType) -> Result<Value> {
        let coerced = match (ty, self) {
            (_, Value::Null) => Value::Null,
            (PrimitiveType::Int32 | PrimitiveType::Int64, Value::Int(i)) => Value::Int(i),
            (PrimitiveType::Decimal, v @ (Value::Int(_) | Value::Decimal(_))) => {
                Value::Decimal(v.to_decimal().unwrap_or_default())
            }
            (PrimitiveType::Double, v @ (Value::Int(_) | Value::Decimal(_) | Value::Double(_))) => {
                Value::Double(v.to_f64().unwrap_or(f64::NAN))
            }
            (ty, v) if v.type_of() == Some(ty) => v,
            (ty, v) => {
                return Err(Error::bad_request(
                    "type_mismatch",
                    format!("literal {v} is not compatible with {ty}"),
                ));
            }
        };
        Ok(coerced)
    }

    /// JSON rendering used in response bodies.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Decimal(d) => {
                let text = d.to_plain_string();
                text.parse::<serde_json::Number>()
                    .map_or(J::String(text), J::Number)
            }
            Value::Double(f) => serde_json::Number::from_f64(*f).map_or_else(
                || J::String(double_keyword(*f).to_owned()),
                J::Number,
            ),
            Value::String(s) => J::String(s.clone()),
            Value::Guid(g) => J::String(g.hyphenated().to_string()),
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTimeOffset(dt) => {
                J::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::TimeOfDay(t) => J::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Binary(b) => J::String(URL_SAFE_NO_PAD.encode(b)),
        }
    }

    /// Read a JSON value as an instance of `ty`.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` with code `invalid_property_value` when
    /// the JSON shape does not match the type.
    pub fn from_json(ty: PrimitiveType, json: &serde_json::Value) -> Result<Value> {
        use serde_json::Value as J;
        let invalid = || {
            Error::bad_request(
                "invalid_property_value",
                format!("{json} is not a valid {ty} value"),
            )
        };
        let value = match (ty, json) {
            (_, J::Null) => Value::Null,
            (PrimitiveType::Boolean, J::Bool(b)) => Value::Bool(*b),
            (PrimitiveType::Int32, J::Number(n)) => {
                let i = n.as_i64().ok_or_else(invalid)?;
                i32::try_from(i).map_err(|_| invalid())?;
                Value::Int(i)
            }
            (PrimitiveType::Int64, J::Number(n)) => Value::Int(n.as_i64().ok_or_else(invalid)?),
            (PrimitiveType::Decimal, J::Number(n)) => {
                Value::Decimal(BigDecimal::from_str(&n.to_string()).map_err(|_| invalid())?)
            }
            (PrimitiveType::Decimal, J::String(s)) => {
                Value::Decimal(BigDecimal::from_str(s).map_err(|_| invalid())?)
            }
            (PrimitiveType::Double, J::Number(n)) => Value::Double(n.as_f64().ok_or_else(invalid)?),
            (PrimitiveType::Double, J::String(s)) => match s.as_str() {
                "NaN" => Value::Double(f64::NAN),
                "INF" => Value::Double(f64::INFINITY),
                "-INF" => Value::Double(f64::NEG_INFINITY),
                _ => return Err(invalid()),
            },
            (PrimitiveType::String, J::String(s)) => Value::String(s.clone()),
            (PrimitiveType::Guid, J::String(s)) => {
                Value::Guid(Uuid::parse_str(s).map_err(|_| invalid())?)
            }
            (PrimitiveType::Date, J::String(s)) => {
                Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?)
            }
            (PrimitiveType::DateTimeOffset, J::String(s)) => Value::DateTimeOffset(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc),
            ),
            (PrimitiveType::TimeOfDay, J::String(s)) => {
                Value::TimeOfDay(NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map_err(|_| invalid())?)
            }
            (PrimitiveType::Binary, J::String(s)) => {
                Value::Binary(URL_SAFE_NO_PAD.decode(s).map_err(|_| invalid())?)
            }
            _ => return Err(invalid()),
        };
        Ok(value)
    }
}

fn double_keyword(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_negative() {
        "-INF"
    } else {
        "INF"
    }
}

/// Canonical URL literal form. Parsing this text yields an equal value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => {
                let text = d.to_plain_string();
                if text.contains('.') {
                    f.write_str(&text)
                } else {
                    write!(f, "{text}.0")
                }
            }
            Value::Double(x) if x.is_finite() => write!(f, "{x:e}"),
            Value::Double(x) => f.write_str(double_keyword(*x)),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Guid(g) => write!(f, "{}", g.hyphenated()),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTimeOffset(dt) => {
                f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::TimeOfDay(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::Binary(b) => write!(f, "binary'{}'", URL_SAFE_NO_PAD.encode(b)),
        }
    }
}
