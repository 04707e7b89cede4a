//! Dynamically typed cell values read from and written to a backend.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// A single row, aligned with the column order of its table descriptor.
pub type Row = Vec<Value>;

/// A cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used for tolerance comparison. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Equality with numeric tolerance: `|a - b| <= tolerance` for numbers,
    /// exact equality for everything else.
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => {
                if a.is_nan() || b.is_nan() {
                    return a.is_nan() && b.is_nan();
                }
                a == b || (a - b).abs() <= tolerance
            }
            _ => self == other,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Decimal(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Date(_) => 5,
            Value::Time(_) => 6,
            Value::DateTime(_) => 7,
            Value::Timestamp(_) => 8,
            Value::Uuid(_) => 9,
        }
    }

    /// Total order used to sort rows by key (nulls first).
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Int(a), Value::UInt(b)) => (*a as i128).cmp(&(*b as i128)),
            (Value::UInt(a), Value::Int(b)) => (*a as i128).cmp(&(*b as i128)),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

/// Compare two rows column by column with [`Value::total_cmp`].
pub fn cmp_rows(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Render a primary key tuple for reports and lookups, e.g. `(3, 'mouse')`.
pub fn format_key(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "'{}'", d),
            Value::Time(t) => write!(f, "'{}'", t),
            Value::DateTime(d) => write!(f, "'{}'", d),
            Value::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
            Value::Uuid(u) => write!(f, "'{}'", u),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Decimal(d) => serializer.collect_str(d),
            Value::Bytes(_) => serializer.collect_str(self),
            Value::Date(d) => serializer.collect_str(d),
            Value::Time(t) => serializer.collect_str(t),
            Value::DateTime(d) => serializer.collect_str(d),
            Value::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339()),
            Value::Uuid(u) => serializer.collect_str(u),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_boundary() {
        let a = Value::Float(1.0);
        assert!(a.approx_eq(&Value::Float(1.5), 0.5));
        assert!(!a.approx_eq(&Value::Float(1.5000001), 0.5));
        assert!(Value::Int(2).approx_eq(&Value::Float(2.0), 0.0));
    }

    #[test]
    fn test_non_numeric_exact() {
        assert!(Value::from("a").approx_eq(&Value::from("a"), 10.0));
        assert!(!Value::from("a").approx_eq(&Value::from("b"), 10.0));
        assert!(!Value::Null.approx_eq(&Value::Int(0), 10.0));
    }

    #[test]
    fn test_ordering_nulls_first() {
        let mut vals = vec![Value::Int(3), Value::Null, Value::UInt(1), Value::Float(2.5)];
        vals.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(vals, vec![Value::Null, Value::UInt(1), Value::Float(2.5), Value::Int(3)]);
    }

    #[test]
    fn test_format_key() {
        assert_eq!(format_key(&[Value::Int(3), Value::from("mouse")]), "(3, 'mouse')");
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&vec![Value::Null, Value::Int(1), Value::from("x")]).unwrap();
        assert_eq!(json, r#"[null,1,"x"]"#);
    }
}
