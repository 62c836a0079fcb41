//! Column values.

use std::cmp::Ordering;
use std::fmt;

use crate::schema::ScalarType;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    /// `0x`-prefixed, lower-case hex.
    Hex(String),
    BigInt(i128),
    List(Vec<Value>),
}

impl Value {
    /// Build a hex value, normalizing case and the `0x` prefix.
    pub fn hex(s: impl AsRef<str>) -> Self {
        Value::Hex(normalize_hex(s.as_ref()))
    }

    /// The canonical form of this value: hex strings (also inside lists)
    /// are lower-cased and `0x`-prefixed, everything else is unchanged.
    pub fn into_normalized(self) -> Self {
        match self {
            Value::Hex(s) => Value::hex(s),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::into_normalized).collect())
            }
            other => other,
        }
    }

    /// Returns `true` unless this is, or contains, a NaN or infinite float.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Hex(_) => "hex",
            Value::BigInt(_) => "bigint",
            Value::List(_) => "list",
        }
    }

    /// Returns `true` if this (non-null, non-list) value has scalar type `ty`.
    pub fn is_scalar_of(&self, ty: ScalarType) -> bool {
        matches!(
            (self, ty),
            (Value::String(_), ScalarType::String)
                | (Value::Int(_), ScalarType::Int)
                | (Value::Float(_), ScalarType::Float)
                | (Value::Boolean(_), ScalarType::Boolean)
                | (Value::Hex(_), ScalarType::Hex)
                | (Value::BigInt(_), ScalarType::BigInt)
        )
    }

    /// The string payload of `String` and `Hex` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Hex(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Ordering between two values of the same variant.
    ///
    /// Returns `None` for mismatched variants, nulls, lists and NaN floats.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Hex(a), Value::Hex(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// JSON form used for list columns. Big integers become decimal strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) | Value::Hex(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::BigInt(i) => serde_json::Value::String(i.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Inverse of [`Value::to_json`] for a scalar of type `ty`.
    pub fn from_json(ty: ScalarType, json: &serde_json::Value) -> Option<Value> {
        match (ty, json) {
            (_, serde_json::Value::Null) => Some(Value::Null),
            (ScalarType::String, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
            (ScalarType::Hex, serde_json::Value::String(s)) => Some(Value::hex(s)),
            (ScalarType::Int, v) => v.as_i64().map(Value::Int),
            (ScalarType::Float, v) => v.as_f64().map(Value::Float),
            (ScalarType::Boolean, serde_json::Value::Bool(b)) => Some(Value::Boolean(*b)),
            (ScalarType::BigInt, serde_json::Value::String(s)) => s.parse().ok().map(Value::BigInt),
            _ => None,
        }
    }
}

/// Lower-case `s` and give it exactly one `0x` prefix.
pub fn normalize_hex(s: &str) -> String {
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    format!("0x{}", body.to_ascii_lowercase())
}

/// Order-preserving 16-byte encoding of a big integer.
///
/// Flipping the sign bit maps `i128::MIN..=i128::MAX` onto
/// `0..=u128::MAX`, so byte comparison matches numeric comparison.
pub fn encode_bigint(v: i128) -> [u8; 16] {
    ((v as u128) ^ (1u128 << 127)).to_be_bytes()
}

/// Inverse of [`encode_bigint`]. Returns `None` on a wrong-length input.
pub fn decode_bigint(bytes: &[u8]) -> Option<i128> {
    let buf: [u8; 16] = bytes.try_into().ok()?;
    Some((u128::from_be_bytes(buf) ^ (1u128 << 127)) as i128)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) | Value::Hex(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::BigInt(i) => write!(f, "{i}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i128> for Value {
    fn from(i: i128) -> Self {
        Value::BigInt(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
