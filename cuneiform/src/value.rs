// Field values: the closed set of things a column can hold.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field value.
///
/// Every variant corresponds to exactly one semantic field type, so checking a
/// value against a field declaration is a match on the variant rather than an
/// inspection of the payload. `Null` is accepted by optional fields only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Datetime(DateTime<Utc>),
    Enum(EnumValue),
    Ref(RefValue),
}

/// A symbol of a declared enumeration together with its stable storage code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumValue {
    pub enumeration: String,
    pub symbol: String,
    pub code: i64,
}

/// A reference to a persisted row of another model, by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefValue {
    pub model: String,
    pub id: i64,
}

impl Value {
    /// Short name of the value's semantic type, used in error messages.
    pub fn kind(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Integer(_) => "integer".into(),
            Value::Real(_) => "real".into(),
            Value::Text(_) => "text".into(),
            Value::Boolean(_) => "boolean".into(),
            Value::Datetime(_) => "datetime".into(),
            Value::Enum(e) => format!("enum {}", e.enumeration),
            Value::Ref(r) => format!("ref {}", r.model),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain JSON rendering: enums become their symbol, references their id.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Datetime(dt) => serde_json::Value::String(format_datetime(dt)),
            Value::Enum(e) => serde_json::Value::String(e.symbol.clone()),
            Value::Ref(r) => serde_json::Value::from(r.id),
        }
    }
}

/// Canonical text form of a datetime as stored. Fixed precision keeps the
/// stored strings ordered the same way as the instants they encode.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Datetime(dt) => write!(f, "{}", format_datetime(dt)),
            Value::Enum(e) => write!(f, "{e}"),
            Value::Ref(r) => write!(f, "{r}"),
        }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.enumeration, self.symbol)
    }
}

impl fmt::Display for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} #{}>", self.model, self.id)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl From<EnumValue> for Value {
    fn from(e: EnumValue) -> Self {
        Value::Enum(e)
    }
}

impl From<RefValue> for Value {
    fn from(r: RefValue) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
