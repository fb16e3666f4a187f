//! Typed field values carried by rows.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a row field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  Integer,
  Number,
  String,
  Boolean,
  Date,
  Binary,
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueType::Integer => write!(f, "integer"),
      ValueType::Number => write!(f, "number"),
      ValueType::String => write!(f, "string"),
      ValueType::Boolean => write!(f, "boolean"),
      ValueType::Date => write!(f, "date"),
      ValueType::Binary => write!(f, "binary"),
    }
  }
}

/// One field value. `Null` is valid for every declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Number(f64),
  String(String),
  Boolean(bool),
  Date(DateTime<Utc>),
  Binary(Bytes),
}

impl Value {
  /// Type of a non-null value; `None` for `Null`.
  pub fn value_type(&self) -> Option<ValueType> {
    match self {
      Value::Null => None,
      Value::Integer(_) => Some(ValueType::Integer),
      Value::Number(_) => Some(ValueType::Number),
      Value::String(_) => Some(ValueType::String),
      Value::Boolean(_) => Some(ValueType::Boolean),
      Value::Date(_) => Some(ValueType::Date),
      Value::Binary(_) => Some(ValueType::Binary),
    }
  }

  /// True if this value may be stored in a field declared as `ty`.
  pub fn conforms_to(&self, ty: ValueType) -> bool {
    self.value_type().is_none_or(|t| t == ty)
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  /// Feeds a stable representation of the value into `state`.
  ///
  /// Floats hash by bit pattern so equal keys always land on the same partition.
  pub(crate) fn hash_into<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      Value::Null => {}
      Value::Integer(i) => i.hash(state),
      Value::Number(n) => n.to_bits().hash(state),
      Value::String(s) => s.hash(state),
      Value::Boolean(b) => b.hash(state),
      Value::Date(d) => d.timestamp_nanos_opt().unwrap_or(d.timestamp()).hash(state),
      Value::Binary(b) => b.hash(state),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Integer(i) => write!(f, "{}", i),
      Value::Number(n) => write!(f, "{}", n),
      Value::String(s) => write!(f, "{}", s),
      Value::Boolean(b) => write!(f, "{}", b),
      Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
      Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Integer(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Number(v)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Boolean(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(v)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self {
    Value::Date(v)
  }
}

impl From<Bytes> for Value {
  fn from(v: Bytes) -> Self {
    Value::Binary(v)
  }
}
