//! Immutable rows.

use std::fmt;
use std::sync::Arc;

use crate::error::RowError;

use super::{RowMeta, Value};

/// An ordered, named, typed tuple.
///
/// Rows are immutable once built. Cloning shares the underlying values, which is
/// how copy fan-out hands the same row to several consumers without aliasing
/// hazards.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  meta: Arc<RowMeta>,
  values: Arc<[Value]>,
}

impl Row {
  /// Builds a row, checking arity and per-field types against `meta`.
  pub fn new(meta: Arc<RowMeta>, values: Vec<Value>) -> Result<Self, RowError> {
    if meta.len() != values.len() {
      return Err(RowError::ArityMismatch {
        expected: meta.len(),
        actual: values.len(),
      });
    }
    for (field, value) in meta.fields().iter().zip(&values) {
      if !value.conforms_to(field.value_type) {
        return Err(RowError::TypeMismatch {
          field: field.name.clone(),
          expected: field.value_type,
          actual: value.value_type(),
        });
      }
    }
    Ok(Self {
      meta,
      values: values.into(),
    })
  }

  pub fn meta(&self) -> &Arc<RowMeta> {
    &self.meta
  }

  pub fn values(&self) -> &[Value] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn value(&self, index: usize) -> Option<&Value> {
    self.values.get(index)
  }

  /// Looks a value up by field name.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.meta.index_of(name).and_then(|i| self.values.get(i))
  }

  /// Same as [Row::get] but reports the missing field as an error.
  pub fn require(&self, name: &str) -> Result<&Value, RowError> {
    self
      .get(name)
      .ok_or_else(|| RowError::UnknownField(name.to_string()))
  }

  /// Builds a new row with `extra` values appended, described by `meta`
  /// (which must already contain the appended fields).
  pub fn extend(&self, meta: Arc<RowMeta>, extra: Vec<Value>) -> Result<Row, RowError> {
    let mut values = self.values.to_vec();
    values.extend(extra);
    Row::new(meta, values)
  }

  /// True if both rows point at the same value storage.
  pub fn shares_values_with(&self, other: &Row) -> bool {
    Arc::ptr_eq(&self.values, &other.values)
  }
}

impl fmt::Display for Row {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, (field, value)) in self.meta.fields().iter().zip(self.values.iter()).enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}={}", field.name, value)?;
    }
    write!(f, "]")
  }
}
