//! Row shape: the ordered (name, type) description shared by all rows on a row set.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ValueType;

/// Name and declared type of one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueMeta {
  pub name: String,
  pub value_type: ValueType,
}

impl ValueMeta {
  pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
    Self {
      name: name.into(),
      value_type,
    }
  }
}

/// Ordered field descriptions of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowMeta {
  fields: Vec<ValueMeta>,
}

impl RowMeta {
  pub fn new(fields: Vec<ValueMeta>) -> Self {
    Self { fields }
  }

  /// Convenience constructor from `(name, type)` pairs.
  pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, ValueType)>) -> Self {
    Self {
      fields: pairs
        .into_iter()
        .map(|(n, t)| ValueMeta::new(n, t))
        .collect(),
    }
  }

  pub fn fields(&self) -> &[ValueMeta] {
    &self.fields
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.fields.iter().position(|f| f.name == name)
  }

  /// Returns a new shape with `extra` appended after the existing fields.
  pub fn extended(&self, extra: impl IntoIterator<Item = ValueMeta>) -> RowMeta {
    let mut fields = self.fields.clone();
    fields.extend(extra);
    RowMeta { fields }
  }

  /// Structural equality, short-circuiting on shared allocations.
  pub fn same_shape(a: &Arc<RowMeta>, b: &Arc<RowMeta>) -> bool {
    Arc::ptr_eq(a, b) || a == b
  }
}

impl fmt::Display for RowMeta {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, field) in self.fields.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}:{}", field.name, field.value_type)?;
    }
    write!(f, "]")
  }
}
