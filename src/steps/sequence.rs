//! Adds an increasing integer to every row.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::step::{ProcessOutcome, Step, StepContext, StepInput, StepOutput};
use crate::types::{Row, RowMeta, Value, ValueMeta, ValueType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
  /// Name of the appended field.
  pub field: String,
  pub start: i64,
  pub increment: i64,
  /// Without inputs, emit this many single-field rows (0 = none).
  pub limit: u64,
}

impl Default for SequenceConfig {
  fn default() -> Self {
    Self {
      field: "seq".to_string(),
      start: 1,
      increment: 1,
      limit: 0,
    }
  }
}

/// Appends `field` (start, start+increment, ...) to each row. Each copy counts
/// on its own.
#[derive(Debug)]
pub struct SequenceStep {
  config: SequenceConfig,
  next: i64,
  emitted: u64,
  /// Input shape and the extended shape derived from it.
  shapes: Option<(Arc<RowMeta>, Arc<RowMeta>)>,
}

impl SequenceStep {
  pub fn new(config: SequenceConfig) -> Self {
    let next = config.start;
    Self {
      config,
      next,
      emitted: 0,
      shapes: None,
    }
  }

  fn take_next(&mut self) -> i64 {
    let v = self.next;
    self.next = self.next.wrapping_add(self.config.increment);
    v
  }

  fn output_meta(&mut self, input: &Arc<RowMeta>) -> Arc<RowMeta> {
    match &self.shapes {
      Some((i, o)) if RowMeta::same_shape(i, input) => Arc::clone(o),
      _ => {
        let out = Arc::new(input.extended([ValueMeta::new(&self.config.field, ValueType::Integer)]));
        self.shapes = Some((Arc::clone(input), Arc::clone(&out)));
        out
      }
    }
  }
}

#[async_trait]
impl Step for SequenceStep {
  async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
    if self.config.field.is_empty() {
      return Err(StepError::Init("sequence field name is empty".to_string()));
    }
    Ok(())
  }

  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    match input {
      StepInput::Row(row) => {
        let meta = self.output_meta(row.meta());
        let v = self.take_next();
        out.put(row.extend(meta, vec![Value::Integer(v)])?);
        Ok(ProcessOutcome::Continue)
      }
      StepInput::Rows(rows) => {
        for row in rows {
          let meta = self.output_meta(row.meta());
          let v = self.take_next();
          out.put(row.extend(meta, vec![Value::Integer(v)])?);
        }
        Ok(ProcessOutcome::Continue)
      }
      StepInput::Empty => {
        if self.emitted >= self.config.limit {
          return Ok(ProcessOutcome::Done);
        }
        let meta = self.output_meta(&Arc::new(RowMeta::default()));
        let v = self.take_next();
        out.put(Row::new(meta, vec![Value::Integer(v)])?);
        self.emitted += 1;
        Ok(ProcessOutcome::Continue)
      }
      StepInput::EndOfInput => Ok(ProcessOutcome::Done),
    }
  }
}
