//! Joins inputs positionally: row i of every input becomes output row i.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StepError;
use crate::step::{InputMode, ProcessOutcome, Step, StepInput, StepOutput};
use crate::types::{Row, RowMeta, Value, ValueMeta};

/// Concatenates one row from each input. Stops as soon as any input is
/// drained. Field names are taken as-is; duplicates keep their position.
#[derive(Debug, Default)]
pub struct ZipJoinStep {
  meta: Option<Arc<RowMeta>>,
}

impl ZipJoinStep {
  fn joined_meta(&mut self, rows: &[Row]) -> Arc<RowMeta> {
    if let Some(meta) = &self.meta {
      return Arc::clone(meta);
    }
    let fields: Vec<ValueMeta> = rows
      .iter()
      .flat_map(|r| r.meta().fields().iter().cloned())
      .collect();
    let meta = Arc::new(RowMeta::new(fields));
    self.meta = Some(Arc::clone(&meta));
    meta
  }
}

#[async_trait]
impl Step for ZipJoinStep {
  fn input_mode(&self) -> InputMode {
    InputMode::OneFromEach
  }

  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    let rows = match input {
      StepInput::Rows(rows) => rows,
      StepInput::Row(row) => vec![row],
      StepInput::Empty | StepInput::EndOfInput => return Ok(ProcessOutcome::Done),
    };
    let meta = self.joined_meta(&rows);
    let values: Vec<Value> = rows.iter().flat_map(|r| r.values().iter().cloned()).collect();
    out.put(Row::new(meta, values)?);
    Ok(ProcessOutcome::Continue)
  }
}
