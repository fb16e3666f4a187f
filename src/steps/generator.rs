//! Constant-row source.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::StepError;
use crate::step::{ProcessOutcome, Step, StepContext, StepInput, StepOutput};
use crate::types::{Row, RowMeta, Value, ValueMeta, ValueType};

/// One generated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorField {
  pub name: String,
  #[serde(rename = "type")]
  pub value_type: ValueType,
  #[serde(default = "null_value")]
  pub value: Value,
}

fn null_value() -> Value {
  Value::Null
}

/// `{"limit": 10, "fields": [{"name": "x", "type": "string", "value": "a"}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
  /// Rows to emit per copy.
  pub limit: u64,
  pub fields: Vec<GeneratorField>,
}

/// Emits `limit` copies of one constant row, then finishes.
#[derive(Debug)]
pub struct GeneratorStep {
  config: GeneratorConfig,
  row: Option<Row>,
  emitted: u64,
}

impl GeneratorStep {
  pub fn new(config: GeneratorConfig) -> Self {
    Self {
      config,
      row: None,
      emitted: 0,
    }
  }
}

#[async_trait]
impl Step for GeneratorStep {
  #[instrument(level = "trace", skip(self, ctx), fields(step = %ctx.step_name(), copy = ctx.copy))]
  async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
    let meta = Arc::new(RowMeta::new(
      self
        .config
        .fields
        .iter()
        .map(|f| ValueMeta::new(&f.name, f.value_type))
        .collect(),
    ));
    let values = self.config.fields.iter().map(|f| f.value.clone()).collect();
    self.row = Some(Row::new(meta, values)?);
    ctx
      .log
      .detailed(format!("generating {} rows of {}", self.config.limit, self.config.fields.len()));
    Ok(())
  }

  async fn process_row(
    &mut self,
    _input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    let Some(row) = &self.row else {
      return Err(StepError::processing("generator was not initialized"));
    };
    if self.emitted >= self.config.limit {
      return Ok(ProcessOutcome::Done);
    }
    out.put(row.clone());
    self.emitted += 1;
    Ok(ProcessOutcome::Continue)
  }
}
