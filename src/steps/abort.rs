//! Stops the copy once rows keep arriving past a threshold.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::log::LogChannel;
use crate::step::{ProcessOutcome, Step, StepContext, StepInput, StepOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortMode {
  /// Fail with a processing error.
  #[default]
  Error,
  /// Finish cleanly, as if input had ended.
  SafeStop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortConfig {
  /// Rows passed through before aborting.
  pub threshold: u64,
  pub message: Option<String>,
  pub mode: AbortMode,
}

/// Passes up to `threshold` rows, then aborts on the next one.
#[derive(Debug)]
pub struct AbortStep {
  config: AbortConfig,
  seen: u64,
  log: Option<LogChannel>,
}

impl AbortStep {
  pub fn new(config: AbortConfig) -> Self {
    Self {
      config,
      seen: 0,
      log: None,
    }
  }

  fn abort(&self) -> Result<ProcessOutcome, StepError> {
    let message = self
      .config
      .message
      .clone()
      .unwrap_or_else(|| format!("row nr {} causing abort", self.seen));
    if let Some(log) = &self.log {
      log.error(message.clone());
    }
    match self.config.mode {
      AbortMode::Error => Err(StepError::Processing(message)),
      AbortMode::SafeStop => Ok(ProcessOutcome::Done),
    }
  }
}

#[async_trait]
impl Step for AbortStep {
  async fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
    self.log = Some(ctx.log.clone());
    Ok(())
  }

  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    let rows = match input {
      StepInput::Row(row) => vec![row],
      StepInput::Rows(rows) => rows,
      StepInput::Empty | StepInput::EndOfInput => return Ok(ProcessOutcome::Done),
    };
    for row in rows {
      self.seen += 1;
      if self.seen > self.config.threshold {
        return self.abort();
      }
      out.put(row);
    }
    Ok(ProcessOutcome::Continue)
  }
}
