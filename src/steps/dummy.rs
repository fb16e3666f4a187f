//! Pass-through step.

use async_trait::async_trait;

use crate::error::StepError;
use crate::step::{ProcessOutcome, Step, StepInput, StepOutput};

/// Writes every input row unchanged. Without inputs it finishes at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStep;

#[async_trait]
impl Step for DummyStep {
  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    match input {
      StepInput::Row(row) => {
        out.put(row);
        Ok(ProcessOutcome::Continue)
      }
      StepInput::Rows(rows) => {
        rows.into_iter().for_each(|r| out.put(r));
        Ok(ProcessOutcome::Continue)
      }
      StepInput::Empty | StepInput::EndOfInput => Ok(ProcessOutcome::Done),
    }
  }
}
