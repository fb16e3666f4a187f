//! Aggregated outcome of one transformation run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StepState;

/// Final counters of one step copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
  pub step: String,
  pub copy: usize,
  pub state: StepState,
  pub lines_read: u64,
  pub lines_written: u64,
  pub lines_rejected: u64,
  pub errors: u64,
}

/// Returned by [crate::TransController::wait_until_finished].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
  pub trans_name: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  /// True when no copy failed and no errors were recorded.
  pub success: bool,
  /// True when `stop()` or `abort()` was requested during the run.
  pub stopped: bool,
  /// Sum of all per-copy error counts.
  pub errors: u64,
  pub steps: Vec<StepResult>,
}

impl RunResult {
  /// Builds the aggregate from per-copy results.
  pub fn from_steps(
    trans_name: impl Into<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stopped: bool,
    steps: Vec<StepResult>,
  ) -> Self {
    let errors: u64 = steps.iter().map(|s| s.errors).sum();
    let failed = steps.iter().any(|s| s.state == StepState::Failed);
    Self {
      trans_name: trans_name.into(),
      started_at,
      finished_at,
      success: errors == 0 && !failed,
      stopped,
      errors,
      steps,
    }
  }

  /// All copies of `step`, in copy order.
  pub fn copies_of<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a StepResult> + 'a {
    self.steps.iter().filter(move |s| s.step == step)
  }

  /// Rows read by all copies of `step`.
  pub fn lines_read(&self, step: &str) -> u64 {
    self.copies_of(step).map(|s| s.lines_read).sum()
  }

  /// Rows written by all copies of `step`.
  pub fn lines_written(&self, step: &str) -> u64 {
    self.copies_of(step).map(|s| s.lines_written).sum()
  }

  /// Rows rejected to the error hop by all copies of `step`.
  pub fn lines_rejected(&self, step: &str) -> u64 {
    self.copies_of(step).map(|s| s.lines_rejected).sum()
  }

  /// Errors recorded by all copies of `step`.
  pub fn step_errors(&self, step: &str) -> u64 {
    self.copies_of(step).map(|s| s.errors).sum()
  }
}
