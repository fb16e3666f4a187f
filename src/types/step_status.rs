//! Live status snapshot of one step copy.

use serde::{Deserialize, Serialize};

use super::StepState;

/// Point-in-time view of a running (or finished) step copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
  pub step: String,
  pub copy: usize,
  pub state: StepState,
  pub lines_read: u64,
  pub lines_written: u64,
  pub lines_rejected: u64,
  pub errors: u64,
  /// Rows waiting in the copy's input row sets.
  pub input_buffer: usize,
  /// Rows waiting in the copy's output row sets.
  pub output_buffer: usize,
}
