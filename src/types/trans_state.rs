//! Aggregate run state of a transformation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Run state of a [crate::TransController].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransState {
  /// Constructed, no graph prepared yet.
  Idle,
  Prepared,
  Running,
  Stopped,
  Finished,
}

impl fmt::Display for TransState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TransState::Idle => write!(f, "idle"),
      TransState::Prepared => write!(f, "prepared"),
      TransState::Running => write!(f, "running"),
      TransState::Stopped => write!(f, "stopped"),
      TransState::Finished => write!(f, "finished"),
    }
  }
}
