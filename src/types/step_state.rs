//! Lifecycle state of one step copy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a step copy's runner. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
  Initialized,
  Running,
  Stopping,
  Finished,
  Failed,
}

impl StepState {
  /// Finished or Failed.
  pub fn is_terminal(self) -> bool {
    matches!(self, StepState::Finished | StepState::Failed)
  }

  pub(crate) fn as_u8(self) -> u8 {
    match self {
      StepState::Initialized => 0,
      StepState::Running => 1,
      StepState::Stopping => 2,
      StepState::Finished => 3,
      StepState::Failed => 4,
    }
  }

  pub(crate) fn from_u8(v: u8) -> Self {
    match v {
      0 => StepState::Initialized,
      1 => StepState::Running,
      2 => StepState::Stopping,
      3 => StepState::Finished,
      _ => StepState::Failed,
    }
  }

  /// Whether `self -> next` is a legal transition.
  pub fn can_transition_to(self, next: StepState) -> bool {
    use StepState::*;
    matches!(
      (self, next),
      (Initialized, Running)
        | (Initialized, Finished)
        | (Initialized, Failed)
        | (Running, Stopping)
        | (Running, Finished)
        | (Running, Failed)
        | (Stopping, Finished)
        | (Stopping, Failed)
    )
  }
}

impl fmt::Display for StepState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StepState::Initialized => write!(f, "initialized"),
      StepState::Running => write!(f, "running"),
      StepState::Stopping => write!(f, "stopping"),
      StepState::Finished => write!(f, "finished"),
      StepState::Failed => write!(f, "failed"),
    }
  }
}
