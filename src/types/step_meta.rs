//! Static description of one graph node.

use serde::{Deserialize, Serialize};

/// Error-hop configuration for a step.
///
/// Rows the step rejects through `put_error` go to `target_step` (which must be
/// one of the step's hop targets) instead of failing the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingMeta {
  /// Step receiving the error rows.
  pub target_step: String,
  /// Stop the step once more than this many rows were rejected (0 = unlimited).
  #[serde(default)]
  pub max_errors: u64,
  /// Stop the step once the rejected percentage exceeds this (0 = unlimited).
  #[serde(default)]
  pub max_percent_errors: u32,
  /// Minimum rows read before the percentage limit applies.
  #[serde(default)]
  pub min_rows_for_max_percent: u64,
}

impl ErrorHandlingMeta {
  pub fn new(target_step: impl Into<String>) -> Self {
    Self {
      target_step: target_step.into(),
      max_errors: 0,
      max_percent_errors: 0,
      min_rows_for_max_percent: 0,
    }
  }

  pub fn with_max_errors(mut self, max_errors: u64) -> Self {
    self.max_errors = max_errors;
    self
  }

  pub fn with_max_percent_errors(mut self, pct: u32, min_rows: u64) -> Self {
    self.max_percent_errors = pct;
    self.min_rows_for_max_percent = min_rows;
    self
  }
}

/// One node of a transformation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMeta {
  /// Unique name within the graph.
  pub name: String,
  /// Step-type identifier resolved through the step registry.
  pub step_type: String,
  /// Type-specific configuration, decoded by the step kind.
  #[serde(default)]
  pub config: serde_json::Value,
  /// Requested number of parallel copies (>= 1).
  pub copies: usize,
  /// Optional error hop.
  #[serde(default)]
  pub error_handling: Option<ErrorHandlingMeta>,
}

impl StepMeta {
  pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      step_type: step_type.into(),
      config: serde_json::Value::Null,
      copies: 1,
      error_handling: None,
    }
  }

  pub fn with_copies(mut self, copies: usize) -> Self {
    self.copies = copies;
    self
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn with_error_handling(mut self, error_handling: ErrorHandlingMeta) -> Self {
    self.error_handling = Some(error_handling);
    self
  }

  /// Decodes the configuration payload into a step-specific type.
  pub fn decode_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    match &self.config {
      serde_json::Value::Null => serde_json::from_value(serde_json::json!({})),
      other => serde_json::from_value(other.clone()),
    }
  }

  /// True if the hop to `target` carries error rows.
  pub fn is_error_target(&self, target: &str) -> bool {
    self
      .error_handling
      .as_ref()
      .is_some_and(|e| e.target_step == target)
  }
}
