//! Engine configuration.
//!
//! Defaults follow the classic engine defaults; every knob can be overridden
//! from `HOPFLOW_*` environment variables via [TransConfig::from_env].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default row set capacity.
pub const DEFAULT_ROWSET_SIZE: usize = 10_000;
/// Default number of rows between feedback log lines.
pub const DEFAULT_FEEDBACK_SIZE: u64 = 50_000;
/// Default number of lines kept by the log buffer.
pub const DEFAULT_LOG_BUFFER_SIZE: usize = 5_000;
/// Default wait slice for blocking row set reads and writes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

pub const ENV_ROWSET_SIZE: &str = "HOPFLOW_ROWSET_SIZE";
pub const ENV_FEEDBACK_SIZE: &str = "HOPFLOW_FEEDBACK_SIZE";
pub const ENV_LOG_BUFFER_SIZE: &str = "HOPFLOW_LOG_BUFFER_SIZE";
pub const ENV_POLL_INTERVAL_MS: &str = "HOPFLOW_POLL_INTERVAL_MS";

/// Runtime settings of one transformation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransConfig {
  /// Capacity of every row set in the mesh.
  pub rowset_size: usize,
  /// Log a progress line every this many rows read (0 disables feedback).
  pub feedback_size: u64,
  /// Lines retained by the log buffer.
  pub log_buffer_size: usize,
  /// Wait slice used by workers between stop-flag checks while blocked.
  pub poll_interval_ms: u64,
}

impl Default for TransConfig {
  fn default() -> Self {
    Self {
      rowset_size: DEFAULT_ROWSET_SIZE,
      feedback_size: DEFAULT_FEEDBACK_SIZE,
      log_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
      poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
    }
  }
}

impl TransConfig {
  /// Defaults overlaid with any `HOPFLOW_*` environment variables.
  pub fn from_env() -> Self {
    Self::default().with_env_overrides(|k| std::env::var(k).ok())
  }

  /// Applies overrides from `lookup` (an environment-like key lookup).
  /// Unparseable values are ignored with a warning.
  pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(v) = parse_var(&lookup, ENV_ROWSET_SIZE) {
      self.rowset_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_FEEDBACK_SIZE) {
      self.feedback_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_LOG_BUFFER_SIZE) {
      self.log_buffer_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_POLL_INTERVAL_MS) {
      self.poll_interval_ms = v;
    }
    self
  }

  pub fn with_rowset_size(mut self, rowset_size: usize) -> Self {
    self.rowset_size = rowset_size;
    self
  }

  pub fn with_feedback_size(mut self, feedback_size: u64) -> Self {
    self.feedback_size = feedback_size;
    self
  }

  pub fn with_log_buffer_size(mut self, log_buffer_size: usize) -> Self {
    self.log_buffer_size = log_buffer_size;
    self
  }

  /// Row set capacity, never below one.
  pub fn effective_rowset_size(&self) -> usize {
    self.rowset_size.max(1)
  }

  /// Wait slice between stop checks, never zero.
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
  let raw = lookup(key)?;
  match raw.trim().parse() {
    Ok(v) => Some(v),
    Err(_) => {
      warn!(key, value = %raw, "ignoring unparseable configuration override");
      None
    }
  }
}
