//! Run-scoped logging: a bounded ring of recent lines plus a channel tree.
//!
//! Every step copy logs through its own [LogChannel], a child of the run's
//! root channel. Lines land in the shared [LogBuffer] and are mirrored to
//! `tracing`. The [LogStore] is owned by the controller and released when the
//! run is disposed.

mod log_buffer;
mod log_store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use log_buffer::LogBuffer;
pub use log_store::{LogChannel, LogStore};

/// Verbosity of a log line, least verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
  Error,
  Minimal,
  Basic,
  Detailed,
  Debug,
  RowLevel,
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Error => "error",
      LogLevel::Minimal => "minimal",
      LogLevel::Basic => "basic",
      LogLevel::Detailed => "detailed",
      LogLevel::Debug => "debug",
      LogLevel::RowLevel => "rowlevel",
    };
    f.write_str(s)
  }
}

/// One buffered log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
  /// Monotonic per-buffer sequence number, starting at 1.
  pub nr: u64,
  pub channel_id: Uuid,
  /// Name of the channel at the time of logging (e.g. `"fanout.0"`).
  pub channel: String,
  pub level: LogLevel,
  pub timestamp: DateTime<Utc>,
  pub message: String,
}

impl fmt::Display for LogLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} - {} - {}",
      self.timestamp.format("%Y/%m/%d %H:%M:%S"),
      self.channel,
      self.message
    )
  }
}
