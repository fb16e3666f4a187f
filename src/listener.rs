//! Row observers attached to step copies.
//!
//! Listeners run synchronously on the worker that owns the copy, right after
//! a row is read or written, so they must stay cheap. [RowTap] hands rows to
//! an unbounded channel and never blocks the worker.
//!
//! [TransListener] observes the run as a whole: it hears once when every copy
//! was spawned and once when the run result is final.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::types::{Row, RunResult};

/// Observer of one step copy's row traffic.
pub trait RowListener: Send + Sync {
  /// A row was taken from an input row set.
  fn row_read(&self, _row: &Row) {}
  /// A row was written to the regular outputs (once per logical row).
  fn row_written(&self, _row: &Row) {}
  /// A row was rejected to the error hop (the extended error row).
  fn error_row_written(&self, _row: &Row) {}
}

/// Observer of a whole transformation run.
pub trait TransListener: Send + Sync {
  /// Every copy initialized and its task spawned.
  fn trans_started(&self, _trans: &str) {}
  /// The run reached Finished. Also called when `start` failed to initialize a copy.
  fn trans_finished(&self, _result: &RunResult) {}
}

#[derive(Debug, Default)]
struct Collected {
  read: Vec<Row>,
  written: Vec<Row>,
  errors: Vec<Row>,
}

/// Keeps every observed row in memory. Useful for tests and previews.
#[derive(Debug, Default)]
pub struct RowCollector {
  rows: Mutex<Collected>,
}

impl RowCollector {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Collected> {
    self.rows.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn read(&self) -> Vec<Row> {
    self.lock().read.clone()
  }

  pub fn written(&self) -> Vec<Row> {
    self.lock().written.clone()
  }

  pub fn errors(&self) -> Vec<Row> {
    self.lock().errors.clone()
  }

  pub fn clear(&self) {
    let mut c = self.lock();
    c.read.clear();
    c.written.clear();
    c.errors.clear();
  }
}

impl RowListener for RowCollector {
  fn row_read(&self, row: &Row) {
    self.lock().read.push(row.clone());
  }

  fn row_written(&self, row: &Row) {
    self.lock().written.push(row.clone());
  }

  fn error_row_written(&self, row: &Row) {
    self.lock().errors.push(row.clone());
  }
}

/// Forwards written rows into a stream.
#[derive(Debug, Clone)]
pub struct RowTap {
  tx: mpsc::UnboundedSender<Row>,
}

impl RowTap {
  /// A tap and the stream it feeds. The stream ends once the tap (and every
  /// clone of it) is dropped, which happens when the run is disposed.
  pub fn new() -> (Self, UnboundedReceiverStream<Row>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, UnboundedReceiverStream::new(rx))
  }
}

impl RowListener for RowTap {
  fn row_written(&self, row: &Row) {
    // A dropped receiver only means nobody is watching anymore.
    let _ = self.tx.send(row.clone());
  }
}
