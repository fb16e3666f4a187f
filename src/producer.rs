//! External row injection into a step copy.

use std::sync::Arc;
use std::time::Duration;

use crate::error::RowSetError;
use crate::row_set::{Put, RowSet};
use crate::types::Row;

/// Origin name of row sets created for external producers.
pub const PRODUCER_ORIGIN: &str = "producer";

/// Handle returned by [crate::TransController::add_row_producer].
///
/// Rows put here arrive on an extra input row set of the target copy; the
/// caller must call [RowProducer::finished] so the copy sees end of input.
#[derive(Debug, Clone)]
pub struct RowProducer {
  step: String,
  copy: usize,
  rowset: Arc<RowSet>,
}

impl RowProducer {
  pub(crate) fn new(step: impl Into<String>, copy: usize, capacity: usize) -> Self {
    let step = step.into();
    let rowset = Arc::new(RowSet::new(PRODUCER_ORIGIN, 0, &step, copy, capacity));
    Self { step, copy, rowset }
  }

  pub fn step(&self) -> &str {
    &self.step
  }

  pub fn copy(&self) -> usize {
    self.copy
  }

  pub fn rowset(&self) -> &Arc<RowSet> {
    &self.rowset
  }

  /// Puts a row, waiting while the row set is full.
  ///
  /// Returns `Ok(false)` if the step copy stopped reading.
  pub async fn put_row(&self, row: Row) -> Result<bool, RowSetError> {
    self.rowset.put(row).await
  }

  /// Puts a row, waiting at most `timeout` for room.
  pub async fn put_row_wait(&self, row: Row, timeout: Duration) -> Result<Put, RowSetError> {
    self.rowset.put_timeout(row, timeout).await
  }

  /// Signals end of stream to the step copy. Idempotent.
  pub fn finished(&self) {
    self.rowset.signal_done();
  }
}
