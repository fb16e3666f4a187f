//! Bounded hand-off queue between one producer copy and one consumer copy.
//!
//! A [RowSet] carries three terminal signals:
//! - **done**: the producer will put no more rows; `get` drains what is queued
//!   and then reports [Fetch::Drained].
//! - **cancelled**: the consumer stopped reading; `put` reports
//!   [Put::Cancelled] so the producer can stop.
//! - **errored**: forced abort; both sides fail immediately with
//!   [RowSetError::Errored].
//!
//! Waiting uses two [Notify] handles (not-empty / not-full) next to a
//! `std::sync::Mutex` guarding the queue. The mutex is never held across an
//! `.await`; `notify_one` stores a permit when nobody waits, so a wakeup sent
//! between the state check and the wait is not lost.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use crate::error::RowSetError;
use crate::types::{Row, RowMeta};

/// Result of a non-blocking or timed read.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
  /// The next row in FIFO order.
  Row(Row),
  /// Nothing queued right now; the producer is still open.
  Empty,
  /// The producer signalled done (or the consumer cancelled) and the queue is drained.
  Drained,
}

/// Result of a non-blocking or timed write.
#[derive(Debug, Clone, PartialEq)]
pub enum Put {
  Accepted,
  /// Queue at capacity; the row is handed back to the caller.
  Full(Row),
  /// The consumer no longer reads; the producer should stop writing here.
  Cancelled,
}

#[derive(Debug, Default)]
struct Queue {
  rows: VecDeque<Row>,
  done: bool,
  cancelled: bool,
  errored: bool,
  meta: Option<Arc<RowMeta>>,
}

/// Bounded FIFO between `origin_step.origin_copy` and `dest_step.dest_copy`.
#[derive(Debug)]
pub struct RowSet {
  name: String,
  origin_step: String,
  origin_copy: usize,
  dest_step: String,
  dest_copy: usize,
  capacity: usize,
  queue: Mutex<Queue>,
  not_empty: Notify,
  not_full: Notify,
}

impl RowSet {
  /// Creates an open, empty row set. A zero capacity is raised to one.
  pub fn new(
    origin_step: impl Into<String>,
    origin_copy: usize,
    dest_step: impl Into<String>,
    dest_copy: usize,
    capacity: usize,
  ) -> Self {
    let origin_step = origin_step.into();
    let dest_step = dest_step.into();
    let name = format!("{origin_step}.{origin_copy} - {dest_step}.{dest_copy}");
    Self {
      name,
      origin_step,
      origin_copy,
      dest_step,
      dest_copy,
      capacity: capacity.max(1),
      queue: Mutex::new(Queue::default()),
      not_empty: Notify::new(),
      not_full: Notify::new(),
    }
  }

  /// `"from.copy - to.copy"`.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn origin_step(&self) -> &str {
    &self.origin_step
  }

  pub fn origin_copy(&self) -> usize {
    self.origin_copy
  }

  pub fn dest_step(&self) -> &str {
    &self.dest_step
  }

  pub fn dest_copy(&self) -> usize {
    self.dest_copy
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn lock(&self) -> MutexGuard<'_, Queue> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Attempts to enqueue without waiting.
  pub fn try_put(&self, row: Row) -> Result<Put, RowSetError> {
    let mut q = self.lock();
    if q.errored {
      return Err(RowSetError::Errored(self.name.clone()));
    }
    if q.cancelled || q.done {
      return Ok(Put::Cancelled);
    }
    let fixed = q.meta.get_or_insert_with(|| Arc::clone(row.meta()));
    if !RowMeta::same_shape(fixed, row.meta()) {
      return Err(RowSetError::ShapeMismatch {
        rowset: self.name.clone(),
        expected: fixed.to_string(),
        actual: row.meta().to_string(),
      });
    }
    if q.rows.len() >= self.capacity {
      return Ok(Put::Full(row));
    }
    q.rows.push_back(row);
    drop(q);
    self.not_empty.notify_one();
    Ok(Put::Accepted)
  }

  /// Enqueues `row`, waiting at most `timeout` for free capacity.
  pub async fn put_timeout(&self, row: Row, timeout: Duration) -> Result<Put, RowSetError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut row = row;
    loop {
      match self.try_put(row)? {
        Put::Full(back) => row = back,
        other => return Ok(other),
      }
      if tokio::time::timeout_at(deadline, self.not_full.notified())
        .await
        .is_err()
      {
        // One last attempt: capacity may have been freed right at the deadline.
        return self.try_put(row);
      }
    }
  }

  /// Enqueues `row`, waiting while the queue is full.
  ///
  /// Returns `Ok(true)` once accepted and `Ok(false)` if the consumer cancelled.
  pub async fn put(&self, row: Row) -> Result<bool, RowSetError> {
    let mut row = row;
    loop {
      match self.try_put(row)? {
        Put::Accepted => return Ok(true),
        Put::Cancelled => return Ok(false),
        Put::Full(back) => row = back,
      }
      self.not_full.notified().await;
    }
  }

  /// Dequeues without waiting.
  pub fn try_get(&self) -> Result<Fetch, RowSetError> {
    let mut q = self.lock();
    if q.errored {
      return Err(RowSetError::Errored(self.name.clone()));
    }
    if let Some(row) = q.rows.pop_front() {
      drop(q);
      self.not_full.notify_one();
      return Ok(Fetch::Row(row));
    }
    if q.done || q.cancelled {
      Ok(Fetch::Drained)
    } else {
      Ok(Fetch::Empty)
    }
  }

  /// Dequeues the next row, waiting at most `timeout` for one to arrive.
  pub async fn get_timeout(&self, timeout: Duration) -> Result<Fetch, RowSetError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      match self.try_get()? {
        Fetch::Empty => {}
        other => return Ok(other),
      }
      if tokio::time::timeout_at(deadline, self.not_empty.notified())
        .await
        .is_err()
      {
        return self.try_get();
      }
    }
  }

  /// Dequeues the next row, waiting while empty.
  ///
  /// Returns `Ok(None)` once the producer signalled done and the queue drained.
  pub async fn get(&self) -> Result<Option<Row>, RowSetError> {
    loop {
      match self.try_get()? {
        Fetch::Row(row) => return Ok(Some(row)),
        Fetch::Drained => return Ok(None),
        Fetch::Empty => {}
      }
      self.not_empty.notified().await;
    }
  }

  /// Producer side: no more rows will be put. Idempotent.
  pub fn signal_done(&self) {
    let mut q = self.lock();
    if q.done {
      return;
    }
    q.done = true;
    drop(q);
    trace!(rowset = %self.name, "done");
    self.not_empty.notify_one();
  }

  /// Consumer side: stop reading. Queued rows are discarded and a blocked
  /// producer wakes up with [Put::Cancelled].
  pub fn cancel(&self) {
    let mut q = self.lock();
    if q.cancelled {
      return;
    }
    q.cancelled = true;
    q.rows.clear();
    drop(q);
    trace!(rowset = %self.name, "cancelled");
    self.not_full.notify_one();
    self.not_empty.notify_one();
  }

  /// Forces both sides out of any wait with [RowSetError::Errored].
  pub fn set_errored(&self) {
    let mut q = self.lock();
    if q.errored {
      return;
    }
    q.errored = true;
    drop(q);
    trace!(rowset = %self.name, "errored");
    self.not_full.notify_one();
    self.not_empty.notify_one();
  }

  pub fn is_done(&self) -> bool {
    self.lock().done
  }

  pub fn is_cancelled(&self) -> bool {
    self.lock().cancelled
  }

  pub fn is_errored(&self) -> bool {
    self.lock().errored
  }

  /// Rows currently queued.
  pub fn size(&self) -> usize {
    self.lock().rows.len()
  }

  /// Shape fixed by the first accepted row, if any.
  pub fn row_meta(&self) -> Option<Arc<RowMeta>> {
    self.lock().meta.clone()
  }

  /// True if this row set connects exactly `from.from_copy -> to.to_copy`.
  pub fn connects(&self, from: &str, from_copy: usize, to: &str, to_copy: usize) -> bool {
    self.origin_step == from
      && self.origin_copy == from_copy
      && self.dest_step == to
      && self.dest_copy == to_copy
  }
}

impl fmt::Display for RowSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}
