//! Fixed-capacity ring of recent log lines.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::LogLine;

#[derive(Debug, Default)]
struct Ring {
  lines: VecDeque<LogLine>,
  next_nr: u64,
}

/// Bounded, thread-safe buffer. When full, the oldest line is evicted.
///
/// Appends and reads take the same short-lived lock; readers copy out a
/// snapshot and never hold the lock while the caller inspects lines.
#[derive(Debug)]
pub struct LogBuffer {
  capacity: usize,
  ring: Mutex<Ring>,
}

impl LogBuffer {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      ring: Mutex::new(Ring {
        lines: VecDeque::new(),
        next_nr: 1,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Ring> {
    self.ring.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Appends a line, assigning its sequence number. Returns that number.
  pub fn push(&self, line: LogLine) -> u64 {
    self.push_if(line, || true).unwrap_or(0)
  }

  /// Appends only if `admit` (evaluated under the buffer lock) returns true.
  pub(crate) fn push_if(&self, mut line: LogLine, admit: impl FnOnce() -> bool) -> Option<u64> {
    let mut ring = self.lock();
    if !admit() {
      return None;
    }
    line.nr = ring.next_nr;
    ring.next_nr += 1;
    if ring.lines.len() >= self.capacity {
      ring.lines.pop_front();
    }
    let nr = line.nr;
    ring.lines.push_back(line);
    Some(nr)
  }

  pub fn len(&self) -> usize {
    self.lock().lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().lines.is_empty()
  }

  /// Number the next appended line will get.
  pub fn next_nr(&self) -> u64 {
    self.lock().next_nr
  }

  /// Snapshot of all buffered lines, oldest first.
  pub fn lines(&self) -> Vec<LogLine> {
    self.lock().lines.iter().cloned().collect()
  }

  /// Buffered lines with `nr > after`, for incremental readers.
  pub fn lines_after(&self, after: u64) -> Vec<LogLine> {
    self
      .lock()
      .lines
      .iter()
      .filter(|l| l.nr > after)
      .cloned()
      .collect()
  }

  /// Buffered lines belonging to any of `channels`.
  pub fn lines_for(&self, channels: &HashSet<Uuid>) -> Vec<LogLine> {
    self
      .lock()
      .lines
      .iter()
      .filter(|l| channels.contains(&l.channel_id))
      .cloned()
      .collect()
  }

  /// Drops every line belonging to `channels`. Returns how many were removed.
  pub fn remove_channels(&self, channels: &HashSet<Uuid>) -> usize {
    let mut ring = self.lock();
    let before = ring.lines.len();
    ring.lines.retain(|l| !channels.contains(&l.channel_id));
    before - ring.lines.len()
  }

  pub fn clear(&self) {
    self.lock().lines.clear();
  }
}
