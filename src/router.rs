//! Per-copy output routing: which row sets receive a written row.
//!
//! A step copy owns one [Router] over its output lanes (one lane per enabled
//! outgoing hop, holding that hop's row sets in target-copy order):
//! - **Copy** lanes receive every row on every row set.
//! - **Distribute** lanes of a step share one rotation over all their row sets,
//!   in hop declaration order and then target copy order.
//! - **Partition** lanes send a row to the target copy selected by its key.
//!
//! The error lane (if any) is excluded from normal routing and only serves
//! [Router::error_destinations]. Cancelled row sets are skipped.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

use crate::error::RouterError;
use crate::row_set::RowSet;
use crate::types::{DataMovement, PartitionMeta, Row, Value};

/// Output row sets of one hop, as seen from one producer copy.
#[derive(Debug, Clone)]
pub struct OutputLane {
  pub target: String,
  pub movement: DataMovement,
  /// Carries error rows only.
  pub is_error: bool,
  /// Ordered by destination copy.
  pub rowsets: Vec<Arc<RowSet>>,
}

impl OutputLane {
  pub fn new(target: impl Into<String>, movement: DataMovement, rowsets: Vec<Arc<RowSet>>) -> Self {
    Self {
      target: target.into(),
      movement,
      is_error: false,
      rowsets,
    }
  }

  pub fn error(mut self) -> Self {
    self.is_error = true;
    self
  }
}

/// Routing state of one step copy.
#[derive(Debug)]
pub struct Router {
  lanes: Vec<OutputLane>,
  /// (lane, rowset) pairs taking part in the shared distribute rotation.
  rotation: Vec<(usize, usize)>,
  rotation_cursor: usize,
  /// Rotation cursors for targeted and error output, one per lane.
  lane_cursors: Vec<usize>,
}

impl Router {
  pub fn new(lanes: Vec<OutputLane>) -> Self {
    let rotation = lanes
      .iter()
      .enumerate()
      .filter(|(_, l)| !l.is_error && l.movement == DataMovement::Distribute)
      .flat_map(|(li, l)| (0..l.rowsets.len()).map(move |ri| (li, ri)))
      .collect();
    let lane_cursors = vec![0; lanes.len()];
    Self {
      lanes,
      rotation,
      rotation_cursor: 0,
      lane_cursors,
    }
  }

  pub fn lanes(&self) -> &[OutputLane] {
    &self.lanes
  }

  /// Every output row set, error lane included.
  pub fn rowsets(&self) -> impl Iterator<Item = &Arc<RowSet>> {
    self.lanes.iter().flat_map(|l| l.rowsets.iter())
  }

  pub fn has_error_lane(&self) -> bool {
    self.lanes.iter().any(|l| l.is_error)
  }

  /// True when the step has regular outputs and every one of them was
  /// cancelled by its consumer.
  pub fn all_closed(&self) -> bool {
    let mut regular = self
      .lanes
      .iter()
      .filter(|l| !l.is_error)
      .flat_map(|l| l.rowsets.iter())
      .peekable();
    regular.peek().is_some() && regular.all(|rs| rs.is_cancelled())
  }

  /// Destinations of a regular output row.
  pub fn destinations(&mut self, row: &Row) -> Result<Vec<Arc<RowSet>>, RouterError> {
    let mut out = Vec::new();
    for lane in self.lanes.iter().filter(|l| !l.is_error) {
      match &lane.movement {
        DataMovement::Copy => out.extend(open(&lane.rowsets).cloned()),
        DataMovement::Partition(p) => {
          if let Some(rs) = partition_target(lane, p, row)? {
            out.push(rs);
          }
        }
        DataMovement::Distribute => {}
      }
    }
    if let Some(rs) = self.next_distributed() {
      out.push(rs);
    }
    Ok(out)
  }

  /// Next open row set of the shared distribute rotation, if any. Cancelled
  /// row sets are skipped.
  pub fn next_distributed(&mut self) -> Option<Arc<RowSet>> {
    let n = self.rotation.len();
    for _ in 0..n {
      let (li, ri) = self.rotation[self.rotation_cursor % n];
      self.rotation_cursor = (self.rotation_cursor + 1) % n;
      let rs = &self.lanes[li].rowsets[ri];
      if !rs.is_cancelled() {
        return Some(Arc::clone(rs));
      }
    }
    None
  }

  /// Destinations of a row addressed to one target step.
  pub fn destinations_to(
    &mut self,
    target: &str,
    row: &Row,
  ) -> Result<Vec<Arc<RowSet>>, RouterError> {
    let li = self
      .lanes
      .iter()
      .position(|l| !l.is_error && l.target == target)
      .ok_or_else(|| RouterError::UnknownTarget(target.to_string()))?;
    self.lane_destinations(li, row)
  }

  /// Destinations of an error row; empty when no error lane exists.
  pub fn error_destinations(&mut self, row: &Row) -> Result<Vec<Arc<RowSet>>, RouterError> {
    match self.lanes.iter().position(|l| l.is_error) {
      Some(li) => self.lane_destinations(li, row),
      None => Ok(Vec::new()),
    }
  }

  fn lane_destinations(&mut self, li: usize, row: &Row) -> Result<Vec<Arc<RowSet>>, RouterError> {
    let lane = &self.lanes[li];
    match &lane.movement {
      DataMovement::Copy => Ok(open(&lane.rowsets).cloned().collect()),
      DataMovement::Partition(p) => Ok(partition_target(lane, p, row)?.into_iter().collect()),
      DataMovement::Distribute => {
        let n = lane.rowsets.len();
        for _ in 0..n {
          let i = self.lane_cursors[li] % n;
          self.lane_cursors[li] = (i + 1) % n;
          if !lane.rowsets[i].is_cancelled() {
            return Ok(vec![Arc::clone(&lane.rowsets[i])]);
          }
        }
        Ok(Vec::new())
      }
    }
  }
}

fn open(rowsets: &[Arc<RowSet>]) -> impl Iterator<Item = &Arc<RowSet>> {
  rowsets.iter().filter(|rs| !rs.is_cancelled())
}

fn partition_target(
  lane: &OutputLane,
  partition: &PartitionMeta,
  row: &Row,
) -> Result<Option<Arc<RowSet>>, RouterError> {
  if lane.rowsets.is_empty() {
    return Ok(None);
  }
  let i = partition_index(row, partition, lane.rowsets.len())?;
  let rs = &lane.rowsets[i];
  Ok((!rs.is_cancelled()).then(|| Arc::clone(rs)))
}

/// Destination copy in `0..copies` for `row` under `partition`.
///
/// A single integer key maps by `key mod copies` (non-negative); any other key
/// is hashed. Deterministic for equal keys within and across runs of one build.
pub fn partition_index(
  row: &Row,
  partition: &PartitionMeta,
  copies: usize,
) -> Result<usize, RouterError> {
  let copies = copies.max(1);
  let mut keys = Vec::with_capacity(partition.fields.len());
  for field in &partition.fields {
    let value = row
      .get(field)
      .ok_or_else(|| RouterError::MissingPartitionField(field.clone()))?;
    keys.push(value);
  }
  if let [Value::Integer(k)] = keys.as_slice() {
    return Ok(k.rem_euclid(copies as i64) as usize);
  }
  let mut hasher = DefaultHasher::new();
  for key in keys {
    key.hash_into(&mut hasher);
  }
  Ok((hasher.finish() % copies as u64) as usize)
}
