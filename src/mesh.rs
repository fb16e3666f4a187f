//! Row set allocation for a validated graph.
//!
//! Each enabled hop is expanded into row sets between source and target copies
//! according to its [Dispatch] shape. Every row set has exactly one producer
//! copy and one consumer copy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::graph::TransGraph;
use crate::row_set::RowSet;
use crate::router::OutputLane;

/// How the copies on both ends of a hop are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
  /// One row set.
  OneToOne,
  /// One row set per target copy.
  OneToMany,
  /// One row set per source copy.
  ManyToOne,
  /// Source copy `i` feeds target copy `i`.
  Parallel,
  /// Every source copy feeds every target copy.
  FullMesh,
}

impl Dispatch {
  /// Shape for `from_copies -> to_copies`. Repartitioning hops between
  /// multi-copy steps always get a full mesh.
  pub fn for_copies(from_copies: usize, to_copies: usize, repartitions: bool) -> Self {
    match (from_copies, to_copies) {
      (1, 1) => Dispatch::OneToOne,
      (1, _) => Dispatch::OneToMany,
      (_, 1) => Dispatch::ManyToOne,
      (f, t) if f == t && !repartitions => Dispatch::Parallel,
      _ => Dispatch::FullMesh,
    }
  }

  /// `(source copy, target copy)` pairs, source-major.
  pub fn pairs(self, from_copies: usize, to_copies: usize) -> Vec<(usize, usize)> {
    match self {
      Dispatch::OneToOne => vec![(0, 0)],
      Dispatch::OneToMany => (0..to_copies).map(|t| (0, t)).collect(),
      Dispatch::ManyToOne => (0..from_copies).map(|f| (f, 0)).collect(),
      Dispatch::Parallel => (0..from_copies).map(|c| (c, c)).collect(),
      Dispatch::FullMesh => (0..from_copies)
        .flat_map(|f| (0..to_copies).map(move |t| (f, t)))
        .collect(),
    }
  }
}

impl fmt::Display for Dispatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dispatch::OneToOne => write!(f, "1:1"),
      Dispatch::OneToMany => write!(f, "1:N"),
      Dispatch::ManyToOne => write!(f, "N:1"),
      Dispatch::Parallel => write!(f, "N:N"),
      Dispatch::FullMesh => write!(f, "N:M"),
    }
  }
}

type CopyKey = (String, usize);

/// All row sets of one prepared transformation, indexed by step copy.
#[derive(Debug, Default)]
pub struct RowSetMesh {
  rowsets: Vec<Arc<RowSet>>,
  inputs: HashMap<CopyKey, Vec<Arc<RowSet>>>,
  outputs: HashMap<CopyKey, Vec<OutputLane>>,
}

impl RowSetMesh {
  /// Allocates row sets of `capacity` for every enabled hop of `graph`.
  ///
  /// `graph` must have passed [TransGraph::validate].
  #[instrument(level = "trace", skip(graph), fields(trans = %graph.name))]
  pub fn build(graph: &TransGraph, capacity: usize) -> Self {
    let mut mesh = RowSetMesh::default();
    for step in &graph.steps {
      for copy in 0..step.copies {
        mesh.inputs.entry((step.name.clone(), copy)).or_default();
        mesh.outputs.entry((step.name.clone(), copy)).or_default();
      }
    }

    for hop in graph.enabled_hops() {
      let (Some(from), Some(to)) = (graph.step(&hop.from), graph.step(&hop.to)) else {
        continue;
      };
      let dispatch = Dispatch::for_copies(from.copies, to.copies, hop.repartitions());
      debug!(hop = %hop, dispatch = %dispatch, "allocating row sets");
      let is_error = from.is_error_target(&to.name);

      let mut per_source: Vec<Vec<Arc<RowSet>>> = vec![Vec::new(); from.copies];
      for (fc, tc) in dispatch.pairs(from.copies, to.copies) {
        let rs = Arc::new(RowSet::new(&from.name, fc, &to.name, tc, capacity));
        per_source[fc].push(Arc::clone(&rs));
        mesh
          .inputs
          .entry((to.name.clone(), tc))
          .or_default()
          .push(Arc::clone(&rs));
        mesh.rowsets.push(rs);
      }

      for (fc, rowsets) in per_source.into_iter().enumerate() {
        let mut lane = OutputLane::new(&to.name, hop.movement.clone(), rowsets);
        if is_error {
          lane = lane.error();
        }
        mesh
          .outputs
          .entry((from.name.clone(), fc))
          .or_default()
          .push(lane);
      }
    }
    mesh
  }

  /// Every row set, in allocation order.
  pub fn rowsets(&self) -> &[Arc<RowSet>] {
    &self.rowsets
  }

  /// Input row sets of a step copy (hop declaration order, then source copy).
  pub fn inputs_of(&self, step: &str, copy: usize) -> Vec<Arc<RowSet>> {
    self
      .inputs
      .get(&(step.to_string(), copy))
      .cloned()
      .unwrap_or_default()
  }

  /// Output lanes of a step copy, one per enabled outgoing hop.
  pub fn outputs_of(&self, step: &str, copy: usize) -> Vec<OutputLane> {
    self
      .outputs
      .get(&(step.to_string(), copy))
      .cloned()
      .unwrap_or_default()
  }

  /// The row set connecting two specific copies, if one was allocated.
  pub fn find(&self, from: &str, from_copy: usize, to: &str, to_copy: usize) -> Option<Arc<RowSet>> {
    self
      .rowsets
      .iter()
      .find(|rs| rs.connects(from, from_copy, to, to_copy))
      .cloned()
  }
}
