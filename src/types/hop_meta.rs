//! Directed edges between steps and their row movement policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fields whose values decide the destination copy of a partitioned hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
  pub fields: Vec<String>,
}

impl PartitionMeta {
  pub fn on<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
    Self {
      fields: fields.into_iter().map(Into::into).collect(),
    }
  }
}

/// How rows leaving a step travel over one hop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMovement {
  /// Every row goes to every destination row set of the hop.
  Copy,
  /// Each row goes to exactly one destination, round robin.
  #[default]
  Distribute,
  /// Each row goes to the destination copy selected by its key fields.
  Partition(PartitionMeta),
}

impl fmt::Display for DataMovement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataMovement::Copy => write!(f, "copy"),
      DataMovement::Distribute => write!(f, "distribute"),
      DataMovement::Partition(p) => write!(f, "partition({})", p.fields.join(",")),
    }
  }
}

/// A directed edge between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopMeta {
  pub from: String,
  pub to: String,
  #[serde(default = "enabled_default")]
  pub enabled: bool,
  #[serde(default)]
  pub movement: DataMovement,
}

fn enabled_default() -> bool {
  true
}

impl HopMeta {
  /// An enabled hop using the default movement ([DataMovement::Distribute]).
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      enabled: true,
      movement: DataMovement::default(),
    }
  }

  pub fn copy(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self::new(from, to).with_movement(DataMovement::Copy)
  }

  pub fn partitioned<S: Into<String>>(
    from: impl Into<String>,
    to: impl Into<String>,
    fields: impl IntoIterator<Item = S>,
  ) -> Self {
    Self::new(from, to).with_movement(DataMovement::Partition(PartitionMeta::on(fields)))
  }

  pub fn with_movement(mut self, movement: DataMovement) -> Self {
    self.movement = movement;
    self
  }

  pub fn disabled(mut self) -> Self {
    self.enabled = false;
    self
  }

  /// Partitioned hops always use a full source-copy x target-copy mesh.
  pub fn repartitions(&self) -> bool {
    matches!(self.movement, DataMovement::Partition(_))
  }
}

impl fmt::Display for HopMeta {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} -> {} ({})", self.from, self.to, self.movement)
  }
}
