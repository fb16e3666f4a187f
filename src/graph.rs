//! Transformation graph: steps, hops and structural validation.
//!
//! A [TransGraph] is plain data until [crate::TransController::prepare] validates
//! it; from then on the controller holds it read-only.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::GraphError;
use crate::types::{DataMovement, HopMeta, StepMeta};

/// Steps and hops of one transformation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransGraph {
  pub name: String,
  #[serde(default)]
  pub steps: Vec<StepMeta>,
  #[serde(default)]
  pub hops: Vec<HopMeta>,
}

impl TransGraph {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      steps: Vec::new(),
      hops: Vec::new(),
    }
  }

  pub fn add_step(&mut self, step: StepMeta) -> &mut Self {
    self.steps.push(step);
    self
  }

  pub fn add_hop(&mut self, hop: HopMeta) -> &mut Self {
    self.hops.push(hop);
    self
  }

  /// Builder form of [TransGraph::add_step].
  pub fn with_step(mut self, step: StepMeta) -> Self {
    self.steps.push(step);
    self
  }

  /// Builder form of [TransGraph::add_hop].
  pub fn with_hop(mut self, hop: HopMeta) -> Self {
    self.hops.push(hop);
    self
  }

  pub fn step(&self, name: &str) -> Option<&StepMeta> {
    self.steps.iter().find(|s| s.name == name)
  }

  /// Enabled hops in declaration order.
  pub fn enabled_hops(&self) -> impl Iterator<Item = &HopMeta> {
    self.hops.iter().filter(|h| h.enabled)
  }

  /// Enabled hops leaving `step`, in declaration order.
  pub fn hops_from<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopMeta> + 'a {
    self.enabled_hops().filter(move |h| h.from == step)
  }

  /// Enabled hops entering `step`, in declaration order.
  pub fn hops_to<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopMeta> + 'a {
    self.enabled_hops().filter(move |h| h.to == step)
  }

  /// Steps without enabled incoming hops.
  pub fn source_steps(&self) -> Vec<&StepMeta> {
    self
      .steps
      .iter()
      .filter(|s| self.hops_to(&s.name).next().is_none())
      .collect()
  }

  /// Checks everything that can be checked without a step registry:
  /// unique names, copy counts, hop endpoints, duplicate hops, partition keys,
  /// error targets and acyclicity of the enabled hops.
  #[instrument(level = "trace", skip(self), fields(trans = %self.name))]
  pub fn validate(&self) -> Result<(), GraphError> {
    if self.steps.is_empty() {
      return Err(GraphError::Empty);
    }
    let mut names = HashSet::new();
    for step in &self.steps {
      if !names.insert(step.name.as_str()) {
        return Err(GraphError::DuplicateStep(step.name.clone()));
      }
      if step.copies == 0 {
        return Err(GraphError::InvalidCopies {
          step: step.name.clone(),
          copies: step.copies,
        });
      }
    }

    let mut seen = HashSet::new();
    for hop in &self.hops {
      for end in [&hop.from, &hop.to] {
        if !names.contains(end.as_str()) {
          return Err(GraphError::DanglingHop {
            from: hop.from.clone(),
            to: hop.to.clone(),
            missing: end.clone(),
          });
        }
      }
      if !hop.enabled {
        continue;
      }
      if !seen.insert((hop.from.as_str(), hop.to.as_str())) {
        return Err(GraphError::DuplicateHop {
          from: hop.from.clone(),
          to: hop.to.clone(),
        });
      }
      if let DataMovement::Partition(p) = &hop.movement
        && p.fields.is_empty()
      {
        return Err(GraphError::EmptyPartitionKey {
          from: hop.from.clone(),
          to: hop.to.clone(),
        });
      }
    }

    for step in &self.steps {
      if let Some(eh) = &step.error_handling
        && !seen.contains(&(step.name.as_str(), eh.target_step.as_str()))
      {
        return Err(GraphError::InvalidErrorTarget {
          step: step.name.clone(),
          target: eh.target_step.clone(),
        });
      }
    }

    self.topological_order().map(|_| ())
  }

  /// Step names ordered so every enabled hop points forward (Kahn's algorithm).
  /// Ties keep declaration order.
  pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
    let mut in_degree: HashMap<&str, usize> =
      self.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for hop in self.enabled_hops() {
      adjacency
        .entry(hop.from.as_str())
        .or_default()
        .push(hop.to.as_str());
      if let Some(d) = in_degree.get_mut(hop.to.as_str()) {
        *d += 1;
      }
    }

    let mut queue: VecDeque<&str> = self
      .steps
      .iter()
      .map(|s| s.name.as_str())
      .filter(|n| in_degree.get(n) == Some(&0))
      .collect();
    let mut order = Vec::with_capacity(self.steps.len());
    while let Some(name) = queue.pop_front() {
      order.push(name.to_string());
      for next in adjacency.get(name).into_iter().flatten() {
        if let Some(d) = in_degree.get_mut(next) {
          *d -= 1;
          if *d == 0 {
            queue.push_back(next);
          }
        }
      }
    }

    if order.len() != self.steps.len() {
      let stuck = self
        .steps
        .iter()
        .filter(|s| in_degree.get(s.name.as_str()).is_some_and(|d| *d > 0))
        .map(|s| s.name.clone())
        .collect();
      return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
  }
}
