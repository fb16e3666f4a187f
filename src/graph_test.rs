//! Tests for `TransGraph`.

use crate::error::GraphError;
use crate::graph::TransGraph;
use crate::types::{ErrorHandlingMeta, HopMeta, StepMeta};

fn chain() -> TransGraph {
  TransGraph::new("chain")
    .with_step(StepMeta::new("in", "injector"))
    .with_step(StepMeta::new("a", "dummy"))
    .with_step(StepMeta::new("b", "dummy"))
    .with_hop(HopMeta::new("in", "a"))
    .with_hop(HopMeta::new("a", "b"))
}

#[test]
fn valid_chain_passes() {
  let g = chain();
  g.validate().unwrap();
  assert_eq!(g.topological_order().unwrap(), vec!["in", "a", "b"]);
  let sources: Vec<_> = g.source_steps().iter().map(|s| s.name.clone()).collect();
  assert_eq!(sources, vec!["in"]);
}

#[test]
fn empty_graph_is_rejected() {
  assert_eq!(TransGraph::new("x").validate(), Err(GraphError::Empty));
}

#[test]
fn duplicate_step_is_rejected() {
  let g = chain().with_step(StepMeta::new("a", "dummy"));
  assert_eq!(g.validate(), Err(GraphError::DuplicateStep("a".into())));
}

#[test]
fn zero_copies_is_rejected() {
  let g = chain().with_step(StepMeta::new("z", "dummy").with_copies(0));
  assert!(matches!(
    g.validate(),
    Err(GraphError::InvalidCopies { copies: 0, .. })
  ));
}

#[test]
fn dangling_hop_is_rejected() {
  let g = chain().with_hop(HopMeta::new("b", "ghost"));
  match g.validate() {
    Err(GraphError::DanglingHop { missing, .. }) => assert_eq!(missing, "ghost"),
    other => panic!("expected dangling hop, got {other:?}"),
  }
}

#[test]
fn duplicate_enabled_hop_is_rejected_but_disabled_copy_is_fine() {
  let g = chain().with_hop(HopMeta::new("a", "b").disabled());
  g.validate().unwrap();
  let g = chain().with_hop(HopMeta::copy("a", "b"));
  assert!(matches!(g.validate(), Err(GraphError::DuplicateHop { .. })));
}

#[test]
fn cycle_is_rejected() {
  let g = chain().with_hop(HopMeta::new("b", "a"));
  match g.validate() {
    Err(GraphError::Cycle(steps)) => assert_eq!(steps, vec!["a", "b"]),
    other => panic!("expected cycle, got {other:?}"),
  }
}

#[test]
fn disabled_hop_does_not_close_a_cycle() {
  let g = chain().with_hop(HopMeta::new("b", "a").disabled());
  g.validate().unwrap();
  assert_eq!(g.hops_to("a").count(), 1);
}

#[test]
fn partition_without_fields_is_rejected() {
  let g = chain()
    .with_step(StepMeta::new("p", "dummy"))
    .with_hop(HopMeta::partitioned("b", "p", Vec::<String>::new()));
  assert!(matches!(
    g.validate(),
    Err(GraphError::EmptyPartitionKey { .. })
  ));
}

#[test]
fn error_target_needs_a_hop() {
  let mut g = chain();
  g.steps[1] = StepMeta::new("a", "dummy").with_error_handling(ErrorHandlingMeta::new("in"));
  assert!(matches!(
    g.validate(),
    Err(GraphError::InvalidErrorTarget { .. })
  ));
  g.steps[1] = StepMeta::new("a", "dummy").with_error_handling(ErrorHandlingMeta::new("b"));
  g.validate().unwrap();
}

#[test]
fn hops_from_keeps_declaration_order() {
  let g = TransGraph::new("fan")
    .with_step(StepMeta::new("a", "dummy"))
    .with_step(StepMeta::new("c", "dummy"))
    .with_step(StepMeta::new("b", "dummy"))
    .with_hop(HopMeta::new("a", "c"))
    .with_hop(HopMeta::new("a", "b"));
  let targets: Vec<_> = g.hops_from("a").map(|h| h.to.as_str()).collect();
  assert_eq!(targets, vec!["c", "b"]);
}

#[test]
fn graph_roundtrips_through_json() {
  let g = chain();
  let json = serde_json::to_string(&g).unwrap();
  let back: TransGraph = serde_json::from_str(&json).unwrap();
  assert_eq!(back, g);
}
