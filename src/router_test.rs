//! Tests for `Router` and `partition_index`.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use crate::error::RouterError;
use crate::row_set::{Fetch, RowSet};
use crate::router::{OutputLane, Router, partition_index};
use crate::types::{DataMovement, PartitionMeta, Row, RowMeta, Value, ValueType};

fn meta() -> Arc<RowMeta> {
  Arc::new(RowMeta::from_pairs([
    ("id", ValueType::Integer),
    ("key", ValueType::String),
  ]))
}

fn row(meta: &Arc<RowMeta>, id: i64, key: &str) -> Row {
  Row::new(Arc::clone(meta), vec![Value::Integer(id), Value::from(key)]).unwrap()
}

fn rowsets(to: &str, copies: usize) -> Vec<Arc<RowSet>> {
  (0..copies)
    .map(|c| Arc::new(RowSet::new("src", 0, to, c, 1024)))
    .collect()
}

fn drain(rs: &RowSet) -> Vec<i64> {
  let mut ids = Vec::new();
  while let Ok(Fetch::Row(r)) = rs.try_get() {
    ids.push(r.value(0).and_then(Value::as_integer).unwrap());
  }
  ids
}

fn deliver(router: &mut Router, rows: &[Row]) {
  for r in rows {
    for rs in router.destinations(r).unwrap() {
      rs.try_put(r.clone()).unwrap();
    }
  }
}

#[test]
fn distribute_rotates_across_hops_in_declaration_order() {
  let m = meta();
  let b = rowsets("b", 1);
  let c = rowsets("c", 1);
  let mut router = Router::new(vec![
    OutputLane::new("b", DataMovement::Distribute, b.clone()),
    OutputLane::new("c", DataMovement::Distribute, c.clone()),
  ]);
  let rows: Vec<Row> = (1..=7).map(|i| row(&m, i, "k")).collect();
  deliver(&mut router, &rows);
  assert_eq!(drain(&b[0]), vec![1, 3, 5, 7]);
  assert_eq!(drain(&c[0]), vec![2, 4, 6]);
}

#[test]
fn copy_lane_is_independent_of_distribute_rotation() {
  let m = meta();
  let all = rowsets("all", 2);
  let some = rowsets("some", 2);
  let mut router = Router::new(vec![
    OutputLane::new("all", DataMovement::Copy, all.clone()),
    OutputLane::new("some", DataMovement::Distribute, some.clone()),
  ]);
  let rows: Vec<Row> = (0..4).map(|i| row(&m, i, "k")).collect();
  deliver(&mut router, &rows);
  assert_eq!(drain(&all[0]), vec![0, 1, 2, 3]);
  assert_eq!(drain(&all[1]), vec![0, 1, 2, 3]);
  assert_eq!(drain(&some[0]), vec![0, 2]);
  assert_eq!(drain(&some[1]), vec![1, 3]);
}

#[test]
fn copy_shares_row_storage() {
  let m = meta();
  let all = rowsets("all", 2);
  let mut router = Router::new(vec![OutputLane::new("all", DataMovement::Copy, all.clone())]);
  let r = row(&m, 1, "k");
  deliver(&mut router, std::slice::from_ref(&r));
  let (Ok(Fetch::Row(a)), Ok(Fetch::Row(b))) = (all[0].try_get(), all[1].try_get()) else {
    panic!("both copies should receive the row");
  };
  assert!(a.shares_values_with(&b));
}

#[test]
fn cancelled_targets_are_skipped() {
  let m = meta();
  let t = rowsets("t", 3);
  t[1].cancel();
  let mut router = Router::new(vec![OutputLane::new("t", DataMovement::Distribute, t.clone())]);
  let rows: Vec<Row> = (0..4).map(|i| row(&m, i, "k")).collect();
  deliver(&mut router, &rows);
  assert_eq!(drain(&t[0]), vec![0, 2]);
  assert_eq!(drain(&t[2]), vec![1, 3]);
  assert!(!router.all_closed());
  t[0].cancel();
  t[2].cancel();
  assert!(router.all_closed());
  assert!(router.next_distributed().is_none());
}

#[test]
fn all_closed_is_false_without_outputs() {
  let router = Router::new(Vec::new());
  assert!(!router.all_closed());
}

#[test]
fn error_lane_is_excluded_from_normal_routing() {
  let m = meta();
  let ok = rowsets("ok", 1);
  let bad = rowsets("bad", 1);
  let mut router = Router::new(vec![
    OutputLane::new("ok", DataMovement::Distribute, ok.clone()),
    OutputLane::new("bad", DataMovement::Distribute, bad.clone()).error(),
  ]);
  let r = row(&m, 1, "k");
  let dests = router.destinations(&r).unwrap();
  assert_eq!(dests.len(), 1);
  assert_eq!(dests[0].dest_step(), "ok");
  let errs = router.error_destinations(&r).unwrap();
  assert_eq!(errs.len(), 1);
  assert_eq!(errs[0].dest_step(), "bad");
  assert!(router.has_error_lane());
}

#[test]
fn targeted_output_uses_the_lane_movement() {
  let m = meta();
  let b = rowsets("b", 2);
  let c = rowsets("c", 1);
  let mut router = Router::new(vec![
    OutputLane::new("b", DataMovement::Distribute, b.clone()),
    OutputLane::new("c", DataMovement::Copy, c),
  ]);
  let r = row(&m, 1, "k");
  let first = router.destinations_to("b", &r).unwrap();
  let second = router.destinations_to("b", &r).unwrap();
  assert_eq!(first[0].dest_copy(), 0);
  assert_eq!(second[0].dest_copy(), 1);
  assert!(matches!(
    router.destinations_to("nope", &r),
    Err(RouterError::UnknownTarget(_))
  ));
}

#[test]
fn integer_key_partitions_by_modulo() {
  let m = meta();
  let p = PartitionMeta::on(["id"]);
  assert_eq!(partition_index(&row(&m, 7, "k"), &p, 3).unwrap(), 1);
  assert_eq!(partition_index(&row(&m, -1, "k"), &p, 3).unwrap(), 2);
}

#[test]
fn missing_partition_field_is_an_error() {
  let m = meta();
  let p = PartitionMeta::on(["nope"]);
  assert_eq!(
    partition_index(&row(&m, 1, "k"), &p, 2).unwrap_err(),
    RouterError::MissingPartitionField("nope".into())
  );
}

proptest! {
  #[test]
  fn copy_delivers_every_row_to_every_target(n in 1usize..5, count in 0i64..50) {
    let m = meta();
    let t = rowsets("t", n);
    let mut router = Router::new(vec![OutputLane::new("t", DataMovement::Copy, t.clone())]);
    let rows: Vec<Row> = (0..count).map(|i| row(&m, i, "k")).collect();
    deliver(&mut router, &rows);
    for rs in &t {
      prop_assert_eq!(drain(rs), (0..count).collect::<Vec<_>>());
    }
  }

  #[test]
  fn distribute_delivers_each_row_exactly_once(n in 1usize..6, count in 0i64..60) {
    let m = meta();
    let t = rowsets("t", n);
    let mut router = Router::new(vec![OutputLane::new("t", DataMovement::Distribute, t.clone())]);
    let rows: Vec<Row> = (0..count).map(|i| row(&m, i, "k")).collect();
    deliver(&mut router, &rows);
    let mut all = Vec::new();
    for (c, rs) in t.iter().enumerate() {
      let got = drain(rs);
      for id in &got {
        prop_assert_eq!((*id as usize) % n, c);
      }
      all.extend(got);
    }
    all.sort_unstable();
    prop_assert_eq!(all, (0..count).collect::<Vec<_>>());
  }

  #[test]
  fn partition_keeps_keys_together(
    n in 1usize..6,
    keys in proptest::collection::vec("[a-e]{1,3}", 1..80),
  ) {
    let m = meta();
    let t = rowsets("t", n);
    let mut router = Router::new(vec![OutputLane::new(
      "t",
      DataMovement::Partition(PartitionMeta::on(["key"])),
      t.clone(),
    )]);
    let mut where_key: HashMap<String, usize> = HashMap::new();
    for (i, k) in keys.iter().enumerate() {
      let r = row(&m, i as i64, k);
      let dests = router.destinations(&r).unwrap();
      prop_assert_eq!(dests.len(), 1);
      let copy = dests[0].dest_copy();
      let first = *where_key.entry(k.clone()).or_insert(copy);
      prop_assert_eq!(first, copy);
    }
  }
}
