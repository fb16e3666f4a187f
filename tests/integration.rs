//! End-to-end runs of small transformation graphs through `TransController`.
//! Each test builds a graph, injects or generates rows, and checks what the
//! terminal steps saw together with the aggregated `RunResult`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hopflow::runner::{ERROR_CODES_FIELD, ERROR_DESCRIPTIONS_FIELD};
use hopflow::{
  DataMovement, ErrorHandlingMeta, HopMeta, ProcessOutcome, Row, RowCollector, RowMeta, Step,
  StepError, StepInput, StepMeta, StepOutput, StepRegistry, StepState, TransConfig,
  TransController, TransError, TransGraph, TransState, Value, ValueType,
};
use serde_json::json;

fn controller() -> TransController {
  TransController::new(
    StepRegistry::with_builtins(),
    TransConfig::default().with_rowset_size(64),
  )
}

fn id_row(id: i64) -> Row {
  let meta = Arc::new(RowMeta::from_pairs([("id", ValueType::Integer)]));
  Row::new(meta, vec![Value::Integer(id)]).unwrap()
}

fn keyed_row(meta: &Arc<RowMeta>, id: i64) -> Row {
  Row::new(
    Arc::clone(meta),
    vec![Value::Integer(id), Value::Integer(id % 7)],
  )
  .unwrap()
}

fn ints(rows: &[Row], field: &str) -> Vec<i64> {
  rows
    .iter()
    .map(|r| r.get(field).and_then(Value::as_integer).unwrap())
    .collect()
}

async fn inject(trans: &TransController, step: &str, ids: impl IntoIterator<Item = i64>) {
  for id in ids {
    trans.inject_row(step, 0, id_row(id)).await.unwrap();
  }
  trans.signal_input_done(step, 0).unwrap();
}

/// Passes odd ids, rejects even ids to the error hop.
struct OddOnly;

#[async_trait]
impl Step for OddOnly {
  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError> {
    let StepInput::Row(row) = input else {
      return Ok(ProcessOutcome::Done);
    };
    let id = row.require("id")?.as_integer().unwrap_or_default();
    if id % 2 == 0 {
      out.put_error(row, 1, "even id", "id", "ODD001");
    } else {
      out.put(row);
    }
    Ok(ProcessOutcome::Continue)
  }
}

fn odd_only_registry() -> StepRegistry {
  let mut registry = StepRegistry::with_builtins();
  registry.register_fn("odd_only", |_| Ok(Box::new(OddOnly)));
  registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn copy_hops_deliver_every_row_to_every_target() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("copy")
        .with_step(StepMeta::new("a", "dummy"))
        .with_step(StepMeta::new("b", "dummy"))
        .with_step(StepMeta::new("c", "dummy"))
        .with_hop(HopMeta::copy("a", "b"))
        .with_hop(HopMeta::copy("a", "c")),
    )
    .unwrap();
  trans.add_row_producer("a", 0).unwrap();
  let b = trans.add_row_collector("b", 0).unwrap();
  let c = trans.add_row_collector("c", 0).unwrap();
  trans.start().await.unwrap();
  inject(&trans, "a", 1..=7).await;

  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  assert_eq!(ints(&b.read(), "id"), (1..=7).collect::<Vec<_>>());
  assert_eq!(ints(&c.read(), "id"), (1..=7).collect::<Vec<_>>());
  assert_eq!(result.lines_written("a"), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distribute_hops_share_one_rotation() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("distribute")
        .with_step(StepMeta::new("a", "dummy"))
        .with_step(StepMeta::new("b", "dummy"))
        .with_step(StepMeta::new("c", "dummy"))
        .with_hop(HopMeta::new("a", "b").with_movement(DataMovement::Distribute))
        .with_hop(HopMeta::new("a", "c").with_movement(DataMovement::Distribute)),
    )
    .unwrap();
  trans.add_row_producer("a", 0).unwrap();
  let b = trans.add_row_collector("b", 0).unwrap();
  let c = trans.add_row_collector("c", 0).unwrap();
  trans.start().await.unwrap();
  inject(&trans, "a", 1..=7).await;

  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  assert_eq!(ints(&b.read(), "id"), vec![1, 3, 5, 7]);
  assert_eq!(ints(&c.read(), "id"), vec![2, 4, 6]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitioned_hop_keeps_each_key_on_one_copy() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("partition")
        .with_step(StepMeta::new("a", "dummy"))
        .with_step(StepMeta::new("b", "dummy").with_copies(3))
        .with_hop(HopMeta::partitioned("a", "b", ["key"])),
    )
    .unwrap();
  trans.add_row_producer("a", 0).unwrap();
  let collectors: Vec<Arc<RowCollector>> = (0..3)
    .map(|copy| trans.add_row_collector("b", copy).unwrap())
    .collect();
  trans.start().await.unwrap();

  let meta = Arc::new(RowMeta::from_pairs([
    ("id", ValueType::Integer),
    ("key", ValueType::Integer),
  ]));
  for id in 0..60 {
    trans.inject_row("a", 0, keyed_row(&meta, id)).await.unwrap();
  }
  trans.signal_input_done("a", 0).unwrap();
  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  assert_eq!(result.lines_read("b"), 60);

  let mut owner: HashMap<i64, usize> = HashMap::new();
  for (copy, collector) in collectors.iter().enumerate() {
    for key in ints(&collector.read(), "key") {
      let first = *owner.entry(key).or_insert(copy);
      assert_eq!(first, copy, "key {key} reached copies {first} and {copy}");
    }
  }
  assert_eq!(owner.len(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn equal_copy_counts_pair_copies_one_to_one() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("parallel")
        .with_step(
          StepMeta::new("gen", "generator")
            .with_copies(2)
            .with_config(json!({
              "limit": 10,
              "fields": [{"name": "name", "type": "string", "value": "x"}]
            })),
        )
        .with_step(StepMeta::new("b", "dummy").with_copies(2))
        .with_hop(HopMeta::new("gen", "b")),
    )
    .unwrap();
  assert!(trans.find_row_set("gen", 1, "b", 1).is_some());
  assert!(trans.find_row_set("gen", 0, "b", 1).is_none());
  trans.start().await.unwrap();

  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  assert!(result.copies_of("b").all(|s| s.lines_read == 10));
  assert_eq!(result.lines_written("gen"), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_copies_count_independently() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("sequence")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 6,
          "fields": [{"name": "name", "type": "string", "value": "x"}]
        })))
        .with_step(
          StepMeta::new("seq", "sequence")
            .with_copies(2)
            .with_config(json!({ "field": "nr" })),
        )
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "seq"))
        .with_hop(HopMeta::new("seq", "sink")),
    )
    .unwrap();
  let sink = trans.add_row_collector("sink", 0).unwrap();
  trans.start().await.unwrap();

  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  let mut nrs = ints(&sink.read(), "nr");
  nrs.sort_unstable();
  assert_eq!(nrs, vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zip_join_stops_at_the_shortest_input() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("zip")
        .with_step(
          StepMeta::new("left", "sequence").with_config(json!({ "field": "l", "limit": 5 })),
        )
        .with_step(
          StepMeta::new("right", "sequence")
            .with_config(json!({ "field": "r", "start": 100, "limit": 3 })),
        )
        .with_step(StepMeta::new("zip", "zip_join"))
        .with_hop(HopMeta::new("left", "zip"))
        .with_hop(HopMeta::new("right", "zip")),
    )
    .unwrap();
  let zip = trans.add_row_collector("zip", 0).unwrap();
  trans.start().await.unwrap();

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .unwrap()
    .unwrap();
  assert!(result.success);
  let rows = zip.written();
  assert_eq!(ints(&rows, "l"), vec![1, 2, 3]);
  assert_eq!(ints(&rows, "r"), vec![100, 101, 102]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_ends_an_endless_source_quickly() {
  let trans = Arc::new(controller());
  trans
    .prepare(
      TransGraph::new("endless")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 1_000_000_000u64,
          "fields": [{"name": "n", "type": "integer", "value": 1}]
        })))
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "sink")),
    )
    .unwrap();
  trans.start().await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  trans.stop();

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .expect("run did not stop in time")
    .unwrap();
  assert!(result.stopped);
  assert!(result.lines_read("sink") > 0);
  assert!(result.lines_read("sink") < 1_000_000_000);
  assert_eq!(trans.state(), TransState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_holds_reads_until_resume() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("paused")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 1_000_000_000u64,
          "fields": [{"name": "n", "type": "integer", "value": 1}]
        })))
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "sink")),
    )
    .unwrap();
  trans.start().await.unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;

  trans.pause();
  assert!(trans.is_paused());
  tokio::time::sleep(Duration::from_millis(30)).await;
  let read = |t: &TransController| {
    t.step_status()
      .iter()
      .filter(|s| s.step == "sink")
      .map(|s| s.lines_read)
      .sum::<u64>()
  };
  let before = read(&trans);
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(read(&trans), before);

  trans.resume();
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(read(&trans) > before);
  trans.stop();
  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn init_failure_prevents_the_run() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("bad_init")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 3,
          "fields": [{"name": "n", "type": "integer", "value": "not a number"}]
        })))
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "sink")),
    )
    .unwrap();
  let err = trans.start().await.unwrap_err();
  assert!(matches!(err, TransError::StepInit { ref failures } if failures.len() == 1));
  assert_eq!(trans.state(), TransState::Finished);

  let result = trans.wait_until_finished().await.unwrap();
  assert!(!result.success);
  assert_eq!(result.lines_read("sink"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abort_fails_an_endless_run_quickly() {
  let trans = Arc::new(controller());
  trans
    .prepare(
      TransGraph::new("endless")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 1_000_000_000u64,
          "fields": [{"name": "n", "type": "integer", "value": 1}]
        })))
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "sink")),
    )
    .unwrap();
  trans.start().await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  trans.abort();
  assert!(trans.is_stopped());

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .expect("run did not abort in time")
    .unwrap();
  assert!(!result.success);
  assert!(result.stopped);
  assert!(result.errors >= 1);
  assert!(result.steps.iter().any(|s| s.state == StepState::Failed));
  assert!(result.lines_read("sink") < 1_000_000_000);
  assert_eq!(trans.state(), TransState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn processing_error_fails_the_copy_and_releases_neighbours() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("abort")
        .with_step(StepMeta::new("in", "dummy"))
        .with_step(
          StepMeta::new("abort", "abort")
            .with_config(json!({ "threshold": 3, "message": "too many rows" })),
        )
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("in", "abort"))
        .with_hop(HopMeta::new("abort", "sink")),
    )
    .unwrap();
  trans.add_row_producer("in", 0).unwrap();
  trans.start().await.unwrap();
  for id in 1..=10 {
    // The copy may stop reading part-way through.
    let _ = trans.inject_row("in", 0, id_row(id)).await.unwrap();
  }
  trans.signal_input_done("in", 0).unwrap();

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .unwrap()
    .unwrap();
  assert!(!result.success);
  assert!(!result.stopped);
  let abort: Vec<_> = result.copies_of("abort").collect();
  assert_eq!(abort[0].state, StepState::Failed);
  assert_eq!(abort[0].errors, 1);
  assert_eq!(result.lines_read("sink"), 3);
  assert!(
    result
      .copies_of("sink")
      .chain(result.copies_of("in"))
      .all(|s| s.state == StepState::Finished)
  );

  let root = trans.log_channel().unwrap();
  let lines = trans.log_store().channel_lines(root.id(), true);
  assert!(lines.iter().any(|l| l.message.contains("too many rows")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn safe_stop_abort_finishes_cleanly() {
  let trans = controller();
  trans
    .prepare(
      TransGraph::new("safe_stop")
        .with_step(StepMeta::new("gen", "generator").with_config(json!({
          "limit": 100,
          "fields": [{"name": "n", "type": "integer", "value": 1}]
        })))
        .with_step(
          StepMeta::new("abort", "abort")
            .with_config(json!({ "threshold": 10, "mode": "safe_stop" })),
        )
        .with_step(StepMeta::new("sink", "dummy"))
        .with_hop(HopMeta::new("gen", "abort"))
        .with_hop(HopMeta::new("abort", "sink")),
    )
    .unwrap();
  trans.start().await.unwrap();

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .unwrap()
    .unwrap();
  assert!(result.success);
  assert_eq!(result.lines_read("sink"), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn error_hop_receives_rejected_rows() {
  let trans = TransController::new(
    odd_only_registry(),
    TransConfig::default().with_rowset_size(64),
  );
  trans
    .prepare(
      TransGraph::new("error_hop")
        .with_step(StepMeta::new("in", "dummy"))
        .with_step(
          StepMeta::new("check", "odd_only").with_error_handling(ErrorHandlingMeta::new("bad")),
        )
        .with_step(StepMeta::new("good", "dummy"))
        .with_step(StepMeta::new("bad", "dummy"))
        .with_hop(HopMeta::new("in", "check"))
        .with_hop(HopMeta::new("check", "good"))
        .with_hop(HopMeta::new("check", "bad")),
    )
    .unwrap();
  trans.add_row_producer("in", 0).unwrap();
  let good = trans.add_row_collector("good", 0).unwrap();
  let bad = trans.add_row_collector("bad", 0).unwrap();
  trans.start().await.unwrap();
  inject(&trans, "in", 1..=10).await;

  let result = trans.wait_until_finished().await.unwrap();
  assert!(result.success);
  assert_eq!(ints(&good.read(), "id"), vec![1, 3, 5, 7, 9]);
  let rejected = bad.read();
  assert_eq!(ints(&rejected, "id"), vec![2, 4, 6, 8, 10]);
  assert_eq!(
    rejected[0].get(ERROR_DESCRIPTIONS_FIELD),
    Some(&Value::from("even id"))
  );
  assert_eq!(rejected[0].get(ERROR_CODES_FIELD), Some(&Value::from("ODD001")));
  assert_eq!(result.lines_rejected("check"), 5);
  assert_eq!(result.lines_written("check"), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn error_limit_fails_the_rejecting_copy() {
  let trans = TransController::new(
    odd_only_registry(),
    TransConfig::default().with_rowset_size(64),
  );
  trans
    .prepare(
      TransGraph::new("error_limit")
        .with_step(StepMeta::new("in", "dummy"))
        .with_step(
          StepMeta::new("check", "odd_only")
            .with_error_handling(ErrorHandlingMeta::new("bad").with_max_errors(2)),
        )
        .with_step(StepMeta::new("good", "dummy"))
        .with_step(StepMeta::new("bad", "dummy"))
        .with_hop(HopMeta::new("in", "check"))
        .with_hop(HopMeta::new("check", "good"))
        .with_hop(HopMeta::new("check", "bad")),
    )
    .unwrap();
  trans.add_row_producer("in", 0).unwrap();
  trans.start().await.unwrap();
  for id in 1..=10 {
    let _ = trans.inject_row("in", 0, id_row(id)).await.unwrap();
  }
  trans.signal_input_done("in", 0).unwrap();

  let result = tokio::time::timeout(Duration::from_secs(5), trans.wait_until_finished())
    .await
    .unwrap()
    .unwrap();
  assert!(!result.success);
  let check: Vec<_> = result.copies_of("check").collect();
  assert_eq!(check[0].state, StepState::Failed);
  assert_eq!(check[0].lines_rejected, 3);
  let seen: HashSet<_> = result
    .steps
    .iter()
    .filter(|s| s.state == StepState::Failed)
    .map(|s| s.step.as_str())
    .collect();
  assert_eq!(seen, HashSet::from(["check"]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn row_tap_streams_written_rows() {
  use futures::StreamExt;

  let trans = controller();
  trans
    .prepare(
      TransGraph::new("tap")
        .with_step(StepMeta::new("in", "dummy"))
        .with_step(StepMeta::new("out", "dummy"))
        .with_hop(HopMeta::new("in", "out")),
    )
    .unwrap();
  trans.add_row_producer("in", 0).unwrap();
  let tap = trans.row_tap("out", 0).unwrap();
  trans.start().await.unwrap();
  inject(&trans, "in", 1..=4).await;
  trans.wait_until_finished().await.unwrap();
  trans.dispose().await;

  let rows: Vec<Row> = tap.collect().await;
  assert_eq!(ints(&rows, "id"), vec![1, 2, 3, 4]);
}
