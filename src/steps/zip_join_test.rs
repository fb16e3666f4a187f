//! Tests for `ZipJoinStep`.

use std::sync::Arc;

use crate::step::{Emit, InputMode, ProcessOutcome, Step, StepInput, StepOutput};
use crate::steps::ZipJoinStep;
use crate::types::{Row, RowMeta, Value, ValueType};

#[tokio::test]
async fn joins_one_row_from_each_input() {
  let left = Arc::new(RowMeta::from_pairs([("id", ValueType::Integer)]));
  let right = Arc::new(RowMeta::from_pairs([("name", ValueType::String)]));
  let mut step = ZipJoinStep::default();
  assert_eq!(step.input_mode(), InputMode::OneFromEach);

  let mut out = StepOutput::new();
  let rows = vec![
    Row::new(left, vec![Value::Integer(1)]).unwrap(),
    Row::new(right, vec![Value::from("a")]).unwrap(),
  ];
  assert_eq!(
    step.process_row(StepInput::Rows(rows), &mut out).await.unwrap(),
    ProcessOutcome::Continue
  );
  let Some(Emit::Row(joined)) = out.drain().next() else {
    panic!("expected a joined row");
  };
  assert_eq!(joined.to_string(), "[id=1, name=a]");
  assert_eq!(
    step.process_row(StepInput::EndOfInput, &mut out).await.unwrap(),
    ProcessOutcome::Done
  );
}
