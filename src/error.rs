//! Error taxonomy of the engine.
//!
//! - [GraphError]: malformed graph, detected at `prepare()`; nothing is started.
//! - [TransError]: lifecycle misuse and step-init failures.
//! - [StepError]: a failure while a step copy processes rows.
//! - [RowSetError]: a force-errored or shape-violating row set.
//! - [ResultIoError]: a run result that cannot be saved or loaded.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ValueType;

/// Row construction and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
  #[error("row has {actual} values but its shape declares {expected} fields")]
  ArityMismatch { expected: usize, actual: usize },
  #[error("field '{field}' is declared {expected} but got {}", .actual.map(|t| t.to_string()).unwrap_or_else(|| "null".to_string()))]
  TypeMismatch {
    field: String,
    expected: ValueType,
    actual: Option<ValueType>,
  },
  #[error("unknown field '{0}'")]
  UnknownField(String),
}

/// Structural errors in a transformation graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("graph has no steps")]
  Empty,
  #[error("duplicate step name '{0}'")]
  DuplicateStep(String),
  #[error("step '{step}' requests {copies} copies (must be at least 1)")]
  InvalidCopies { step: String, copies: usize },
  #[error("hop {from} -> {to} references unknown step '{missing}'")]
  DanglingHop {
    from: String,
    to: String,
    missing: String,
  },
  #[error("duplicate hop {from} -> {to}")]
  DuplicateHop { from: String, to: String },
  #[error("hop graph contains a cycle through: {}", .0.join(", "))]
  Cycle(Vec<String>),
  #[error("partitioned hop {from} -> {to} declares no key fields")]
  EmptyPartitionKey { from: String, to: String },
  #[error("step '{step}' sends error rows to '{target}' but has no enabled hop to it")]
  InvalidErrorTarget { step: String, target: String },
  #[error("step '{step}' has unknown step type '{step_type}'")]
  UnknownStepType { step: String, step_type: String },
}

/// Queue-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowSetError {
  #[error("row set {0} was aborted")]
  Errored(String),
  #[error("row shape mismatch on row set {rowset}: expected {expected}, got {actual}")]
  ShapeMismatch {
    rowset: String,
    expected: String,
    actual: String,
  },
}

/// Routing errors raised while choosing destinations for a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
  #[error("partition field '{0}' is not present in the row")]
  MissingPartitionField(String),
  #[error("no output hop to step '{0}'")]
  UnknownTarget(String),
}

/// Errors raised while a step copy is initialized or processes rows.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("init failed: {0}")]
  Init(String),
  #[error("invalid step configuration: {0}")]
  Config(#[from] serde_json::Error),
  #[error("{0}")]
  Processing(String),
  #[error(transparent)]
  Row(#[from] RowError),
  #[error(transparent)]
  RowSet(#[from] RowSetError),
  #[error(transparent)]
  Router(#[from] RouterError),
  #[error("{rejected} rows rejected, above the limit of {limit}")]
  TooManyErrors { rejected: u64, limit: u64 },
  #[error("{pct}% of rows rejected, above the limit of {limit}%")]
  TooManyErrorsPercent { pct: u64, limit: u32 },
  #[error("error row emitted but no error hop is configured: {0}")]
  UnhandledErrorRow(String),
  #[error("step panicked: {0}")]
  Panicked(String),
  #[error("transformation aborted")]
  Aborted,
}

impl StepError {
  pub fn processing(msg: impl Into<String>) -> Self {
    StepError::Processing(msg.into())
  }
}

/// Lifecycle errors of a [crate::TransController].
#[derive(Debug, Error)]
pub enum TransError {
  #[error("invalid transformation graph: {0}")]
  Graph(#[from] GraphError),
  #[error("transformation is not prepared")]
  NotPrepared,
  #[error("transformation is already prepared")]
  AlreadyPrepared,
  #[error("transformation was already started")]
  AlreadyStarted,
  #[error("transformation was not started")]
  NotStarted,
  #[error("unable to find step copy {step}.{copy}")]
  UnknownStepCopy { step: String, copy: usize },
  #[error("no row producer registered for {step}.{copy}")]
  NoRowProducer { step: String, copy: usize },
  #[error("step {step}.{copy} failed to create: {source}")]
  StepCreate {
    step: String,
    copy: usize,
    #[source]
    source: StepError,
  },
  #[error("{} step copies failed to initialize: {}", .failures.len(), .failures.join("; "))]
  StepInit { failures: Vec<String> },
  #[error(transparent)]
  RowSet(#[from] RowSetError),
}

/// Failure saving or loading a run result file.
#[derive(Debug, Error)]
pub enum ResultIoError {
  #[error("run result file {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("run result file {} is not valid JSON: {source}", .path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}
