//! The per-row step contract and the step-type dispatch table.
//!
//! A step kind implements [Step]; a [StepRegistry] maps step-type identifiers
//! to factories and is consulted once per step copy when a graph is prepared.
//!
//! The engine guarantees `init` is called exactly once before the first
//! `process_row`, and `dispose` exactly once after the last, error paths
//! included.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StepError;
use crate::log::LogChannel;
use crate::types::{Row, StepMeta};

/// How a step with several inputs wants its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputMode {
  /// One row at a time from whichever input has one (round robin).
  #[default]
  Any,
  /// One row from each input, in input order. Ends when any input is drained.
  OneFromEach,
}

/// What the runner hands to [Step::process_row].
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
  /// A single row ([InputMode::Any]).
  Row(Row),
  /// One row per input, in input order ([InputMode::OneFromEach]).
  Rows(Vec<Row>),
  /// The step has no inputs; it is asked to produce rows on its own.
  Empty,
  /// All inputs are drained. Delivered once, after the last row.
  EndOfInput,
}

/// Whether the step wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
  Continue,
  Done,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Emit {
  Row(Row),
  To(String, Row),
  Error(ErrorRow),
}

/// A rejected row with its error description.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRow {
  pub row: Row,
  pub count: i64,
  pub descriptions: String,
  pub fields: String,
  pub codes: String,
}

/// Rows produced by one `process_row` call, routed by the runner afterwards.
#[derive(Debug, Default)]
pub struct StepOutput {
  items: Vec<Emit>,
}

impl StepOutput {
  pub fn new() -> Self {
    Self::default()
  }

  /// Writes a row to the regular outputs.
  pub fn put(&mut self, row: Row) {
    self.items.push(Emit::Row(row));
  }

  /// Writes a row to the hop leading to `target` only.
  pub fn put_to(&mut self, target: impl Into<String>, row: Row) {
    self.items.push(Emit::To(target.into(), row));
  }

  /// Rejects a row to the error hop.
  pub fn put_error(
    &mut self,
    row: Row,
    count: i64,
    descriptions: impl Into<String>,
    fields: impl Into<String>,
    codes: impl Into<String>,
  ) {
    self.items.push(Emit::Error(ErrorRow {
      row,
      count,
      descriptions: descriptions.into(),
      fields: fields.into(),
      codes: codes.into(),
    }));
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, Emit> {
    self.items.drain(..)
  }
}

/// Everything a step copy learns about itself at `init`.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub trans_name: String,
  pub meta: Arc<StepMeta>,
  pub copy: usize,
  pub log: LogChannel,
}

impl StepContext {
  pub fn step_name(&self) -> &str {
    &self.meta.name
  }

  /// Total copies of this step.
  pub fn copies(&self) -> usize {
    self.meta.copies
  }
}

/// Per-row processing contract of a step kind.
#[async_trait]
pub trait Step: Send {
  fn input_mode(&self) -> InputMode {
    InputMode::Any
  }

  /// Called once before the first row. A failure aborts the whole run.
  async fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
    Ok(())
  }

  /// Processes one input and writes zero or more rows into `out`.
  async fn process_row(
    &mut self,
    input: StepInput,
    out: &mut StepOutput,
  ) -> Result<ProcessOutcome, StepError>;

  /// Called once after the last row, whatever the outcome.
  async fn dispose(&mut self) {}
}

/// Builds a fresh step instance for one copy.
pub type StepFactory = Arc<dyn Fn(&StepMeta) -> Result<Box<dyn Step>, StepError> + Send + Sync>;

/// Dispatch table from step-type identifier to factory.
#[derive(Clone, Default)]
pub struct StepRegistry {
  factories: HashMap<String, StepFactory>,
}

impl fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepRegistry")
      .field("types", &self.types())
      .finish()
  }
}

impl StepRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the built-in step kinds of [crate::steps].
  pub fn with_builtins() -> Self {
    let mut r = Self::new();
    crate::steps::register_builtins(&mut r);
    r
  }

  /// Registers (or replaces) a factory.
  pub fn register(&mut self, step_type: impl Into<String>, factory: StepFactory) -> &mut Self {
    self.factories.insert(step_type.into(), factory);
    self
  }

  /// Registers a factory from a plain closure.
  pub fn register_fn<F>(&mut self, step_type: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn(&StepMeta) -> Result<Box<dyn Step>, StepError> + Send + Sync + 'static,
  {
    self.register(step_type, Arc::new(factory))
  }

  pub fn contains(&self, step_type: &str) -> bool {
    self.factories.contains_key(step_type)
  }

  /// Registered step types, sorted.
  pub fn types(&self) -> Vec<String> {
    let mut types: Vec<_> = self.factories.keys().cloned().collect();
    types.sort();
    types
  }

  /// Builds a step instance for `meta`.
  pub fn create(&self, meta: &StepMeta) -> Result<Box<dyn Step>, StepError> {
    let factory = self
      .factories
      .get(&meta.step_type)
      .ok_or_else(|| StepError::Init(format!("unknown step type '{}'", meta.step_type)))?;
    factory(meta)
  }
}
