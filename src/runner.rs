//! Worker loop of one step copy.
//!
//! A [StepRunner] owns a step instance, its input row sets and its [Router].
//! It reads input according to the step's [InputMode], calls
//! [Step::process_row], routes what the step wrote, and keeps the counters in
//! its shared [StepHandle] current. On exit it signals done on every output,
//! cancels every input and disposes the step exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::config::TransConfig;
use crate::error::StepError;
use crate::listener::RowListener;
use crate::log::LogChannel;
use crate::router::Router;
use crate::row_set::{Fetch, Put, RowSet};
use crate::step::{
  Emit, ErrorRow, InputMode, ProcessOutcome, Step, StepContext, StepInput, StepOutput,
};
use crate::types::{
  Row, RowMeta, StepMeta, StepResult, StepState, StepStatus, Value, ValueMeta, ValueType,
};

/// Names of the fields appended to rows sent over an error hop.
pub const ERROR_COUNT_FIELD: &str = "error_count";
pub const ERROR_DESCRIPTIONS_FIELD: &str = "error_descriptions";
pub const ERROR_FIELDS_FIELD: &str = "error_fields";
pub const ERROR_CODES_FIELD: &str = "error_codes";

/// Run-wide control flags observed by every worker.
#[derive(Debug, Default)]
pub struct RunFlags {
  stopped: AtomicBool,
  aborted: AtomicBool,
  paused: AtomicBool,
}

impl RunFlags {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn request_stop(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  /// Stop in which every copy still running ends Failed.
  pub fn request_abort(&self) {
    self.aborted.store(true, Ordering::SeqCst);
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn is_aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }

  pub fn pause(&self) {
    self.paused.store(true, Ordering::SeqCst);
  }

  pub fn resume(&self) {
    self.paused.store(false, Ordering::SeqCst);
  }

  pub fn is_paused(&self) -> bool {
    self.paused.load(Ordering::SeqCst)
  }
}

/// Shared, lock-free view of one step copy, readable while it runs.
#[derive(Debug)]
pub struct StepHandle {
  step: String,
  copy: usize,
  state: AtomicU8,
  lines_read: AtomicU64,
  lines_written: AtomicU64,
  lines_rejected: AtomicU64,
  errors: AtomicU64,
  inputs: Mutex<Vec<Arc<RowSet>>>,
  outputs: Vec<Arc<RowSet>>,
}

impl StepHandle {
  pub(crate) fn new(
    step: impl Into<String>,
    copy: usize,
    inputs: Vec<Arc<RowSet>>,
    outputs: Vec<Arc<RowSet>>,
  ) -> Self {
    Self {
      step: step.into(),
      copy,
      state: AtomicU8::new(StepState::Initialized.as_u8()),
      lines_read: AtomicU64::new(0),
      lines_written: AtomicU64::new(0),
      lines_rejected: AtomicU64::new(0),
      errors: AtomicU64::new(0),
      inputs: Mutex::new(inputs),
      outputs,
    }
  }

  pub fn step(&self) -> &str {
    &self.step
  }

  pub fn copy(&self) -> usize {
    self.copy
  }

  pub fn state(&self) -> StepState {
    StepState::from_u8(self.state.load(Ordering::SeqCst))
  }

  /// Moves to `next` if that is a legal transition; returns whether it moved.
  pub(crate) fn transition(&self, next: StepState) -> bool {
    let mut cur = self.state.load(Ordering::SeqCst);
    loop {
      if !StepState::from_u8(cur).can_transition_to(next) {
        return false;
      }
      match self
        .state
        .compare_exchange(cur, next.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
      {
        Ok(_) => return true,
        Err(actual) => cur = actual,
      }
    }
  }

  pub fn lines_read(&self) -> u64 {
    self.lines_read.load(Ordering::Relaxed)
  }

  pub fn lines_written(&self) -> u64 {
    self.lines_written.load(Ordering::Relaxed)
  }

  pub fn lines_rejected(&self) -> u64 {
    self.lines_rejected.load(Ordering::Relaxed)
  }

  pub fn errors(&self) -> u64 {
    self.errors.load(Ordering::Relaxed)
  }

  pub(crate) fn add_error(&self) {
    self.errors.fetch_add(1, Ordering::Relaxed);
  }

  fn lock_inputs(&self) -> MutexGuard<'_, Vec<Arc<RowSet>>> {
    self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn add_input(&self, rowset: Arc<RowSet>) {
    self.lock_inputs().push(rowset);
  }

  /// Input row sets, external producers included.
  pub fn inputs(&self) -> Vec<Arc<RowSet>> {
    self.lock_inputs().clone()
  }

  pub fn outputs(&self) -> &[Arc<RowSet>] {
    &self.outputs
  }

  pub fn status(&self) -> StepStatus {
    StepStatus {
      step: self.step.clone(),
      copy: self.copy,
      state: self.state(),
      lines_read: self.lines_read(),
      lines_written: self.lines_written(),
      lines_rejected: self.lines_rejected(),
      errors: self.errors(),
      input_buffer: self.lock_inputs().iter().map(|rs| rs.size()).sum(),
      output_buffer: self.outputs.iter().map(|rs| rs.size()).sum(),
    }
  }

  pub fn result(&self) -> StepResult {
    StepResult {
      step: self.step.clone(),
      copy: self.copy,
      state: self.state(),
      lines_read: self.lines_read(),
      lines_written: self.lines_written(),
      lines_rejected: self.lines_rejected(),
      errors: self.errors(),
    }
  }
}

/// Worker for one step copy.
pub struct StepRunner {
  trans_name: String,
  meta: Arc<StepMeta>,
  handle: Arc<StepHandle>,
  step: Box<dyn Step>,
  router: Router,
  listeners: Vec<Arc<dyn RowListener>>,
  flags: Arc<RunFlags>,
  config: TransConfig,
  log: LogChannel,
  inputs: Vec<Arc<RowSet>>,
  has_inputs: bool,
  input_cursor: usize,
  error_shapes: Option<(Arc<RowMeta>, Arc<RowMeta>)>,
  disposed: bool,
}

impl std::fmt::Debug for StepRunner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepRunner")
      .field("step", &self.handle.step)
      .field("copy", &self.handle.copy)
      .field("state", &self.handle.state())
      .finish()
  }
}

impl StepRunner {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    trans_name: impl Into<String>,
    meta: Arc<StepMeta>,
    copy: usize,
    step: Box<dyn Step>,
    inputs: Vec<Arc<RowSet>>,
    router: Router,
    flags: Arc<RunFlags>,
    config: TransConfig,
    log: LogChannel,
  ) -> Self {
    let outputs = router.rowsets().cloned().collect();
    let handle = Arc::new(StepHandle::new(&meta.name, copy, inputs, outputs));
    Self {
      trans_name: trans_name.into(),
      meta,
      handle,
      step,
      router,
      listeners: Vec::new(),
      flags,
      config,
      log,
      inputs: Vec::new(),
      has_inputs: false,
      input_cursor: 0,
      error_shapes: None,
      disposed: false,
    }
  }

  pub fn handle(&self) -> &Arc<StepHandle> {
    &self.handle
  }

  pub fn log(&self) -> &LogChannel {
    &self.log
  }

  pub(crate) fn add_listener(&mut self, listener: Arc<dyn RowListener>) {
    self.listeners.push(listener);
  }

  /// Calls [Step::init]. On failure the copy is marked Failed; the caller
  /// still owes a [StepRunner::dispose].
  #[instrument(level = "trace", skip(self), fields(step = %self.handle.step, copy = self.handle.copy))]
  pub async fn init(&mut self) -> Result<(), StepError> {
    let ctx = StepContext {
      trans_name: self.trans_name.clone(),
      meta: Arc::clone(&self.meta),
      copy: self.handle.copy,
      log: self.log.clone(),
    };
    let result = AssertUnwindSafe(self.step.init(&ctx))
      .catch_unwind()
      .await
      .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic))));
    if let Err(e) = &result {
      self.handle.add_error();
      self.handle.transition(StepState::Failed);
      self.log.error(format!("Error initializing step: {e}"));
    } else {
      self.log.detailed("Step initialized");
    }
    result
  }

  /// Disposes the step if that has not happened yet.
  pub async fn dispose(&mut self) {
    if self.disposed {
      return;
    }
    self.disposed = true;
    if AssertUnwindSafe(self.step.dispose())
      .catch_unwind()
      .await
      .is_err()
    {
      warn!(step = %self.handle.step, copy = self.handle.copy, "step panicked in dispose");
    }
  }

  /// Runs the copy to completion and returns its final counters.
  #[instrument(level = "trace", skip(self), fields(step = %self.handle.step, copy = self.handle.copy))]
  pub async fn run(mut self) -> StepResult {
    self.inputs = self.handle.inputs();
    self.has_inputs = !self.inputs.is_empty();
    self.handle.transition(StepState::Running);
    info!(
      trans = %self.trans_name,
      step = %self.handle.step,
      copy = self.handle.copy,
      inputs = self.inputs.len(),
      outputs = self.handle.outputs.len(),
      "step copy started"
    );

    let outcome = AssertUnwindSafe(self.process_loop())
      .catch_unwind()
      .await
      .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic))));

    let outcome = match outcome {
      Ok(()) if self.flags.is_aborted() => Err(StepError::Aborted),
      other => other,
    };

    self.teardown();
    self.dispose().await;

    match outcome {
      Ok(()) => {
        self.handle.transition(StepState::Finished);
      }
      Err(e) => {
        self.handle.add_error();
        self.log.error(format!("Unexpected error: {e}"));
        self.handle.transition(StepState::Failed);
      }
    }
    let result = self.handle.result();
    self.log.basic(format!(
      "Finished processing (R={}, W={}, E={})",
      result.lines_read, result.lines_written, result.errors
    ));
    info!(
      trans = %self.trans_name,
      step = %result.step,
      copy = result.copy,
      state = %result.state,
      lines_read = result.lines_read,
      lines_written = result.lines_written,
      lines_rejected = result.lines_rejected,
      errors = result.errors,
      "step copy finished"
    );
    result
  }

  async fn process_loop(&mut self) -> Result<(), StepError> {
    let mode = self.step.input_mode();
    let mut out = StepOutput::new();
    loop {
      if !self.wait_while_paused().await {
        self.handle.transition(StepState::Stopping);
        return Ok(());
      }
      let Some(input) = self.next_input(mode).await? else {
        self.handle.transition(StepState::Stopping);
        return Ok(());
      };
      let end_of_input = matches!(input, StepInput::EndOfInput);
      let outcome = self.step.process_row(input, &mut out).await?;
      self.route(&mut out).await?;
      if end_of_input || outcome == ProcessOutcome::Done {
        return Ok(());
      }
      if self.router.all_closed() {
        self
          .log
          .detailed("All output row sets were closed by their consumers, stopping");
        return Ok(());
      }
    }
  }

  /// Sleeps while the run is paused. Returns false once stop was requested.
  async fn wait_while_paused(&mut self) -> bool {
    while self.flags.is_paused() && !self.flags.is_stopped() {
      tokio::time::sleep(self.config.poll_interval()).await;
    }
    !self.flags.is_stopped()
  }

  /// Next input for the step, or `None` if stop was requested while waiting.
  async fn next_input(&mut self, mode: InputMode) -> Result<Option<StepInput>, StepError> {
    if !self.has_inputs {
      return Ok(Some(StepInput::Empty));
    }
    match mode {
      InputMode::Any => self.next_any().await,
      InputMode::OneFromEach => self.next_from_each().await,
    }
  }

  /// Round robin over the inputs; drained inputs are dropped from rotation.
  async fn next_any(&mut self) -> Result<Option<StepInput>, StepError> {
    let poll = self.config.poll_interval();
    loop {
      if self.flags.is_stopped() {
        return Ok(None);
      }
      if self.inputs.is_empty() {
        return Ok(Some(StepInput::EndOfInput));
      }
      for _ in 0..self.inputs.len() {
        if self.inputs.is_empty() {
          break;
        }
        let idx = self.input_cursor % self.inputs.len();
        match self.inputs[idx].try_get()? {
          Fetch::Row(row) => {
            self.input_cursor = idx + 1;
            return Ok(Some(StepInput::Row(self.on_read(row))));
          }
          Fetch::Drained => {
            debug!(rowset = %self.inputs[idx], "input drained");
            self.inputs.remove(idx);
            self.input_cursor = idx;
          }
          Fetch::Empty => self.input_cursor = idx + 1,
        }
      }
      if self.inputs.is_empty() {
        continue;
      }
      let idx = self.input_cursor % self.inputs.len();
      match self.inputs[idx].get_timeout(poll).await? {
        Fetch::Row(row) => {
          self.input_cursor = idx + 1;
          return Ok(Some(StepInput::Row(self.on_read(row))));
        }
        Fetch::Drained => {
          self.inputs.remove(idx);
          self.input_cursor = idx;
        }
        Fetch::Empty => {}
      }
    }
  }

  /// One row from each input, in input order.
  ///
  /// Once any input is drained the join is over: rows already taken from the
  /// other inputs in this round count as read but are not handed to the step.
  async fn next_from_each(&mut self) -> Result<Option<StepInput>, StepError> {
    let poll = self.config.poll_interval();
    let mut rows = Vec::with_capacity(self.inputs.len());
    for idx in 0..self.inputs.len() {
      loop {
        if self.flags.is_stopped() {
          return Ok(None);
        }
        match self.inputs[idx].get_timeout(poll).await? {
          Fetch::Row(row) => {
            rows.push(self.on_read(row));
            break;
          }
          Fetch::Drained => return Ok(Some(StepInput::EndOfInput)),
          Fetch::Empty => {}
        }
      }
    }
    Ok(Some(StepInput::Rows(rows)))
  }

  fn on_read(&self, row: Row) -> Row {
    let n = self.handle.lines_read.fetch_add(1, Ordering::Relaxed) + 1;
    for l in &self.listeners {
      l.row_read(&row);
    }
    self.feedback(n);
    row
  }

  fn feedback(&self, n: u64) {
    let every = self.config.feedback_size;
    if every > 0 && n % every == 0 {
      self.log.basic(format!("linenr {n}"));
    }
  }

  async fn route(&mut self, out: &mut StepOutput) -> Result<(), StepError> {
    let emitted: Vec<Emit> = out.drain().collect();
    for emit in emitted {
      match emit {
        Emit::Row(row) => {
          let dests = self.router.destinations(&row)?;
          self.on_written(&row);
          self.deliver(row, dests).await?;
        }
        Emit::To(target, row) => {
          let dests = self.router.destinations_to(&target, &row)?;
          self.on_written(&row);
          self.deliver(row, dests).await?;
        }
        Emit::Error(err) => self.put_error(err).await?,
      }
    }
    Ok(())
  }

  fn on_written(&self, row: &Row) {
    let n = self.handle.lines_written.fetch_add(1, Ordering::Relaxed) + 1;
    for l in &self.listeners {
      l.row_written(row);
    }
    if !self.has_inputs {
      self.feedback(n);
    }
  }

  async fn put_error(&mut self, err: ErrorRow) -> Result<(), StepError> {
    if !self.router.has_error_lane() {
      return Err(StepError::UnhandledErrorRow(err.descriptions));
    }
    let row = self.error_row(&err)?;
    self.handle.lines_rejected.fetch_add(1, Ordering::Relaxed);
    for l in &self.listeners {
      l.error_row_written(&row);
    }
    let dests = self.router.error_destinations(&row)?;
    self.deliver(row, dests).await?;
    self.verify_rejection_rates()
  }

  fn error_row(&mut self, err: &ErrorRow) -> Result<Row, StepError> {
    let input = err.row.meta();
    let meta = match &self.error_shapes {
      Some((i, o)) if RowMeta::same_shape(i, input) => Arc::clone(o),
      _ => {
        let o = Arc::new(input.extended([
          ValueMeta::new(ERROR_COUNT_FIELD, ValueType::Integer),
          ValueMeta::new(ERROR_DESCRIPTIONS_FIELD, ValueType::String),
          ValueMeta::new(ERROR_FIELDS_FIELD, ValueType::String),
          ValueMeta::new(ERROR_CODES_FIELD, ValueType::String),
        ]));
        self.error_shapes = Some((Arc::clone(input), Arc::clone(&o)));
        o
      }
    };
    Ok(err.row.extend(
      meta,
      vec![
        Value::Integer(err.count),
        Value::String(err.descriptions.clone()),
        Value::String(err.fields.clone()),
        Value::String(err.codes.clone()),
      ],
    )?)
  }

  fn verify_rejection_rates(&self) -> Result<(), StepError> {
    let Some(eh) = &self.meta.error_handling else {
      return Ok(());
    };
    let rejected = self.handle.lines_rejected();
    let read = self.handle.lines_read();
    if eh.max_errors > 0 && rejected > eh.max_errors {
      return Err(StepError::TooManyErrors {
        rejected,
        limit: eh.max_errors,
      });
    }
    if eh.max_percent_errors > 0
      && rejected > 0
      && (eh.min_rows_for_max_percent == 0 || read >= eh.min_rows_for_max_percent)
    {
      let pct = if read == 0 {
        100
      } else {
        (100 * rejected).div_ceil(read)
      };
      if pct > u64::from(eh.max_percent_errors) {
        return Err(StepError::TooManyErrorsPercent {
          pct,
          limit: eh.max_percent_errors,
        });
      }
    }
    Ok(())
  }

  /// Puts `row` on every destination, waiting for room but giving up once
  /// stop is requested. Cancelled destinations are skipped.
  async fn deliver(&mut self, row: Row, dests: Vec<Arc<RowSet>>) -> Result<(), StepError> {
    let poll = self.config.poll_interval();
    for rs in dests {
      let mut pending = row.clone();
      loop {
        if self.flags.is_stopped() {
          return Ok(());
        }
        match rs.put_timeout(pending, poll).await? {
          Put::Accepted | Put::Cancelled => break,
          Put::Full(back) => pending = back,
        }
      }
    }
    Ok(())
  }

  fn teardown(&self) {
    for rs in self.router.rowsets() {
      rs.signal_done();
    }
    for rs in self.handle.inputs() {
      rs.cancel();
    }
  }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
