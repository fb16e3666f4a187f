//! Lifecycle of one transformation run.
//!
//! [TransController] validates a [TransGraph], allocates its row set mesh,
//! creates one [StepRunner] per step copy, and drives the run:
//!
//! ```text
//! new -> prepare -> (add_row_producer / add_row_listener)* -> start -> wait_until_finished -> dispose
//! ```
//!
//! All methods take `&self`, so a controller behind an `Arc` can be stopped,
//! paused or inspected from other tasks while any number of tasks wait for
//! the run. A supervisor task joins the copies and publishes the single
//! [RunResult] on a watch channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, instrument, warn};

use crate::config::TransConfig;
use crate::error::{GraphError, TransError};
use crate::graph::TransGraph;
use crate::listener::{RowCollector, RowListener, RowTap, TransListener};
use crate::log::{LogChannel, LogStore};
use crate::mesh::RowSetMesh;
use crate::producer::RowProducer;
use crate::router::Router;
use crate::row_set::RowSet;
use crate::runner::{RunFlags, StepHandle, StepRunner};
use crate::step::StepRegistry;
use crate::types::{Row, RunResult, StepResult, StepState, StepStatus, TransState};

type CopyKey = (String, usize);

#[derive(Default)]
struct Inner {
  state: Option<TransState>,
  graph: Option<Arc<TransGraph>>,
  mesh: RowSetMesh,
  runners: Vec<StepRunner>,
  handles: Vec<Arc<StepHandle>>,
  producers: HashMap<CopyKey, RowProducer>,
  trans_listeners: Vec<Arc<dyn TransListener>>,
  root_log: Option<LogChannel>,
  started_at: Option<DateTime<Utc>>,
  stopped: bool,
}

impl Inner {
  fn state(&self) -> TransState {
    self.state.unwrap_or(TransState::Idle)
  }

  fn runner_mut(&mut self, step: &str, copy: usize) -> Result<&mut StepRunner, TransError> {
    match self.state() {
      TransState::Idle => return Err(TransError::NotPrepared),
      TransState::Prepared => {}
      _ => return Err(TransError::AlreadyStarted),
    }
    self
      .runners
      .iter_mut()
      .find(|r| r.handle().step() == step && r.handle().copy() == copy)
      .ok_or_else(|| TransError::UnknownStepCopy {
        step: step.to_string(),
        copy,
      })
  }

  fn name(&self) -> String {
    self
      .graph
      .as_ref()
      .map(|g| g.name.clone())
      .unwrap_or_default()
  }

  /// Consumers stop reading: blocked and later writers get `Ok(false)`.
  fn cancel_queues(&self) {
    for rs in self.mesh.rowsets() {
      rs.cancel();
    }
    for p in self.producers.values() {
      p.rowset().cancel();
    }
  }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

type ResultSender = watch::Sender<Option<RunResult>>;

/// Aggregates the copy states, marks the run Finished, tells the run
/// listeners and wakes every waiter.
fn publish(inner: &Mutex<Inner>, done: &ResultSender) {
  let (result, listeners) = {
    let mut inner = lock_inner(inner);
    let steps = inner.handles.iter().map(|h| h.result()).collect();
    let started = inner.started_at.unwrap_or_else(Utc::now);
    let result = RunResult::from_steps(inner.name(), started, Utc::now(), inner.stopped, steps);
    inner.state = Some(TransState::Finished);
    if let Some(root) = &inner.root_log {
      root.basic(format!(
        "Transformation finished (success={}, errors={})",
        result.success, result.errors
      ));
    }
    (result, inner.trans_listeners.clone())
  };
  info!(
    trans = %result.trans_name,
    success = result.success,
    stopped = result.stopped,
    errors = result.errors,
    "transformation finished"
  );
  for listener in &listeners {
    listener.trans_finished(&result);
  }
  done.send_replace(Some(result));
}

/// Joins every copy task, then publishes the run result.
async fn supervise(
  inner: Arc<Mutex<Inner>>,
  done: Arc<ResultSender>,
  tasks: Vec<(Arc<StepHandle>, JoinHandle<StepResult>)>,
) {
  let (handles, tasks): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
  let joined = join_all(tasks).await;
  for (handle, outcome) in handles.iter().zip(&joined) {
    if let Err(e) = outcome {
      warn!(step = handle.step(), copy = handle.copy(), error = %e, "step task ended abnormally");
      handle.add_error();
      handle.transition(StepState::Failed);
    }
  }
  publish(&inner, &done);
}

/// Drives one transformation run.
pub struct TransController {
  registry: StepRegistry,
  config: TransConfig,
  flags: Arc<RunFlags>,
  log: LogStore,
  inner: Arc<Mutex<Inner>>,
  done: Arc<ResultSender>,
}

impl std::fmt::Debug for TransController {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TransController")
      .field("name", &self.name())
      .field("state", &self.state())
      .field("config", &self.config)
      .finish()
  }
}

impl TransController {
  pub fn new(registry: StepRegistry, config: TransConfig) -> Self {
    let log = LogStore::new(config.log_buffer_size);
    Self {
      registry,
      config,
      flags: Arc::new(RunFlags::new()),
      log,
      inner: Arc::new(Mutex::new(Inner::default())),
      done: Arc::new(watch::Sender::new(None)),
    }
  }

  /// A controller over the built-in step kinds with `HOPFLOW_*` configuration.
  pub fn with_builtins() -> Self {
    Self::new(StepRegistry::with_builtins(), TransConfig::from_env())
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    lock_inner(&self.inner)
  }

  pub fn config(&self) -> &TransConfig {
    &self.config
  }

  /// Run state. A started run reads Finished as soon as every copy ended,
  /// before the supervisor has published the result.
  pub fn state(&self) -> TransState {
    let inner = self.lock();
    match inner.state() {
      TransState::Running | TransState::Stopped
        if !inner.handles.is_empty() && inner.handles.iter().all(|h| h.state().is_terminal()) =>
      {
        TransState::Finished
      }
      state => state,
    }
  }

  /// Name of the prepared graph (empty before `prepare`).
  pub fn name(&self) -> String {
    self.lock().name()
  }

  pub fn log_store(&self) -> &LogStore {
    &self.log
  }

  /// Root log channel of the run, once prepared.
  pub fn log_channel(&self) -> Option<LogChannel> {
    self.lock().root_log.clone()
  }

  /// Validates `graph`, allocates the row set mesh and creates every step copy.
  /// Nothing is started; on error nothing is kept.
  #[instrument(level = "trace", skip(self, graph), fields(trans = %graph.name))]
  pub fn prepare(&self, graph: TransGraph) -> Result<(), TransError> {
    if self.state() != TransState::Idle {
      return Err(TransError::AlreadyPrepared);
    }
    graph.validate()?;
    for step in &graph.steps {
      if !self.registry.contains(&step.step_type) {
        return Err(
          GraphError::UnknownStepType {
            step: step.name.clone(),
            step_type: step.step_type.clone(),
          }
          .into(),
        );
      }
    }

    let mesh = RowSetMesh::build(&graph, self.config.effective_rowset_size());
    let root = self.log.root(&graph.name);
    let mut runners = Vec::new();
    for name in graph.topological_order()? {
      let Some(meta) = graph.step(&name) else {
        continue;
      };
      let meta = Arc::new(meta.clone());
      for copy in 0..meta.copies {
        let step = self
          .registry
          .create(&meta)
          .map_err(|source| TransError::StepCreate {
            step: meta.name.clone(),
            copy,
            source,
          })?;
        runners.push(StepRunner::new(
          &graph.name,
          Arc::clone(&meta),
          copy,
          step,
          mesh.inputs_of(&meta.name, copy),
          Router::new(mesh.outputs_of(&meta.name, copy)),
          Arc::clone(&self.flags),
          self.config.clone(),
          root.child(format!("{}.{}", meta.name, copy)),
        ));
      }
    }

    root.detailed(format!(
      "Prepared {} step copies over {} row sets",
      runners.len(),
      mesh.rowsets().len()
    ));
    info!(
      trans = %graph.name,
      copies = runners.len(),
      rowsets = mesh.rowsets().len(),
      "transformation prepared"
    );

    let mut inner = self.lock();
    if inner.state() != TransState::Idle {
      return Err(TransError::AlreadyPrepared);
    }
    inner.handles = runners.iter().map(|r| Arc::clone(r.handle())).collect();
    inner.runners = runners;
    inner.mesh = mesh;
    inner.root_log = Some(root);
    inner.graph = Some(Arc::new(graph));
    inner.state = Some(TransState::Prepared);
    Ok(())
  }

  /// Opens an injection point on `step.copy`. Call after `prepare`, before `start`.
  pub fn add_row_producer(&self, step: &str, copy: usize) -> Result<RowProducer, TransError> {
    let capacity = self.config.effective_rowset_size();
    let mut inner = self.lock();
    let runner = inner.runner_mut(step, copy)?;
    let producer = RowProducer::new(step, copy, capacity);
    runner.handle().add_input(Arc::clone(producer.rowset()));
    inner
      .producers
      .insert((step.to_string(), copy), producer.clone());
    Ok(producer)
  }

  /// Attaches a row listener to `step.copy`. Call before `start`.
  pub fn add_row_listener(
    &self,
    step: &str,
    copy: usize,
    listener: Arc<dyn RowListener>,
  ) -> Result<(), TransError> {
    self.lock().runner_mut(step, copy)?.add_listener(listener);
    Ok(())
  }

  /// Attaches a fresh [RowCollector] to `step.copy` and returns it.
  pub fn add_row_collector(&self, step: &str, copy: usize) -> Result<Arc<RowCollector>, TransError> {
    let collector = Arc::new(RowCollector::new());
    self.add_row_listener(step, copy, collector.clone())?;
    Ok(collector)
  }

  /// Stream of rows written by `step.copy`.
  pub fn row_tap(&self, step: &str, copy: usize) -> Result<UnboundedReceiverStream<Row>, TransError> {
    let (tap, stream) = RowTap::new();
    self.add_row_listener(step, copy, Arc::new(tap))?;
    Ok(stream)
  }

  /// Registers a run-level listener. Call before `start`.
  pub fn add_trans_listener(&self, listener: Arc<dyn TransListener>) -> Result<(), TransError> {
    let mut inner = self.lock();
    match inner.state() {
      TransState::Idle | TransState::Prepared => {
        inner.trans_listeners.push(listener);
        Ok(())
      }
      _ => Err(TransError::AlreadyStarted),
    }
  }

  /// Initializes every step copy concurrently, then spawns one task per copy.
  ///
  /// If any copy fails to initialize, every copy is disposed, nothing is
  /// spawned, every queue is cancelled and the run ends in
  /// [TransState::Finished].
  #[instrument(level = "trace", skip(self))]
  pub async fn start(&self) -> Result<(), TransError> {
    let (mut runners, root) = {
      let mut inner = self.lock();
      match inner.state() {
        TransState::Idle => return Err(TransError::NotPrepared),
        TransState::Prepared => {}
        _ => return Err(TransError::AlreadyStarted),
      }
      inner.state = Some(TransState::Running);
      inner.started_at = Some(Utc::now());
      (std::mem::take(&mut inner.runners), inner.root_log.clone())
    };

    let outcomes = join_all(runners.iter_mut().map(|r| r.init())).await;
    let failures: Vec<String> = runners
      .iter()
      .zip(&outcomes)
      .filter_map(|(r, o)| {
        o.as_ref()
          .err()
          .map(|e| format!("{}.{}: {e}", r.handle().step(), r.handle().copy()))
      })
      .collect();

    if !failures.is_empty() {
      for runner in &mut runners {
        runner.dispose().await;
        runner.handle().transition(StepState::Finished);
      }
      if let Some(root) = &root {
        root.error(format!(
          "Step initialization failed: {}",
          failures.join("; ")
        ));
      }
      warn!(failures = failures.len(), "transformation not started");
      self.lock().cancel_queues();
      publish(&self.inner, &self.done);
      return Err(TransError::StepInit { failures });
    }

    let tasks: Vec<_> = runners
      .into_iter()
      .map(|runner| (Arc::clone(runner.handle()), tokio::spawn(runner.run())))
      .collect();
    if let Some(root) = &root {
      root.basic(format!("Started {} step copies", tasks.len()));
    }
    let (name, listeners) = {
      let inner = self.lock();
      (inner.name(), inner.trans_listeners.clone())
    };
    for listener in &listeners {
      listener.trans_started(&name);
    }
    tokio::spawn(supervise(Arc::clone(&self.inner), Arc::clone(&self.done), tasks));
    Ok(())
  }

  /// Feeds one row into `step.copy` through its registered producer.
  /// Returns `Ok(false)` if the copy no longer reads.
  pub async fn inject_row(&self, step: &str, copy: usize, row: Row) -> Result<bool, TransError> {
    let producer = self.producer(step, copy)?;
    Ok(producer.put_row(row).await?)
  }

  /// Marks end of stream on the producer of `step.copy`.
  pub fn signal_input_done(&self, step: &str, copy: usize) -> Result<(), TransError> {
    self.producer(step, copy)?.finished();
    Ok(())
  }

  fn producer(&self, step: &str, copy: usize) -> Result<RowProducer, TransError> {
    self
      .lock()
      .producers
      .get(&(step.to_string(), copy))
      .cloned()
      .ok_or_else(|| TransError::NoRowProducer {
        step: step.to_string(),
        copy,
      })
  }

  /// Cooperative stop: every copy stops at its next read or write boundary.
  pub fn stop(&self) {
    self.flags.request_stop();
    let mut inner = self.lock();
    inner.stopped = true;
    if inner.state() == TransState::Running {
      inner.state = Some(TransState::Stopped);
    }
    if let Some(root) = &inner.root_log {
      root.basic("Stop requested");
    }
  }

  /// Stop plus force-erroring every row set. Blocked copies wake at once and
  /// every copy still running ends Failed.
  pub fn abort(&self) {
    self.flags.request_abort();
    self.stop();
    let inner = self.lock();
    for rs in inner.mesh.rowsets() {
      rs.set_errored();
    }
    for p in inner.producers.values() {
      p.rowset().set_errored();
    }
  }

  /// Copies stall before their next read until [TransController::resume].
  pub fn pause(&self) {
    self.flags.pause();
  }

  pub fn resume(&self) {
    self.flags.resume();
  }

  pub fn is_paused(&self) -> bool {
    self.flags.is_paused()
  }

  pub fn is_stopped(&self) -> bool {
    self.flags.is_stopped()
  }

  /// Waits until every copy is Finished or Failed and the result is
  /// aggregated. Any number of callers may wait; all get the same result.
  #[instrument(level = "trace", skip(self))]
  pub async fn wait_until_finished(&self) -> Result<RunResult, TransError> {
    let state = self.lock().state();
    if matches!(state, TransState::Idle | TransState::Prepared) {
      return Err(TransError::NotStarted);
    }
    let mut rx = self.done.subscribe();
    let published = rx
      .wait_for(Option::is_some)
      .await
      .ok()
      .and_then(|result| result.clone());
    published.ok_or(TransError::NotStarted)
  }

  /// Live status of every copy, in topological step order.
  pub fn step_status(&self) -> Vec<StepStatus> {
    self.lock().handles.iter().map(|h| h.status()).collect()
  }

  /// Total errors recorded so far.
  pub fn errors(&self) -> u64 {
    self.lock().handles.iter().map(|h| h.errors()).sum()
  }

  /// The row set between two specific copies, if the mesh has one.
  pub fn find_row_set(
    &self,
    from: &str,
    from_copy: usize,
    to: &str,
    to_copy: usize,
  ) -> Option<Arc<RowSet>> {
    self.lock().mesh.find(from, from_copy, to, to_copy)
  }

  /// Releases the run: disposes copies that never started, cancels every
  /// queue and drops the log channels. Must not be called while the run is
  /// still going.
  pub async fn dispose(&self) {
    let mut runners = std::mem::take(&mut self.lock().runners);
    for runner in &mut runners {
      runner.dispose().await;
    }
    drop(runners);
    let mut inner = self.lock();
    inner.cancel_queues();
    inner.producers.clear();
    inner.trans_listeners.clear();
    inner.root_log = None;
    drop(inner);
    self.log.dispose();
  }
}
