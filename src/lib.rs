//! # hopflow
//!
//! Transformation execution engine: a graph of steps connected by hops runs as
//! one tokio task per step copy, exchanging typed rows over bounded row sets
//! until every source is exhausted.
//!
//! ## Architecture
//!
//! - [types]: rows, row shapes, step/hop metadata, run states and results.
//! - [row_set]: bounded hand-off queue between one producer and one consumer copy.
//! - [router]: copy / distribute / partition delivery of written rows.
//! - [graph] and [mesh]: validation and row set allocation per hop.
//! - [step] and [steps]: the per-row step contract, dispatch table and built-in kinds.
//! - [runner]: the worker loop of one step copy.
//! - [controller]: prepare / start / stop / wait lifecycle of a run.
//! - [log]: run-scoped channel tree over a bounded line buffer.
//!
//! ```no_run
//! use hopflow::{HopMeta, StepMeta, TransController, TransGraph};
//!
//! # async fn demo() -> Result<(), hopflow::TransError> {
//! let graph = TransGraph::new("demo")
//!   .with_step(StepMeta::new("in", "dummy"))
//!   .with_step(StepMeta::new("out", "dummy"))
//!   .with_hop(HopMeta::copy("in", "out"));
//! let trans = TransController::with_builtins();
//! trans.prepare(graph)?;
//! let producer = trans.add_row_producer("in", 0)?;
//! trans.start().await?;
//! producer.finished();
//! let result = trans.wait_until_finished().await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
#[cfg(test)]
mod graph_test;
pub mod listener;
pub mod log;
pub mod mesh;
pub mod producer;
pub mod result_io;
pub mod router;
#[cfg(test)]
mod router_test;
pub mod row_set;
pub mod runner;
pub mod step;
pub mod steps;
pub mod types;

pub use config::TransConfig;
pub use controller::TransController;
pub use error::{
  GraphError, ResultIoError, RouterError, RowError, RowSetError, StepError, TransError,
};
pub use graph::TransGraph;
pub use listener::{RowCollector, RowListener, RowTap, TransListener};
pub use log::{LogChannel, LogLevel, LogLine, LogStore};
pub use producer::RowProducer;
pub use row_set::RowSet;
pub use step::{InputMode, ProcessOutcome, Step, StepContext, StepInput, StepOutput, StepRegistry};
pub use types::{
  DataMovement, ErrorHandlingMeta, HopMeta, PartitionMeta, Row, RowMeta, RunResult, StepMeta,
  StepResult, StepState, StepStatus, TransState, Value, ValueMeta, ValueType,
};
