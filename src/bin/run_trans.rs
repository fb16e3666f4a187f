//! CLI: run a transformation graph.
//!
//! Without `--graph`, runs a built-in demo: rows `id = 1..=N` are injected into
//! `injector`, which fans out to `left` and `right` using the chosen movement.
//! With `--graph`, loads a JSON `TransGraph` and runs it until its sources are
//! exhausted (graphs driven this way need source steps such as `generator`).
//!
//! Usage: `run_trans [OPTIONS]`
//!
//! Ctrl-C requests a cooperative stop; the partial result is still reported.
//!
//! Set RUST_LOG=hopflow=trace for TRACE-level span enter/exit and events.

use clap::{Parser, ValueEnum};
use hopflow::config::{ENV_FEEDBACK_SIZE, ENV_ROWSET_SIZE};
use hopflow::{
  DataMovement, HopMeta, PartitionMeta, Row, RowMeta, RunResult, StepMeta, TransConfig,
  TransController, TransGraph, Value, ValueType,
};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
  Copy,
  Distribute,
  Partition,
}

/// Run a transformation graph.
#[derive(Parser, Debug)]
#[command(name = "run_trans")]
#[command(
  after_help = r#"Environment variables (override the matching flags when set):
  HOPFLOW_ROWSET_SIZE       Capacity of every row set.
  HOPFLOW_FEEDBACK_SIZE     Rows between `linenr` progress lines.
  HOPFLOW_LOG_BUFFER_SIZE   Lines kept in the in-memory log buffer.
  HOPFLOW_POLL_INTERVAL_MS  Wait slice for blocked reads and writes.

Examples:
  run_trans --rows 100000 --copies 4 --mode partition
  run_trans --graph trans.json --json"#
)]
struct Args {
  /// JSON transformation graph to run instead of the demo.
  #[arg(long, value_name = "FILE")]
  graph: Option<PathBuf>,

  /// Rows injected by the demo.
  #[arg(long, default_value_t = 7)]
  rows: i64,

  /// Copies of each demo target step.
  #[arg(long, default_value_t = 1)]
  copies: usize,

  /// Movement of the demo fan-out hops.
  #[arg(long, value_enum, default_value_t = Mode::Distribute)]
  mode: Mode,

  /// Row set capacity. Overridden by HOPFLOW_ROWSET_SIZE if set.
  #[arg(long, value_name = "ROWS")]
  rowset_size: Option<usize>,

  /// Progress line interval. Overridden by HOPFLOW_FEEDBACK_SIZE if set.
  #[arg(long, value_name = "ROWS")]
  feedback_size: Option<u64>,

  /// Print the run result as JSON.
  #[arg(long)]
  json: bool,

  /// Also write the run result to this file.
  #[arg(long, value_name = "FILE")]
  result_file: Option<PathBuf>,
}

fn demo_graph(mode: Mode, copies: usize) -> TransGraph {
  let hop = |to: &str| match mode {
    Mode::Copy => HopMeta::copy("injector", to),
    Mode::Distribute => HopMeta::new("injector", to).with_movement(DataMovement::Distribute),
    Mode::Partition => HopMeta::new("injector", to)
      .with_movement(DataMovement::Partition(PartitionMeta::on(["id"]))),
  };
  TransGraph::new("demo")
    .with_step(StepMeta::new("injector", "dummy"))
    .with_step(StepMeta::new("left", "dummy").with_copies(copies))
    .with_step(StepMeta::new("right", "dummy").with_copies(copies))
    .with_hop(hop("left"))
    .with_hop(hop("right"))
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn run_demo(trans: &TransController, args: &Args) -> Result<RunResult, BoxError> {
  trans.prepare(demo_graph(args.mode, args.copies.max(1)))?;
  let producer = trans.add_row_producer("injector", 0)?;
  trans.start().await?;
  let meta = Arc::new(RowMeta::from_pairs([("id", ValueType::Integer)]));
  for id in 1..=args.rows {
    let row = Row::new(Arc::clone(&meta), vec![Value::Integer(id)])?;
    if !producer.put_row(row).await? {
      break;
    }
  }
  producer.finished();
  Ok(trans.wait_until_finished().await?)
}

async fn run_graph(trans: &TransController, graph: TransGraph) -> Result<RunResult, BoxError> {
  trans.prepare(graph)?;
  trans.start().await?;
  Ok(trans.wait_until_finished().await?)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .with_writer(std::io::stderr)
    .init();

  info!("run_trans starting");
  let args = Args::parse();

  // Flags first, then env vars on top.
  let mut config = TransConfig::default();
  if let Some(size) = args.rowset_size {
    config = config.with_rowset_size(size);
  }
  if let Some(size) = args.feedback_size {
    config = config.with_feedback_size(size);
  }
  let config = config.with_env_overrides(|key| env::var(key).ok());
  info!(
    rowset_size = config.rowset_size,
    feedback_size = config.feedback_size,
    env_rowset = env::var(ENV_ROWSET_SIZE).is_ok(),
    env_feedback = env::var(ENV_FEEDBACK_SIZE).is_ok(),
    "options (env or flags)"
  );

  let trans = Arc::new(TransController::new(
    hopflow::StepRegistry::with_builtins(),
    config,
  ));
  {
    let trans = Arc::clone(&trans);
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received, stopping");
        trans.stop();
      }
    });
  }
  let outcome = match &args.graph {
    Some(path) => {
      let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
          eprintln!("Error reading {}: {}", path.display(), e);
          process::exit(1);
        }
      };
      let graph: TransGraph = match serde_json::from_str(&text) {
        Ok(g) => g,
        Err(e) => {
          eprintln!("Error parsing graph: {}", e);
          process::exit(1);
        }
      };
      run_graph(&trans, graph).await
    }
    None => run_demo(&trans, &args).await,
  };

  let result = match outcome {
    Ok(r) => r,
    Err(e) => {
      eprintln!("Transformation error: {}", e);
      trans.dispose().await;
      process::exit(1);
    }
  };

  if let Some(path) = &args.result_file
    && let Err(e) = result.save(path)
  {
    eprintln!("Error writing result: {}", e);
  }

  if args.json {
    match serde_json::to_string_pretty(&result) {
      Ok(json) => println!("{json}"),
      Err(e) => eprintln!("Error encoding result: {}", e),
    }
  } else {
    println!("Transformation {} finished.", result.trans_name);
    println!("  Success: {}", result.success);
    println!("  Stopped: {}", result.stopped);
    println!("  Errors: {}", result.errors);
    for s in &result.steps {
      println!(
        "  {}.{}: {} (R={}, W={}, E={})",
        s.step, s.copy, s.state, s.lines_read, s.lines_written, s.errors
      );
    }
  }
  trans.dispose().await;
  if !result.success {
    process::exit(1);
  }
}
