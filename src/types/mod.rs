//! Data model of the transformation engine.
//!
//! Rows and their shapes flow between step copies; step/hop metadata
//! describe the graph; state and result types report on a run.

mod hop_meta;
mod row;
mod row_meta;
mod run_result;
mod step_meta;
mod step_state;
mod step_status;
mod trans_state;
mod value;
#[cfg(test)]
mod value_test;

pub use hop_meta::{DataMovement, HopMeta, PartitionMeta};
pub use row::Row;
pub use row_meta::{RowMeta, ValueMeta};
pub use run_result::{RunResult, StepResult};
pub use step_meta::{ErrorHandlingMeta, StepMeta};
pub use step_state::StepState;
pub use step_status::StepStatus;
pub use trans_state::TransState;
pub use value::{Value, ValueType};
