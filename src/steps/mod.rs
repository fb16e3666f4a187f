//! Built-in step kinds.
//!
//! | type       | behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | `dummy`    | passes every row through (also the usual injection target) |
//! | `generator`| emits `limit` constant rows, no input                      |
//! | `sequence` | appends an increasing integer field                        |
//! | `abort`    | fails (or stops) the copy after a threshold of rows        |
//! | `zip_join` | joins one row from each input into one wider row           |

mod abort;
mod dummy;
mod generator;
mod sequence;
mod zip_join;
#[cfg(test)]
mod zip_join_test;

pub use abort::{AbortConfig, AbortMode, AbortStep};
pub use dummy::DummyStep;
pub use generator::{GeneratorConfig, GeneratorField, GeneratorStep};
pub use sequence::{SequenceConfig, SequenceStep};
pub use zip_join::ZipJoinStep;

use crate::step::StepRegistry;

pub const DUMMY: &str = "dummy";
pub const GENERATOR: &str = "generator";
pub const SEQUENCE: &str = "sequence";
pub const ABORT: &str = "abort";
pub const ZIP_JOIN: &str = "zip_join";

/// Registers every built-in kind on `registry`.
pub fn register_builtins(registry: &mut StepRegistry) {
  registry
    .register_fn(DUMMY, |_| Ok(Box::new(DummyStep)))
    .register_fn(GENERATOR, |meta| {
      Ok(Box::new(GeneratorStep::new(meta.decode_config()?)))
    })
    .register_fn(SEQUENCE, |meta| {
      Ok(Box::new(SequenceStep::new(meta.decode_config()?)))
    })
    .register_fn(ABORT, |meta| Ok(Box::new(AbortStep::new(meta.decode_config()?))))
    .register_fn(ZIP_JOIN, |_| Ok(Box::new(ZipJoinStep::default())));
}
