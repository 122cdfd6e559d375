//! Measurement runs: protocol execution and run state.

pub mod run_engine;
pub mod state;

pub use run_engine::{MeasurementEngine, RunSettings, StepSequence};
pub use state::{MeasurementKind, RunState, RunStatus};
