//! # GFET characterization bench
//!
//! Control of two Keithley 236 source-measure units on a GPIB bus for
//! graphene field-effect transistor measurements: one unit (the DUT
//! evaluator) sources the drain-source voltage and measures the drain
//! current, the other (the gate generator) biases the gate.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: GPIB transport trait, the Keithley 236 driver with its
//!   poll-driven event notification, bus discovery, and a simulated bench.
//! - **`experiment`**: the measurement engine running the Ids-Vds and
//!   Rds-Vg protocols, and the run state it reports.
//! - **`measurement`**: decoded samples, step output files and the plot sink.
//! - **`config`**: bench configuration loaded with `figment` from TOML and
//!   `GFET_` environment variables.
//! - **`error`**: the `DaqError` enum used across the crate.
//! - **`format`**: C `%g` number formatting shared by files and commands.
//! - **`tracing_setup`**: `tracing-subscriber` initialization.
//! - **`validation`**: range checks for configuration values.

pub mod config;
pub mod error;
pub mod experiment;
pub mod format;
pub mod hardware;
pub mod measurement;
pub mod tracing_setup;
pub mod validation;
