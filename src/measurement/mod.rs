//! Measurement data: decoded samples, step output files and the plot sink.

pub mod output;
pub mod sample;
pub mod sink;

pub use output::OutputFile;
pub use sample::{decode_sweep, Reading, Sample};
pub use sink::{PlotModel, SampleSink, SymbolKind};
