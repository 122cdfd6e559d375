//! Step output files.
//!
//! Each step of a run writes its own ASCII file, `{base_dir}/{stem}_{step}.{ext}`,
//! where `stem` is the configured file name up to its first dot and `ext`
//! everything after it. The header is gnuplot-compatible (every line starts
//! with `#`) and records the sample description and both sweep settings.

use crate::config::SweepSpec;
use crate::error::{AppResult, DaqError};
use crate::format::format_general;
use crate::measurement::sample::Sample;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const COLUMN_LABELS: [&str; 4] = ["#V_G[V]", "I_G[A]", "V_DS[V]", "I_DS[A]"];

/// Path of the file for `step`.
pub fn step_path(base_dir: &Path, file_name: &str, step: u32) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file_name);
    let file = match name.split_once('.') {
        Some((stem, ext)) if !ext.is_empty() => format!("{}_{}.{}", stem, step, ext),
        Some((stem, _)) => format!("{}_{}", stem, step),
        None => format!("{}_{}", name, step),
    };
    base_dir.join(file)
}

/// Header block written at the top of every step file.
pub fn header(sample_info: &str, dut: &SweepSpec, gate: &SweepSpec) -> String {
    let mut text = COLUMN_LABELS
        .iter()
        .map(|label| format!("{:>12}", label))
        .collect::<Vec<_>>()
        .join(" ");
    text.push('\n');
    for line in sample_info.split('\n') {
        text.push_str("# ");
        text.push_str(line.trim_end_matches('\r'));
        text.push('\n');
    }
    text.push_str(&format!(
        "# Vds_Start={}[V] Vds_Stop={}[V] Compliance={}[A]\n",
        g(dut.start),
        g(dut.stop),
        g(dut.compliance)
    ));
    text.push_str(&format!(
        "# Vg_Start={}[V] Vg_Stop={}[V] Compliance={}[A]\n",
        g(gate.start),
        g(gate.stop),
        g(gate.compliance)
    ));
    text
}

fn g(value: f64) -> String {
    format_general(value, 6)
}

/// An open step file.
pub struct OutputFile {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl OutputFile {
    /// Create (truncate) the file for `step`.
    ///
    /// # Errors
    /// `FileIo` if the file cannot be created.
    pub fn create(base_dir: &Path, file_name: &str, step: u32) -> AppResult<Self> {
        let path = step_path(base_dir, file_name, step);
        let file = File::create(&path).map_err(|source| DaqError::FileIo {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), step, "output file opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Where the file lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data lines written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Write the header block and flush it.
    pub fn write_header(&mut self, sample_info: &str, dut: &SweepSpec, gate: &SweepSpec) -> AppResult<()> {
        let text = header(sample_info, dut, gate);
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|source| self.io_error(source))
    }

    /// Append one data line.
    pub fn write_sample(&mut self, sample: &Sample) -> AppResult<()> {
        self.writer
            .write_all(sample.to_line().as_bytes())
            .map_err(|source| self.io_error(source))?;
        self.lines += 1;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> AppResult<()> {
        self.writer.flush().map_err(|source| self.io_error(source))
    }

    /// Flush and close.
    pub fn close(mut self) -> AppResult<()> {
        self.flush()?;
        debug!(path = %self.path.display(), lines = self.lines, "output file closed");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> DaqError {
        DaqError::FileIo {
            path: self.path.clone(),
            source,
        }
    }
}
