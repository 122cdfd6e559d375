//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/gfet.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `GFET_`, nested keys separated by
//!    a double underscore (`GFET_APPLICATION__LOG_LEVEL=debug`)
//!
//! The two sweep sections describe the DUT evaluator (`[dut]`, drain-source
//! voltage) and the gate generator (`[gate]`, gate voltage). They are
//! validated once here; the measurement engine takes them as a read-only
//! snapshot at run start.
//!
//! # Example
//! ```no_run
//! use gfet_daq::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! config.validate().map_err(gfet_daq::error::DaqError::Configuration)?;
//! println!("DUT sweep: {} V -> {} V", config.dut.start, config.dut.stop);
//! # Ok::<(), gfet_daq::error::DaqError>(())
//! ```

use crate::validation::{
    check_range, is_valid_path, CURRENT_RANGE, INTERVAL_RANGE, POINT_COUNT_RANGE,
    PRIMARY_ADDRESS_RANGE, VOLTAGE_RANGE, WAIT_TIME_RANGE,
};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gfet.toml";

/// Top-level bench configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// GPIB bus and instrument settings
    #[serde(default)]
    pub bus: BusConfig,
    /// Drain-source sweep of the DUT evaluator
    pub dut: SweepSpec,
    /// Gate voltage steps of the gate generator
    pub gate: SweepSpec,
    /// Output files
    #[serde(default)]
    pub output: OutputConfig,
    /// Plot sink settings
    #[serde(default)]
    pub plot: PlotConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Which transport drives the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    /// Built-in simulated Keithley 236 bench
    Simulated,
    /// VISA runtime (requires the `instrument_visa` feature)
    Visa,
}

/// GPIB bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Transport backend
    #[serde(default = "default_backend")]
    pub backend: TransportBackend,
    /// GPIB board index
    #[serde(default)]
    pub board: u8,
    /// Fixed primary address of the DUT evaluator; skips discovery
    #[serde(default)]
    pub dut_address: Option<u8>,
    /// Fixed primary address of the gate generator (with `dut_address`)
    #[serde(default)]
    pub gate_address: Option<u8>,
    /// Primary address preferred for the DUT evaluator after discovery
    #[serde(default)]
    pub preferred_dut: Option<u8>,
    /// Units attached to the simulated bench; the first is wired as the
    /// drain channel, the second as its gate
    #[serde(default = "default_simulated_addresses")]
    pub simulated_addresses: Vec<u8>,
    /// VISA I/O timeout in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Serial poll interval of the event notifier in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Longest wait for ready-for-trigger in milliseconds
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
    /// Longest wait for a reading, beyond the programmed dwell times, in
    /// milliseconds
    #[serde(default = "default_event_timeout")]
    pub event_timeout_ms: u64,
}

/// One sweep or step sequence, as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    /// First source value [V]
    pub start: f64,
    /// Last source value [V]
    pub stop: f64,
    /// Compliance limit [A]
    pub compliance: f64,
    /// Dwell at each point [ms]
    #[serde(default = "default_wait_time")]
    pub wait_time_ms: u32,
    /// Number of intervals between start and stop
    #[serde(default = "default_point_count")]
    pub point_count: u32,
    /// Interval between readings [s]
    #[serde(default = "default_interval")]
    pub interval_s: f64,
}

/// Output file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the data files
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// File name template; `data.dat` produces `data_1.dat`, `data_2.dat`, ...
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Free-text sample description copied into every file header
    #[serde(default)]
    pub sample_info: String,
}

/// Plot sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Points kept per series before the oldest quarter is dropped
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

// Default value functions
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_backend() -> TransportBackend {
    TransportBackend::Simulated
}

fn default_simulated_addresses() -> Vec<u8> {
    vec![12, 14]
}

fn default_io_timeout() -> u64 {
    3000
}

fn default_poll_interval() -> u64 {
    569
}

fn default_ready_timeout() -> u64 {
    10_000
}

fn default_event_timeout() -> u64 {
    30_000
}

fn default_wait_time() -> u32 {
    100
}

fn default_point_count() -> u32 {
    100
}

fn default_interval() -> f64 {
    1.0
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_file_name() -> String {
    "data.dat".to_string()
}

fn default_max_points() -> usize {
    3000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            board: 0,
            dut_address: None,
            gate_address: None,
            preferred_dut: None,
            simulated_addresses: default_simulated_addresses(),
            io_timeout_ms: default_io_timeout(),
            poll_interval_ms: default_poll_interval(),
            ready_timeout_ms: default_ready_timeout(),
            event_timeout_ms: default_event_timeout(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            file_name: default_file_name(),
            sample_info: String::new(),
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
        }
    }
}

impl SweepSpec {
    /// Signed distance between consecutive points.
    pub fn step(&self) -> f64 {
        (self.stop - self.start) / f64::from(self.point_count)
    }

    /// Unsigned step programmed into an instrument sweep table.
    pub fn sweep_step(&self) -> f64 {
        (self.stop - self.start).abs() / f64::from(self.point_count)
    }

    /// Dwell time per point.
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(u64::from(self.wait_time_ms))
    }

    /// Check a voltage sweep with a current compliance.
    fn validate_voltage_sweep(&self, name: &str) -> Result<(), String> {
        check_range(&format!("{name}.start"), self.start, VOLTAGE_RANGE)?;
        check_range(&format!("{name}.stop"), self.stop, VOLTAGE_RANGE)?;
        check_range(&format!("{name}.compliance"), self.compliance, CURRENT_RANGE)?;
        check_range(&format!("{name}.wait_time_ms"), self.wait_time_ms, WAIT_TIME_RANGE)?;
        check_range(&format!("{name}.point_count"), self.point_count, POINT_COUNT_RANGE)?;
        check_range(&format!("{name}.interval_s"), self.interval_s, INTERVAL_RANGE)?;
        Ok(())
    }
}

impl BenchConfig {
    /// Load configuration from `config/gfet.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix GFET_
    /// Example: GFET_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GFET_").split("__"))
            .extract()
    }

    /// Render the effective configuration as TOML.
    ///
    /// The output loads back with [`load_from`](Self::load_from).
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        self.dut.validate_voltage_sweep("dut")?;
        self.gate.validate_voltage_sweep("gate")?;

        for (name, primary) in [
            ("bus.dut_address", self.bus.dut_address),
            ("bus.gate_address", self.bus.gate_address),
            ("bus.preferred_dut", self.bus.preferred_dut),
        ] {
            if let Some(primary) = primary {
                check_range(name, primary, PRIMARY_ADDRESS_RANGE)?;
            }
        }
        if self.bus.gate_address.is_some() && self.bus.dut_address.is_none() {
            return Err("bus.gate_address requires bus.dut_address".to_string());
        }
        if self.bus.gate_address.is_some() && self.bus.gate_address == self.bus.dut_address {
            return Err("bus.gate_address must differ from bus.dut_address".to_string());
        }
        for &primary in &self.bus.simulated_addresses {
            check_range("bus.simulated_addresses", primary, PRIMARY_ADDRESS_RANGE)?;
        }
        if self.bus.poll_interval_ms == 0 {
            return Err("Invalid bus.poll_interval_ms 0. Must be positive".to_string());
        }

        is_valid_path(&self.output.file_name)
            .map_err(|e| format!("Invalid output.file_name: {}", e))?;
        if self.plot.max_points < 4 {
            return Err(format!(
                "Invalid plot.max_points {}. Must be at least 4",
                self.plot.max_points
            ));
        }

        Ok(())
    }

    /// Notifier poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.bus.poll_interval_ms)
    }
}
