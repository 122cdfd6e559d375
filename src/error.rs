//! Custom error types for the application.
//!
//! `DaqError` is the single error type returned by the library. It follows
//! the failure classes of the bench:
//!
//! - **`BusTransport`**: a write, read, poll or trigger failed on the bus. Carries
//!   the decoded status/error/count registers.
//! - **`InstrumentNotPresent`**: listener check or session setup failed during `init`.
//! - **`Command`**: one or more sub-commands of a programming sequence failed.
//! - **`MalformedPayload`**: a reading or sweep buffer did not split into the
//!   expected fields.
//! - **`FileIo`**: an output file could not be created or written.
//!
//! Bus, presence and command failures abort the current run and tear down
//! both instrument sessions. A malformed payload aborts only the run.
//! Compliance and warnings are not errors; they travel as instrument events.

use crate::hardware::gpib::{BusAddress, BusError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GPIB error: {0}")]
    BusTransport(#[from] BusError),

    #[error("Instrument at {address} not present: {reason}")]
    InstrumentNotPresent { address: BusAddress, reason: String },

    #[error("{operation} failed on {address}: {}", summarize(.failures))]
    Command {
        operation: &'static str,
        address: BusAddress,
        failures: Vec<BusError>,
    },

    #[error("Measurement Format Error: {0}")]
    MalformedPayload(String),

    #[error("Unable to open output file {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Instrument at {address} not ready for trigger after {timeout:?}")]
    ReadyTimeout { address: BusAddress, timeout: Duration },

    #[error("No {expected} from {address} within {timeout:?}")]
    EventTimeout {
        address: BusAddress,
        expected: &'static str,
        timeout: Duration,
    },

    #[error("Event stream of {0} closed")]
    EventStreamClosed(BusAddress),

    #[error("Measurement cancelled")]
    Cancelled,

    #[error("A measurement is already in progress")]
    RunInProgress,

    #[error("This measurement needs a gate generator but only one instrument is available")]
    GateGeneratorRequired,

    #[error("No Keithley 236 found on GPIB board {0}")]
    NoInstrumentsFound(u8),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

fn summarize(failures: &[BusError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// True when the instruments can no longer be trusted and both sessions
    /// must be closed before anything else is attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::BusTransport(_)
                | DaqError::InstrumentNotPresent { .. }
                | DaqError::Command { .. }
                | DaqError::ReadyTimeout { .. }
                | DaqError::EventTimeout { .. }
                | DaqError::EventStreamClosed(_)
        )
    }

    /// True when the operator can simply start another run.
    pub fn can_recover(&self) -> bool {
        !self.is_fatal()
    }
}
