//! GPIB transport abstraction.
//!
//! Bus controllers following the NI-488.2 model report the outcome of every
//! call through `ibsta`/`iberr`/`ibcnt` registers sampled right after the
//! call. Here those registers travel inside the returned `Result` instead:
//! a successful call yields the status word, a failed one a [`BusError`]
//! holding status, error code and byte count together.
//!
//! Two transports implement [`GpibTransport`]:
//! - [`crate::hardware::mock::MockBus`]: deterministic simulated bench
//! - `crate::hardware::visa::VisaBus`: VISA runtime (feature `instrument_visa`)

use crate::hardware::status::StatusByte;
use async_trait::async_trait;
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

/// Location of an instrument on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusAddress {
    /// GPIB board (interface) index
    pub board: u8,
    /// Primary address, 0..=30
    pub primary: u8,
}

impl BusAddress {
    /// Create an address on `board` at `primary`.
    pub fn new(board: u8, primary: u8) -> Self {
        Self { board, primary }
    }

    /// VISA resource string for this address.
    pub fn resource_name(&self) -> String {
        format!("GPIB{}::{}::INSTR", self.board, self.primary)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIB{}::{}", self.board, self.primary)
    }
}

bitflags! {
    /// Controller status word (`ibsta`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BusStatus: u16 {
        /// Error detected
        const ERR = 0x8000;
        /// Timeout
        const TIMO = 0x4000;
        /// EOI or EOS detected
        const END = 0x2000;
        /// SRQ detected by CIC
        const SRQI = 0x1000;
        /// Device requesting service
        const RQS = 0x0800;
        /// I/O completed
        const CMPL = 0x0100;
        /// Local lockout
        const LOK = 0x0080;
        /// Remote state
        const REM = 0x0040;
        /// Controller-in-charge
        const CIC = 0x0020;
        /// Attention asserted
        const ATN = 0x0010;
        /// Talker active
        const TACS = 0x0008;
        /// Listener active
        const LACS = 0x0004;
        /// Device trigger state
        const DTAS = 0x0002;
        /// Device clear state
        const DCAS = 0x0001;
    }
}

const STATUS_LABELS: [(BusStatus, &str); 14] = [
    (BusStatus::ERR, "ERR"),
    (BusStatus::TIMO, "TIMO"),
    (BusStatus::END, "END"),
    (BusStatus::SRQI, "SRQI"),
    (BusStatus::RQS, "RQS"),
    (BusStatus::CMPL, "CMPL"),
    (BusStatus::LOK, "LOK"),
    (BusStatus::REM, "REM"),
    (BusStatus::CIC, "CIC"),
    (BusStatus::ATN, "ATN"),
    (BusStatus::TACS, "TACS"),
    (BusStatus::LACS, "LACS"),
    (BusStatus::DTAS, "DTAS"),
    (BusStatus::DCAS, "DCAS"),
];

/// Controller error code (`iberr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusErrorCode {
    /// System error
    Edvr,
    /// Function requires controller-in-charge
    Ecic,
    /// No listener on the bus
    Enol,
    /// Interface not addressed correctly
    Eadr,
    /// Invalid argument
    Earg,
    /// Function requires system controller
    Esac,
    /// I/O operation aborted (timeout)
    Eabo,
    /// Interface board not found
    Eneb,
    /// Asynchronous I/O in progress
    Eoip,
    /// No capability for operation
    Ecap,
    /// File system error
    Efso,
    /// Bus error
    Ebus,
    /// Serial poll status byte lost
    Estb,
    /// SRQ stuck on
    Esrq,
    /// Table problem
    Etab,
    /// Code outside the NI-488.2 table
    Other(i32),
}

impl BusErrorCode {
    /// Decode a raw `iberr` value.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Edvr,
            1 => Self::Ecic,
            2 => Self::Enol,
            3 => Self::Eadr,
            4 => Self::Earg,
            5 => Self::Esac,
            6 => Self::Eabo,
            7 => Self::Eneb,
            10 => Self::Eoip,
            11 => Self::Ecap,
            12 => Self::Efso,
            14 => Self::Ebus,
            15 => Self::Estb,
            16 => Self::Esrq,
            20 => Self::Etab,
            other => Self::Other(other),
        }
    }

    /// Raw `iberr` value.
    pub fn code(&self) -> i32 {
        match self {
            Self::Edvr => 0,
            Self::Ecic => 1,
            Self::Enol => 2,
            Self::Eadr => 3,
            Self::Earg => 4,
            Self::Esac => 5,
            Self::Eabo => 6,
            Self::Eneb => 7,
            Self::Eoip => 10,
            Self::Ecap => 11,
            Self::Efso => 12,
            Self::Ebus => 14,
            Self::Estb => 15,
            Self::Esrq => 16,
            Self::Etab => 20,
            Self::Other(code) => *code,
        }
    }

    /// Mnemonic and short description, if the code is known.
    fn label(&self) -> Option<(&'static str, &'static str)> {
        let label = match self {
            Self::Edvr => ("EDVR", "DOS Error"),
            Self::Ecic => ("ECIC", "Not CIC"),
            Self::Enol => ("ENOL", "No Listener"),
            Self::Eadr => ("EADR", "Address error"),
            Self::Earg => ("EARG", "Invalid argument"),
            Self::Esac => ("ESAC", "Not Sys Ctrlr"),
            Self::Eabo => ("EABO", "Op. aborted"),
            Self::Eneb => ("ENEB", "No GPIB board"),
            Self::Eoip => ("EOIP", "Async I/O in prg"),
            Self::Ecap => ("ECAP", "No capability"),
            Self::Efso => ("EFSO", "File sys. error"),
            Self::Ebus => ("EBUS", "Command error"),
            Self::Estb => ("ESTB", "Status byte lost"),
            Self::Esrq => ("ESRQ", "SRQ stuck on"),
            Self::Etab => ("ETAB", "Table Overflow"),
            Self::Other(_) => return None,
        };
        Some(label)
    }
}

/// Render status, error code and byte count the way NI-488.2 tools do:
///
/// `status = 0x8100 < ERR CMPL> error = 0x0002 ENOL <No Listener> count = 0x0000`
///
/// The error part only appears when `ERR` is set in `status`.
pub fn error_description(status: BusStatus, code: BusErrorCode, count: u32) -> String {
    let mut text = format!("status = 0x{:04x} <", status.bits());
    for (flag, label) in STATUS_LABELS {
        if status.contains(flag) {
            text.push(' ');
            text.push_str(label);
        }
    }
    text.push('>');

    if status.contains(BusStatus::ERR) {
        text.push_str(&format!(" error = 0x{:04x}", code.code()));
        if let Some((mnemonic, description)) = code.label() {
            text.push_str(&format!(" {} <{}>", mnemonic, description));
        }
    }
    text.push_str(&format!(" count = 0x{:04x}", count));
    text
}

/// A failed bus call, with the controller registers sampled right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct BusError {
    /// Bus primitive that failed (`ibwrt`, `ibrd`, `ibrsp`, ...)
    pub operation: &'static str,
    /// Status word after the call
    pub status: BusStatus,
    /// Error code after the call
    pub code: BusErrorCode,
    /// Bytes transferred before the failure
    pub count: u32,
    /// Extra context from the transport (VISA message, command text)
    pub detail: Option<String>,
}

impl BusError {
    /// Error for `operation` with `ERR` set and the given code.
    pub fn new(operation: &'static str, code: BusErrorCode) -> Self {
        Self {
            operation,
            status: BusStatus::ERR,
            code,
            count: 0,
            detail: None,
        }
    }

    /// Attach transport-specific context.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Add bits to the reported status word.
    pub fn with_status(mut self, status: BusStatus) -> Self {
        self.status |= status;
        self
    }

    /// Set the reported byte count.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Decoded register string, see [`error_description`].
    pub fn description(&self) -> String {
        error_description(self.status, self.code, self.count)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.description())?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for BusError {}

/// Byte-level access to instruments on a GPIB bus.
///
/// All calls addressed to one instrument are serialized by the driver that
/// owns it; implementations only need to be safe for concurrent use across
/// different addresses.
#[async_trait]
pub trait GpibTransport: Send + Sync {
    /// Human-readable transport name for logs.
    fn name(&self) -> &str;

    /// Send a device-dependent command string (no terminator appended).
    async fn write(&self, address: BusAddress, command: &str) -> Result<BusStatus, BusError>;

    /// Read one complete response.
    ///
    /// Fails on a truncated or garbled transfer.
    async fn read(&self, address: BusAddress) -> Result<String, BusError>;

    /// Retrieve the device status byte. Polling clears the device's
    /// service request.
    async fn serial_poll(&self, address: BusAddress) -> Result<StatusByte, BusError>;

    /// Group execute trigger.
    async fn trigger(&self, address: BusAddress) -> Result<BusStatus, BusError>;

    /// Selected device clear.
    async fn device_clear(&self, address: BusAddress) -> Result<(), BusError>;

    /// Check that a listener answers at `address`.
    async fn listener_present(&self, address: BusAddress) -> Result<bool, BusError>;

    /// Release the device session.
    async fn go_offline(&self, address: BusAddress) -> Result<(), BusError>;

    /// Pulse interface clear and assert remote enable on `board`.
    async fn interface_clear(&self, board: u8) -> Result<(), BusError>;

    /// Primary addresses among `candidates` with a listener.
    async fn find_listeners(&self, board: u8, candidates: &[u8]) -> Result<Vec<u8>, BusError> {
        let mut found = Vec::new();
        for &primary in candidates {
            if self.listener_present(BusAddress::new(board, primary)).await? {
                found.push(primary);
            }
        }
        Ok(found)
    }
}

/// Transport handle shared by all drivers on one bus.
pub type SharedTransport = Arc<dyn GpibTransport>;
