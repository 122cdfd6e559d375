//! GPIB transport through a VISA runtime.
//!
//! Each instrument gets its own VISA session (`GPIB<board>::<primary>::INSTR`),
//! opened on first use and kept until `go_offline`. VISA calls block for up
//! to the session timeout, so every call runs on the blocking thread pool.
//!
//! VISA has no controller status word; a successful call reports `CMPL` and a
//! failed one `ERR` with the VISA message in the error detail. Timeouts map
//! to `EABO` with `TIMO` set, as NI-488.2 reports them.

use crate::hardware::gpib::{BusAddress, BusError, BusErrorCode, BusStatus, GpibTransport};
use crate::hardware::status::StatusByte;
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::CString;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, info};
use visa_rs::prelude::*;

const READ_CHUNK: usize = 1024;

struct VisaState {
    rm: DefaultRM,
    sessions: HashMap<BusAddress, Instrument>,
}

/// VISA-backed GPIB transport.
pub struct VisaBus {
    state: Arc<Mutex<VisaState>>,
    timeout: Duration,
}

fn visa_error(operation: &'static str, err: impl std::fmt::Display) -> BusError {
    BusError::new(operation, BusErrorCode::Edvr).with_detail(err.to_string())
}

fn io_error(operation: &'static str, err: std::io::Error) -> BusError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        BusError::new(operation, BusErrorCode::Eabo)
            .with_status(BusStatus::TIMO)
            .with_detail(err.to_string())
    } else {
        visa_error(operation, err)
    }
}

fn join_error(operation: &'static str, err: JoinError) -> BusError {
    visa_error(operation, format!("blocking VISA call failed: {err}"))
}

fn lock(state: &Mutex<VisaState>) -> MutexGuard<'_, VisaState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a blocking VISA call off the async runtime.
async fn blocking<T, F>(operation: &'static str, call: F) -> Result<T, BusError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BusError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| join_error(operation, err))?
}

impl VisaBus {
    /// Open the default VISA resource manager.
    pub fn new(timeout: Duration) -> Result<Self, BusError> {
        let rm = DefaultRM::new().map_err(|err| visa_error("viOpenDefaultRM", err))?;
        info!(?timeout, "VISA resource manager opened");
        Ok(Self {
            state: Arc::new(Mutex::new(VisaState {
                rm,
                sessions: HashMap::new(),
            })),
            timeout,
        })
    }

    /// Run `op` on the session for `address`, opening it if needed.
    async fn with_session<T, F>(
        &self,
        operation: &'static str,
        address: BusAddress,
        op: F,
    ) -> Result<T, BusError>
    where
        T: Send + 'static,
        F: FnOnce(&Instrument) -> Result<T, BusError> + Send + 'static,
    {
        let shared = self.state.clone();
        let timeout = self.timeout;
        blocking(operation, move || {
            let mut state = lock(&shared);
            let VisaState { rm, sessions } = &mut *state;
            if !sessions.contains_key(&address) {
                let resource = CString::new(address.resource_name())
                    .map_err(|err| visa_error(operation, err))?;
                let instrument = rm
                    .open(&resource.into(), AccessMode::NO_LOCK, timeout)
                    .map_err(|err| visa_error("viOpen", err))?;
                debug!(instrument = %address, "VISA session opened");
                sessions.insert(address, instrument);
            }
            match sessions.get(&address) {
                Some(instrument) => op(instrument),
                None => Err(visa_error(operation, "session unavailable")),
            }
        })
        .await
    }

    /// Drop the session for `address`, closing it in the VISA runtime.
    async fn close_session(
        &self,
        operation: &'static str,
        address: BusAddress,
    ) -> Result<bool, BusError> {
        let shared = self.state.clone();
        blocking(operation, move || {
            Ok(lock(&shared).sessions.remove(&address).is_some())
        })
        .await
    }
}

#[async_trait]
impl GpibTransport for VisaBus {
    fn name(&self) -> &str {
        "visa"
    }

    async fn write(&self, address: BusAddress, command: &str) -> Result<BusStatus, BusError> {
        let command = command.to_string();
        self.with_session("ibwrt", address, move |mut instrument| {
            instrument
                .write_all(command.as_bytes())
                .map_err(|err| io_error("ibwrt", err).with_detail(command.as_str()))?;
            Ok(BusStatus::CMPL)
        })
        .await
    }

    async fn read(&self, address: BusAddress) -> Result<String, BusError> {
        self.with_session("ibrd", address, |mut instrument| {
            let mut response = Vec::new();
            let mut chunk = [0u8; READ_CHUNK];
            // A full chunk means the response may continue.
            loop {
                let count = instrument
                    .read(&mut chunk)
                    .map_err(|err| io_error("ibrd", err).with_count(response.len() as u32))?;
                response.extend_from_slice(&chunk[..count]);
                if count < READ_CHUNK {
                    break;
                }
            }
            String::from_utf8(response)
                .map(|text| text.trim_end().to_string())
                .map_err(|err| visa_error("ibrd", err))
        })
        .await
    }

    async fn serial_poll(&self, address: BusAddress) -> Result<StatusByte, BusError> {
        self.with_session("ibrsp", address, |instrument| {
            let stb = instrument
                .read_stb()
                .map_err(|err| visa_error("ibrsp", err))?;
            Ok(StatusByte::from_bits_retain(stb as u8))
        })
        .await
    }

    async fn trigger(&self, address: BusAddress) -> Result<BusStatus, BusError> {
        self.with_session("ibtrg", address, |instrument| {
            instrument
                .assert_trigger(visa_rs::enums::assert::AssertTrigPro::TrigProtDefault)
                .map_err(|err| visa_error("ibtrg", err))?;
            Ok(BusStatus::CMPL)
        })
        .await
    }

    async fn device_clear(&self, address: BusAddress) -> Result<(), BusError> {
        self.with_session("ibclr", address, |instrument| {
            instrument.clear().map_err(|err| visa_error("ibclr", err))
        })
        .await
    }

    async fn listener_present(&self, address: BusAddress) -> Result<bool, BusError> {
        // Opening a GPIB session does not address the device; a serial poll does.
        let present = self
            .with_session("ibln", address, |instrument| Ok(instrument.read_stb().is_ok()))
            .await
            .unwrap_or(false);
        if !present {
            self.close_session("ibln", address).await?;
        }
        Ok(present)
    }

    async fn go_offline(&self, address: BusAddress) -> Result<(), BusError> {
        if self.close_session("ibonl", address).await? {
            debug!(instrument = %address, "VISA session closed");
        }
        Ok(())
    }

    async fn interface_clear(&self, board: u8) -> Result<(), BusError> {
        // The VISA INSTR resource clears the interface when the first
        // session on the board is opened.
        debug!(board, "interface clear left to the VISA runtime");
        Ok(())
    }
}
