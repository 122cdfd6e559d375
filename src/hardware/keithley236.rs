//! Keithley 236 Source-Measure Unit Driver
//!
//! Reference: Model 236/237/238 Source Measure Units Operator's Manual
//!
//! Protocol Overview:
//! - Transport: GPIB, one device-dependent command per write, no terminator
//! - Commands: single letter plus comma separated arguments, executed by `X`
//! - Events: service request on conditions enabled in the SRQ mask (`M`)
//! - Status: serial poll byte, see [`StatusByte`]
//!
//! # Important Notes
//!
//! - The compliance range argument of `L` must select autorange (1) when the
//!   programmed source level is exactly zero, otherwise the unit reports a
//!   compliance overflow on the first reading
//! - Sweep tables with a zero step stall the unit; steps are floored at
//!   1e-4 V for voltage sweeps and 1e-13 A for current sweeps
//! - `U1X` / `U9X` place the error / warning status word in the output buffer
//!
//! # Example Usage
//!
//! ```no_run
//! use gfet_daq::hardware::gpib::BusAddress;
//! use gfet_daq::hardware::keithley236::{Keithley236, SourceKind};
//! use gfet_daq::hardware::mock::MockBus;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
//!     let smu = Keithley236::new(bus, BusAddress::new(0, 12));
//!     let mut events = smu.subscribe();
//!
//!     smu.init().await?;
//!     smu.source(SourceKind::Voltage, 0.1, 1e-3).await?;
//!     smu.wait_until_ready(Duration::from_secs(5), &CancellationToken::new()).await?;
//!     smu.send_trigger().await?;
//!
//!     while let Ok(notification) = events.recv().await {
//!         println!("{:?}", notification.event);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, DaqError};
use crate::format::format_general;
use crate::hardware::gpib::{BusAddress, BusError, SharedTransport};
use crate::hardware::notifier::NotifierHandle;
use crate::hardware::status::{StatusByte, StatusEvent};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Quantity sourced by the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Source voltage, measure current
    Voltage,
    /// Source current, measure voltage
    Current,
}

impl SourceKind {
    /// Smallest sweep step the unit is programmed with.
    pub fn minimum_step(self) -> f64 {
        match self {
            SourceKind::Voltage => 1.0e-4,
            SourceKind::Current => 1.0e-13,
        }
    }

    /// Step written into the sweep table for a requested `step`.
    pub fn table_step(self, step: f64) -> f64 {
        step.max(self.minimum_step())
    }

    /// Argument of the `F` (function) command.
    fn function_code(self) -> u8 {
        match self {
            SourceKind::Voltage => 0,
            SourceKind::Current => 1,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Voltage => write!(f, "voltage"),
            SourceKind::Current => write!(f, "current"),
        }
    }
}

/// Lifecycle of a driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// No session, or session closed
    Idle,
    /// Initialized and cleared, output not programmed
    Ready,
    /// DC source programmed and armed
    Sourcing,
    /// Sweep table programmed and armed
    Sweeping,
    /// A bus error occurred while programming
    Faulted,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "Idle"),
            DriverState::Ready => write!(f, "Ready"),
            DriverState::Sourcing => write!(f, "Sourcing"),
            DriverState::Sweeping => write!(f, "Sweeping"),
            DriverState::Faulted => write!(f, "Faulted"),
        }
    }
}

/// Notification raised by the status handler.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentEvent {
    /// Source clamped at the compliance limit (running count since the last
    /// source programming)
    ComplianceEntered {
        /// Number of compliance events seen
        count: u32,
    },
    /// Serviced status byte without the compliance bit
    ComplianceCleared,
    /// Error status word read with `U1X`
    Error(String),
    /// Warning status word read with `U9X`
    Warning(String),
    /// Raw comma separated sweep buffer
    SweepComplete(String),
    /// Trigger out pulse reported
    TriggerOut,
    /// Armed and waiting for a trigger
    Ready,
    /// Raw `source,measure` reading
    NewReading(String),
    /// Bus failure while servicing a request
    Fault(String),
}

/// Event stamped with its origin and arrival time.
#[derive(Debug, Clone)]
pub struct InstrumentNotification {
    /// Instrument that raised the event
    pub address: BusAddress,
    /// Local time the event was handled
    pub timestamp: DateTime<Local>,
    /// What happened
    pub event: InstrumentEvent,
}

/// Delays used by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverTiming {
    /// Serial poll period of the notifier
    pub poll_interval: Duration,
    /// Pause after a compliance event before polling again
    pub compliance_settle: Duration,
    /// Pause between programming a source and enabling service requests
    pub program_settle: Duration,
    /// Pause after the device clear in `init`
    pub clear_settle: Duration,
    /// First backoff step of `wait_until_ready`
    pub ready_backoff_min: Duration,
    /// Largest backoff step of `wait_until_ready`
    pub ready_backoff_max: Duration,
}

impl Default for DriverTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(569),
            compliance_settle: Duration::from_millis(300),
            program_settle: Duration::from_secs(1),
            clear_settle: Duration::from_secs(1),
            ready_backoff_min: Duration::from_millis(1),
            ready_backoff_max: Duration::from_millis(50),
        }
    }
}

impl DriverTiming {
    /// Timing for simulated buses: fast polling and no settle delays.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            compliance_settle: Duration::ZERO,
            program_settle: Duration::ZERO,
            clear_settle: Duration::ZERO,
            ready_backoff_min: Duration::from_millis(1),
            ready_backoff_max: Duration::from_millis(2),
        }
    }
}

/// State shared between the driver and its notifier task.
pub(crate) struct DriverCore {
    bus: SharedTransport,
    address: BusAddress,
    /// Serializes command sequences and status handling on this unit.
    io: Mutex<()>,
    state: watch::Sender<DriverState>,
    sweeping: AtomicBool,
    compliance_events: AtomicU32,
    /// Cleared while a status handler runs; the notifier skips polling then.
    pub(crate) rearm: AtomicBool,
    events: broadcast::Sender<InstrumentNotification>,
    timing: DriverTiming,
}

impl DriverCore {
    fn set_state(&self, state: DriverState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(instrument = %self.address, from = %previous, to = %state, "state change");
        }
    }

    fn publish(&self, event: InstrumentEvent) -> InstrumentEvent {
        // No subscribers is not an error: the engine may not be listening yet.
        let _ = self.events.send(InstrumentNotification {
            address: self.address,
            timestamp: Local::now(),
            event: event.clone(),
        });
        event
    }

    async fn settle(duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    /// Write `command` and read the response. Caller holds the I/O lock.
    async fn query_locked(&self, command: &str) -> Result<String, BusError> {
        self.bus.write(self.address, command).await?;
        self.bus.read(self.address).await
    }

    /// Serial poll and dispatch to the status handler if service was requested.
    pub(crate) async fn check_notify(&self) {
        let polled = {
            let _io = self.io.lock().await;
            self.bus.serial_poll(self.address).await
        };
        match polled {
            Ok(byte) if byte.requests_service() => {
                self.handle_status(byte).await;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(instrument = %self.address, error = %err, "serial poll failed");
                self.publish(InstrumentEvent::Fault(err.to_string()));
            }
        }
    }

    /// Status handler. Events are processed in [`StatusByte::events`] order
    /// and a completed sweep ends processing of the byte.
    pub(crate) async fn handle_status(&self, byte: StatusByte) -> Vec<InstrumentEvent> {
        self.rearm.store(false, Ordering::SeqCst);
        let _io = self.io.lock().await;
        let mut raised = Vec::new();
        debug!(instrument = %self.address, status = byte.bits(), "servicing request");

        if !byte.contains(StatusByte::COMPLIANCE) {
            raised.push(self.publish(InstrumentEvent::ComplianceCleared));
        }

        for event in byte.events() {
            match event {
                StatusEvent::Compliance => {
                    let count = self.compliance_events.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(instrument = %self.address, count, "compliance event");
                    raised.push(self.publish(InstrumentEvent::ComplianceEntered { count }));
                    Self::settle(self.timing.compliance_settle).await;
                }
                StatusEvent::Error => {
                    raised.push(self.publish(match self.query_locked("U1X").await {
                        Ok(word) => {
                            warn!(instrument = %self.address, word = %word, "instrument error");
                            InstrumentEvent::Error(word)
                        }
                        Err(err) => InstrumentEvent::Fault(err.to_string()),
                    }));
                }
                StatusEvent::Warning => {
                    raised.push(self.publish(match self.query_locked("U9X").await {
                        Ok(word) => {
                            warn!(instrument = %self.address, word = %word, "instrument warning");
                            InstrumentEvent::Warning(word)
                        }
                        Err(err) => InstrumentEvent::Fault(err.to_string()),
                    }));
                }
                StatusEvent::SweepDone => {
                    raised.push(self.publish(match self.bus.read(self.address).await {
                        Ok(payload) => {
                            info!(instrument = %self.address, bytes = payload.len(), "sweep done");
                            self.set_state(DriverState::Ready);
                            InstrumentEvent::SweepComplete(payload)
                        }
                        Err(err) => InstrumentEvent::Fault(err.to_string()),
                    }));
                    break;
                }
                StatusEvent::TriggerOut => {
                    debug!(instrument = %self.address, "trigger out");
                    raised.push(self.publish(InstrumentEvent::TriggerOut));
                }
                StatusEvent::ReadyForTrigger => {
                    raised.push(self.publish(InstrumentEvent::Ready));
                }
                StatusEvent::ReadingDone => {
                    if self.sweeping.load(Ordering::SeqCst) {
                        continue;
                    }
                    match self.bus.read(self.address).await {
                        Ok(reading) if !reading.trim().is_empty() => {
                            raised.push(self.publish(InstrumentEvent::NewReading(reading)));
                        }
                        Ok(_) => {}
                        Err(err) => {
                            raised.push(self.publish(InstrumentEvent::Fault(err.to_string())))
                        }
                    }
                }
            }
        }

        self.rearm.store(true, Ordering::SeqCst);
        raised
    }
}

/// Driver for one Keithley 236 on a GPIB bus.
///
/// Every operation takes `&self`; command sequences and the status handler
/// are serialized per instrument, so a handler never interleaves with a
/// programming sequence on the same unit.
pub struct Keithley236 {
    core: Arc<DriverCore>,
    notifier: StdMutex<Option<NotifierHandle>>,
}

impl Keithley236 {
    /// Create a driver for the unit at `address`. No bus traffic happens
    /// until [`init`](Self::init).
    pub fn new(bus: SharedTransport, address: BusAddress) -> Self {
        Self::with_timing(bus, address, DriverTiming::default())
    }

    /// Create a driver with custom delays.
    pub fn with_timing(bus: SharedTransport, address: BusAddress, timing: DriverTiming) -> Self {
        let (state, _) = watch::channel(DriverState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            core: Arc::new(DriverCore {
                bus,
                address,
                io: Mutex::new(()),
                state,
                sweeping: AtomicBool::new(false),
                compliance_events: AtomicU32::new(0),
                rearm: AtomicBool::new(true),
                events,
                timing,
            }),
            notifier: StdMutex::new(None),
        }
    }

    /// Bus address of this unit.
    pub fn address(&self) -> BusAddress {
        self.core.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        *self.core.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<DriverState> {
        self.core.state.subscribe()
    }

    /// Subscribe to instrument events. Dropping the receiver disconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<InstrumentNotification> {
        self.core.events.subscribe()
    }

    /// Compliance events since the last source programming.
    pub fn compliance_events(&self) -> u32 {
        self.core.compliance_events.load(Ordering::SeqCst)
    }

    /// True while a sweep table is armed.
    pub fn is_sweeping(&self) -> bool {
        self.core.sweeping.load(Ordering::SeqCst)
    }

    /// Open the session: check the listener, start the notifier and clear
    /// the unit.
    ///
    /// # Errors
    /// `InstrumentNotPresent` if no listener answers or the clear fails.
    pub async fn init(&self) -> AppResult<()> {
        let address = self.core.address;
        {
            let _io = self.core.io.lock().await;
            match self.core.bus.listener_present(address).await {
                Ok(true) => {}
                Ok(false) => {
                    let _ = self.core.bus.go_offline(address).await;
                    return Err(DaqError::InstrumentNotPresent {
                        address,
                        reason: "no listener at address".into(),
                    });
                }
                Err(err) => {
                    return Err(DaqError::InstrumentNotPresent {
                        address,
                        reason: err.to_string(),
                    })
                }
            }
        }

        self.start_notifier();

        let cleared = {
            let _io = self.core.io.lock().await;
            self.core.bus.device_clear(address).await
        };
        if let Err(err) = cleared {
            self.stop_notifier().await;
            return Err(DaqError::InstrumentNotPresent {
                address,
                reason: err.to_string(),
            });
        }
        DriverCore::settle(self.core.timing.clear_settle).await;

        self.core.sweeping.store(false, Ordering::SeqCst);
        self.core.set_state(DriverState::Ready);
        info!(instrument = %address, transport = self.core.bus.name(), "Keithley 236 initialized");
        Ok(())
    }

    /// Program a DC source at `level` with `compliance`, arm the trigger and
    /// enable service requests for compliance, error, warning, ready and
    /// reading-done.
    pub async fn source(&self, kind: SourceKind, level: f64, compliance: f64) -> AppResult<()> {
        self.core.compliance_events.store(0, Ordering::SeqCst);
        self.core.sweeping.store(false, Ordering::SeqCst);

        let function = kind.function_code();
        // Autorange the compliance measurement when sourcing exactly zero.
        let range = if level == 0.0 { 1 } else { 0 };
        let mut commands = vec![
            "M0,0".to_string(),
            "R0".to_string(),
            "O1".to_string(),
            "T1,1,0,0".to_string(),
            format!("F{},1X", function),
            format!("L{},{}X", number(compliance), range),
        ];
        let dc_function = format!("F{},0", function);
        let settings = ["G5,2,0", "Z0", "P5", "S3"].map(String::from);
        match kind {
            SourceKind::Voltage => {
                commands.push(dc_function);
                commands.extend(settings);
            }
            SourceKind::Current => {
                commands.extend(settings);
                commands.push(dc_function);
            }
        }
        commands.push(format!("B{},0,0X", number(level)));
        commands.push("R1".to_string());
        commands.push("N1".to_string());

        let operation = match kind {
            SourceKind::Voltage => "source_voltage",
            SourceKind::Current => "source_current",
        };
        self.program(operation, &commands).await?;
        DriverCore::settle(self.core.timing.program_settle).await;
        self.program(
            operation,
            &[format!("M{},0X", StatusByte::SOURCE_SRQ_MASK.bits())],
        )
        .await?;

        self.core.set_state(DriverState::Sourcing);
        debug!(instrument = %self.core.address, %kind, level, compliance, "source programmed");
        Ok(())
    }

    /// Program a DC voltage source.
    pub async fn source_voltage(&self, level: f64, compliance: f64) -> AppResult<()> {
        self.source(SourceKind::Voltage, level, compliance).await
    }

    /// Program a DC current source.
    pub async fn source_current(&self, level: f64, compliance: f64) -> AppResult<()> {
        self.source(SourceKind::Current, level, compliance).await
    }

    /// Program and arm a linear staircase sweep from `start` to `stop`.
    ///
    /// The table step is `max(step, floor)` (see [`SourceKind::minimum_step`]).
    /// `delay_ms` is the dwell at each level. If programming the table fails
    /// the unit is left un-armed.
    pub async fn arm_sweep(
        &self,
        kind: SourceKind,
        start: f64,
        stop: f64,
        step: f64,
        delay_ms: f64,
        compliance: f64,
    ) -> AppResult<()> {
        let table_step = kind.table_step(step);
        let setup = vec![
            "M0,0X".to_string(),
            format!("F{},1", kind.function_code()),
            "O1".to_string(),
            "T1,0,0,0".to_string(),
            format!("L{},0X", number(compliance)),
            "G5,2,2".to_string(),
            "Z0".to_string(),
            format!(
                "Q1,{},{},{},0,{}X",
                number(start),
                number(stop),
                number(table_step),
                number(delay_ms)
            ),
        ];
        self.program("arm_sweep", &setup).await?;

        let arm = vec![
            "R1".to_string(),
            "N1X".to_string(),
            format!("M{},0X", StatusByte::SWEEP_SRQ_MASK.bits()),
        ];
        self.program("arm_sweep", &arm).await?;

        self.core.sweeping.store(true, Ordering::SeqCst);
        self.core.set_state(DriverState::Sweeping);
        debug!(instrument = %self.core.address, %kind, start, stop, step = table_step, "sweep armed");
        Ok(())
    }

    /// Place the output in standby.
    pub async fn stand_by(&self) -> AppResult<()> {
        self.program("stand_by", &["N0X".to_string()]).await?;
        self.core.set_state(DriverState::Ready);
        Ok(())
    }

    /// Stop event notification, disable service requests, disarm, place in
    /// standby and clear the unit. Safe to call any number of times.
    pub async fn stop_sweep(&self) {
        self.stop_notifier().await;
        self.quiesce("stop_sweep").await;
        {
            let _io = self.core.io.lock().await;
            if let Err(err) = self.core.bus.device_clear(self.core.address).await {
                warn!(instrument = %self.core.address, error = %err, "device clear failed");
            }
        }
        self.core.sweeping.store(false, Ordering::SeqCst);
        self.core.set_state(DriverState::Idle);
    }

    /// Stop event notification, place the unit in standby and release the
    /// session. Safe to call any number of times.
    pub async fn end_measure(&self) {
        self.stop_notifier().await;
        self.quiesce("end_measure").await;
        {
            let _io = self.core.io.lock().await;
            if let Err(err) = self.core.bus.go_offline(self.core.address).await {
                warn!(instrument = %self.core.address, error = %err, "go offline failed");
            }
        }
        self.core.sweeping.store(false, Ordering::SeqCst);
        self.core.set_state(DriverState::Idle);
    }

    /// Serial poll and test the ready-for-trigger bit.
    ///
    /// Fails closed: a poll error reads as "not ready". A byte carrying a
    /// service request is passed to the status handler so the event is not
    /// lost to this poll.
    pub async fn is_ready_for_trigger(&self) -> bool {
        let polled = {
            let _io = self.core.io.lock().await;
            self.core.bus.serial_poll(self.core.address).await
        };
        match polled {
            Ok(byte) => {
                if byte.requests_service() {
                    self.core.handle_status(byte).await;
                }
                byte.contains(StatusByte::READY_FOR_TRIGGER)
            }
            Err(err) => {
                warn!(instrument = %self.core.address, error = %err, "ready poll failed");
                false
            }
        }
    }

    /// Poll until the unit is ready for a trigger.
    ///
    /// Polls back off exponentially between the configured bounds.
    ///
    /// # Errors
    /// `ReadyTimeout` after `timeout`, `Cancelled` when `cancel` fires.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        let mut backoff = self.core.timing.ready_backoff_min;
        loop {
            if cancel.is_cancelled() {
                return Err(DaqError::Cancelled);
            }
            if self.is_ready_for_trigger().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DaqError::ReadyTimeout {
                    address: self.core.address,
                    timeout,
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DaqError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.core.timing.ready_backoff_max);
        }
    }

    /// Group execute trigger.
    pub async fn send_trigger(&self) -> AppResult<()> {
        let result = {
            let _io = self.core.io.lock().await;
            self.core.bus.trigger(self.core.address).await
        };
        result.map(|_| ()).map_err(|err| {
            self.core.set_state(DriverState::Faulted);
            DaqError::BusTransport(err)
        })
    }

    /// Run the status handler on `byte` and return the events it raised.
    ///
    /// Normally invoked by the notifier; exposed for callers that obtained a
    /// status byte themselves.
    pub async fn on_status_event(&self, byte: StatusByte) -> Vec<InstrumentEvent> {
        self.core.handle_status(byte).await
    }

    /// Send `commands` in order, continuing past failures, and report every
    /// failure as one `Command` error.
    async fn program(&self, operation: &'static str, commands: &[String]) -> AppResult<()> {
        let address = self.core.address;
        let _io = self.core.io.lock().await;
        let mut failures = Vec::new();
        for command in commands {
            if let Err(err) = self.core.bus.write(address, command).await {
                warn!(instrument = %address, %command, error = %err, "command failed");
                failures.push(if err.detail.is_some() {
                    err
                } else {
                    err.with_detail(command.as_str())
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            self.core.set_state(DriverState::Faulted);
            Err(DaqError::Command {
                operation,
                address,
                failures,
            })
        }
    }

    /// Disable SRQ, disarm and go to standby, logging failures.
    async fn quiesce(&self, operation: &'static str) {
        let commands = ["M0,0X", "R0", "N0X"].map(String::from);
        if let Err(err) = self.program(operation, &commands).await {
            warn!(instrument = %self.core.address, error = %err, "standby sequence failed");
        }
    }

    fn notifier_slot(&self) -> std::sync::MutexGuard<'_, Option<NotifierHandle>> {
        self.notifier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_notifier(&self) {
        let handle = NotifierHandle::spawn(self.core.clone(), self.core.timing.poll_interval);
        if let Some(previous) = self.notifier_slot().replace(handle) {
            previous.cancel();
        }
    }

    async fn stop_notifier(&self) {
        let handle = self.notifier_slot().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

impl Drop for Keithley236 {
    fn drop(&mut self) {
        if let Some(handle) = self.notifier_slot().take() {
            handle.cancel();
        }
    }
}

/// Command-string rendering of a numeric argument.
fn number(value: f64) -> String {
    format_general(value, 6)
}
