//! Simulated GPIB bench for testing without hardware.
//!
//! [`MockBus`] implements [`GpibTransport`] on top of a set of simulated
//! Keithley 236 units. Each unit understands the subset of the command
//! language the driver uses (one command per write, optional trailing `X`),
//! keeps an SRQ mask, latches status bits and raises a service request when
//! a masked condition becomes true. A serial poll returns the status byte and
//! clears the request.
//!
//! The electrical model is deliberately small:
//! - a drain channel whose resistance follows a graphene Dirac peak centred
//!   on the gate bias of a paired unit
//! - plain resistors for everything else (1 TΩ gate oxide by default)
//! - compliance clamps the measured quantity and latches the compliance bit
//!
//! The bus also provides:
//! - Call logging for test verification
//! - One-shot failure injection for writes and serial polls
//! - Scripted status bytes and queued responses
//! - Optional per-call latency

use crate::hardware::gpib::{BusAddress, BusError, BusErrorCode, BusStatus, GpibTransport};
use crate::hardware::status::StatusByte;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Identification answered to `U0X` by simulated units.
pub const K236_IDENTITY: &str = "236A07";

const GATE_OXIDE_RESISTANCE: f64 = 1.0e12;
const CONTACT_RESISTANCE: f64 = 1.5e3;
const PEAK_RESISTANCE: f64 = 6.0e3;
const DIRAC_POINT: f64 = 0.8;
const DIRAC_BROADENING: f64 = 2.0;
const MAX_SWEEP_POINTS: usize = 1000;
/// Bit of the `U1X` error word set for an invalid device-dependent command.
const IDDC_ERROR_BIT: u32 = 1 << 1;
const ERROR_WORD_BITS: u32 = 26;
const LATCHED_ON_POLL: StatusByte = StatusByte::SWEEP_DONE
    .union(StatusByte::READING_DONE)
    .union(StatusByte::TRIGGER_OUT);

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    /// Device-dependent command
    Write {
        /// Target device
        address: BusAddress,
        /// Command text as sent
        command: String,
    },
    /// Response read
    Read(BusAddress),
    /// Serial poll
    SerialPoll(BusAddress),
    /// Group execute trigger
    Trigger(BusAddress),
    /// Selected device clear
    DeviceClear(BusAddress),
    /// Listener presence check
    ListenerCheck(BusAddress),
    /// Session release
    GoOffline(BusAddress),
    /// Interface clear on a board
    InterfaceClear(u8),
}

/// Electrical load seen by a simulated unit's output terminals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Load {
    /// Fixed resistance in ohms
    Resistor(f64),
    /// Graphene channel modulated by the bias of the unit at `gate`
    Channel {
        /// Unit driving the gate, if any
        gate: Option<BusAddress>,
    },
}

/// Linear staircase programmed with `Q1`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SweepTable {
    start: f64,
    stop: f64,
    step: f64,
}

impl SweepTable {
    fn levels(&self) -> Vec<f64> {
        let span = (self.stop - self.start).abs();
        let step = self.step.abs();
        let count = if step > 0.0 {
            ((span / step).round() as usize).clamp(1, MAX_SWEEP_POINTS)
        } else {
            1
        };
        let direction = if self.stop < self.start { -1.0 } else { 1.0 };
        (0..count)
            .map(|k| self.start + direction * step * k as f64)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct SimulatedK236 {
    identity: String,
    present: bool,
    load: Load,
    source_current: bool,
    sweep_mode: bool,
    operate: bool,
    armed: bool,
    srq_mask: StatusByte,
    compliance: f64,
    bias: f64,
    sweep: Option<SweepTable>,
    latched: StatusByte,
    in_compliance: bool,
    last_active: StatusByte,
    service_request: bool,
    error_word: u32,
    output: VecDeque<String>,
    scripted_status: VecDeque<StatusByte>,
}

impl SimulatedK236 {
    fn new(identity: &str, load: Load) -> Self {
        Self {
            identity: identity.to_string(),
            present: true,
            load,
            source_current: false,
            sweep_mode: false,
            operate: false,
            armed: false,
            srq_mask: StatusByte::empty(),
            compliance: 0.0,
            bias: 0.0,
            sweep: None,
            latched: StatusByte::empty(),
            in_compliance: false,
            last_active: StatusByte::empty(),
            service_request: false,
            error_word: 0,
            output: VecDeque::new(),
            scripted_status: VecDeque::new(),
        }
    }

    fn ready_for_trigger(&self) -> bool {
        self.armed && self.operate
    }

    fn active(&self) -> StatusByte {
        let mut active = self.latched;
        if self.ready_for_trigger() {
            active |= StatusByte::READY_FOR_TRIGGER;
        }
        if self.in_compliance {
            active |= StatusByte::COMPLIANCE;
        }
        active
    }

    /// Raise a service request for masked conditions that just became true.
    fn update_service_request(&mut self) {
        let active = self.active();
        let rising = active.difference(self.last_active);
        if rising.intersects(self.srq_mask) {
            self.service_request = true;
        }
        self.last_active = active;
    }

    fn serial_poll(&mut self) -> StatusByte {
        if let Some(scripted) = self.scripted_status.pop_front() {
            return scripted;
        }
        let mut byte = self.active();
        if self.service_request {
            byte |= StatusByte::SERVICE_REQUEST;
        }
        self.service_request = false;
        self.latched.remove(LATCHED_ON_POLL);
        self.last_active = self.active();
        byte
    }

    fn device_clear(&mut self) {
        let identity = std::mem::take(&mut self.identity);
        let load = self.load;
        let scripted = std::mem::take(&mut self.scripted_status);
        *self = Self::new(&identity, load);
        self.scripted_status = scripted;
    }

    fn reject(&mut self) {
        self.error_word |= IDDC_ERROR_BIT;
        self.latched |= StatusByte::ERROR;
    }

    fn execute(&mut self, command: &str) {
        let body = command.trim().trim_end_matches('X');
        let mut chars = body.chars();
        let Some(letter) = chars.next() else {
            return;
        };
        let args: Vec<f64> = chars
            .as_str()
            .split(',')
            .filter(|field| !field.is_empty())
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .unwrap_or_else(|_| vec![f64::NAN]);
        if args.iter().any(|value| value.is_nan()) {
            self.reject();
            return;
        }
        let arg = |index: usize| args.get(index).copied().unwrap_or(0.0);

        match letter {
            'M' => {
                self.srq_mask =
                    StatusByte::from_bits_truncate(arg(0) as u8) - StatusByte::SERVICE_REQUEST;
                self.last_active = StatusByte::empty();
            }
            'R' => self.armed = arg(0) != 0.0,
            'N' => self.operate = arg(0) != 0.0,
            'F' => {
                self.source_current = arg(0) != 0.0;
                self.sweep_mode = arg(1) != 0.0;
            }
            'L' => self.compliance = arg(0),
            'B' => self.bias = arg(0),
            'Q' => {
                if arg(0) as u8 != 1 || args.len() < 4 {
                    self.reject();
                } else {
                    self.sweep = Some(SweepTable {
                        start: arg(1),
                        stop: arg(2),
                        step: arg(3),
                    });
                }
            }
            'U' => match arg(0) as u8 {
                0 => self.output.push_back(self.identity.clone()),
                1 => {
                    let word: String = (0..ERROR_WORD_BITS)
                        .map(|bit| if self.error_word & (1 << bit) != 0 { '1' } else { '0' })
                        .collect();
                    self.output.push_back(format!("ERS{}", word));
                    self.error_word = 0;
                    self.latched.remove(StatusByte::ERROR);
                }
                9 => {
                    self.output.push_back("WRS0000000000".to_string());
                    self.latched.remove(StatusByte::WARNING);
                }
                _ => self.output.push_back(String::new()),
            },
            // Sense, trigger, format, suppression, filter and integration
            // settings have no effect on the simulated readings.
            'O' | 'T' | 'G' | 'Z' | 'P' | 'S' => {}
            _ => self.reject(),
        }
    }

    /// Measured quantity for a source `level` with `resistance` on the output.
    fn measure(&mut self, level: f64, resistance: f64) -> f64 {
        let raw = if self.source_current {
            level * resistance
        } else {
            level / resistance
        };
        if self.compliance > 0.0 && raw.abs() > self.compliance {
            self.in_compliance = true;
            self.compliance.copysign(raw)
        } else {
            raw
        }
    }

    fn trigger(&mut self, gate_bias: f64) {
        if !self.ready_for_trigger() {
            return;
        }
        self.in_compliance = false;
        let resistance = match self.load {
            Load::Resistor(ohms) => ohms,
            Load::Channel { .. } => graphene_channel_resistance(gate_bias),
        };

        match (self.sweep_mode, self.sweep) {
            (true, Some(table)) => {
                let fields: Vec<String> = table
                    .levels()
                    .into_iter()
                    .flat_map(|level| {
                        let measured = self.measure(level, resistance);
                        [instrument_number(level), instrument_number(measured)]
                    })
                    .collect();
                self.output.push_back(fields.join(","));
                self.latched |= StatusByte::SWEEP_DONE;
            }
            (true, None) => self.reject(),
            (false, _) => {
                let measured = self.measure(self.bias, resistance);
                self.output.push_back(format!(
                    "{},{}",
                    instrument_number(self.bias),
                    instrument_number(measured)
                ));
                self.latched |= StatusByte::READING_DONE;
            }
        }
    }
}

/// Drain-source resistance of the simulated graphene channel at `gate_bias`.
pub fn graphene_channel_resistance(gate_bias: f64) -> f64 {
    let detuning = (gate_bias - DIRAC_POINT) / DIRAC_BROADENING;
    CONTACT_RESISTANCE + PEAK_RESISTANCE / (1.0 + detuning * detuning).sqrt()
}

/// Render a value like the instrument does: `+1.2345E-04`.
fn instrument_number(value: f64) -> String {
    let rendered = format!("{:+.4e}", value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}E{}{:02}", mantissa, sign, exponent.unsigned_abs())
        }
        None => rendered,
    }
}

#[derive(Debug, Default)]
struct BenchState {
    units: BTreeMap<BusAddress, SimulatedK236>,
    calls: Vec<BusCall>,
}

/// Simulated GPIB bus with Keithley 236 units attached.
///
/// # Example
///
/// ```
/// use gfet_daq::hardware::gpib::{BusAddress, GpibTransport};
/// use gfet_daq::hardware::mock::MockBus;
///
/// # tokio_test::block_on(async {
/// let bus = MockBus::gfet_bench(0, 12, 14);
/// let dut = BusAddress::new(0, 12);
/// bus.write(dut, "U0X").await.unwrap();
/// assert!(bus.read(dut).await.unwrap().contains("236"));
/// # })
/// ```
pub struct MockBus {
    state: Mutex<BenchState>,
    latency: Duration,
    fail_next_write: AtomicBool,
    fail_next_poll: AtomicBool,
}

impl MockBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BenchState::default()),
            latency: Duration::ZERO,
            fail_next_write: AtomicBool::new(false),
            fail_next_poll: AtomicBool::new(false),
        }
    }

    /// Bus with a drain unit at `dut` whose channel is gated by a unit at `gate`.
    pub fn gfet_bench(board: u8, dut: u8, gate: u8) -> Self {
        let gate = BusAddress::new(board, gate);
        Self::new()
            .with_instrument(BusAddress::new(board, dut), Load::Channel { gate: Some(gate) })
            .with_instrument(gate, Load::Resistor(GATE_OXIDE_RESISTANCE))
    }

    /// Attach a simulated Keithley 236 at `address`.
    pub fn with_instrument(self, address: BusAddress, load: Load) -> Self {
        self.with_listener(address, K236_IDENTITY, load)
    }

    /// Attach a simulated unit answering `identity` to `U0X`.
    pub fn with_listener(self, address: BusAddress, identity: &str, load: Load) -> Self {
        self.bench()
            .units
            .insert(address, SimulatedK236::new(identity, load));
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the load of the unit at `address` with a fixed resistor.
    pub fn set_resistance(&self, address: BusAddress, ohms: f64) {
        if let Some(unit) = self.bench().units.get_mut(&address) {
            unit.load = Load::Resistor(ohms);
        }
    }

    /// Connect or disconnect the unit at `address`.
    pub fn set_present(&self, address: BusAddress, present: bool) {
        if let Some(unit) = self.bench().units.get_mut(&address) {
            unit.present = present;
        }
    }

    /// Make the next write fail with a timeout.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Make the next serial poll fail.
    pub fn fail_next_poll(&self) {
        self.fail_next_poll.store(true, Ordering::SeqCst);
    }

    /// Return `byte` verbatim from the next serial poll of `address`.
    pub fn inject_status(&self, address: BusAddress, byte: StatusByte) {
        if let Some(unit) = self.bench().units.get_mut(&address) {
            unit.scripted_status.push_back(byte);
        }
    }

    /// Queue a response for the next read from `address`.
    pub fn queue_response(&self, address: BusAddress, response: &str) {
        if let Some(unit) = self.bench().units.get_mut(&address) {
            unit.output.push_back(response.to_string());
        }
    }

    /// Latched-plus-level status of `address` without clearing anything.
    pub fn peek_status(&self, address: BusAddress) -> Option<StatusByte> {
        self.bench().units.get(&address).map(SimulatedK236::active)
    }

    /// Source level last programmed with `B` on `address`.
    pub fn bias(&self, address: BusAddress) -> Option<f64> {
        self.bench().units.get(&address).map(|unit| unit.bias)
    }

    /// Copy of every recorded call.
    pub fn calls(&self) -> Vec<BusCall> {
        self.bench().calls.clone()
    }

    /// Commands written to `address`, in order.
    pub fn writes_to(&self, address: BusAddress) -> Vec<String> {
        self.bench()
            .calls
            .iter()
            .filter_map(|call| match call {
                BusCall::Write { address: a, command } if *a == address => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.bench().calls.clear();
    }

    fn bench(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

fn no_listener(operation: &'static str, address: BusAddress) -> BusError {
    BusError::new(operation, BusErrorCode::Enol).with_detail(format!("no listener at {}", address))
}

impl BenchState {
    fn unit_mut(
        &mut self,
        operation: &'static str,
        address: BusAddress,
    ) -> Result<&mut SimulatedK236, BusError> {
        match self.units.get_mut(&address) {
            Some(unit) if unit.present => Ok(unit),
            _ => Err(no_listener(operation, address)),
        }
    }
}

#[async_trait]
impl GpibTransport for MockBus {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn write(&self, address: BusAddress, command: &str) -> Result<BusStatus, BusError> {
        self.simulate_latency().await;
        let mut bench = self.bench();
        bench.calls.push(BusCall::Write {
            address,
            command: command.to_string(),
        });
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(BusError::new("ibwrt", BusErrorCode::Eabo)
                .with_status(BusStatus::TIMO)
                .with_detail(command.to_string()));
        }
        let unit = bench.unit_mut("ibwrt", address)?;
        unit.execute(command);
        unit.update_service_request();
        Ok(BusStatus::CMPL | BusStatus::REM)
    }

    async fn read(&self, address: BusAddress) -> Result<String, BusError> {
        self.simulate_latency().await;
        let mut bench = self.bench();
        bench.calls.push(BusCall::Read(address));
        let unit = bench.unit_mut("ibrd", address)?;
        unit.output.pop_front().ok_or_else(|| {
            BusError::new("ibrd", BusErrorCode::Eabo)
                .with_status(BusStatus::TIMO)
                .with_detail("no data pending")
        })
    }

    async fn serial_poll(&self, address: BusAddress) -> Result<StatusByte, BusError> {
        self.simulate_latency().await;
        let mut bench = self.bench();
        bench.calls.push(BusCall::SerialPoll(address));
        if self.fail_next_poll.swap(false, Ordering::SeqCst) {
            return Err(BusError::new("ibrsp", BusErrorCode::Estb));
        }
        Ok(bench.unit_mut("ibrsp", address)?.serial_poll())
    }

    async fn trigger(&self, address: BusAddress) -> Result<BusStatus, BusError> {
        self.simulate_latency().await;
        let mut bench = self.bench();
        bench.calls.push(BusCall::Trigger(address));
        let gate_bias = match bench.units.get(&address).map(|unit| unit.load) {
            Some(Load::Channel { gate: Some(gate) }) => bench
                .units
                .get(&gate)
                .filter(|unit| unit.operate)
                .map_or(0.0, |unit| unit.bias),
            _ => 0.0,
        };
        let unit = bench.unit_mut("ibtrg", address)?;
        unit.trigger(gate_bias);
        unit.update_service_request();
        Ok(BusStatus::CMPL)
    }

    async fn device_clear(&self, address: BusAddress) -> Result<(), BusError> {
        self.simulate_latency().await;
        let mut bench = self.bench();
        bench.calls.push(BusCall::DeviceClear(address));
        bench.unit_mut("ibclr", address)?.device_clear();
        Ok(())
    }

    async fn listener_present(&self, address: BusAddress) -> Result<bool, BusError> {
        let mut bench = self.bench();
        bench.calls.push(BusCall::ListenerCheck(address));
        Ok(bench
            .units
            .get(&address)
            .is_some_and(|unit| unit.present))
    }

    async fn go_offline(&self, address: BusAddress) -> Result<(), BusError> {
        self.bench().calls.push(BusCall::GoOffline(address));
        Ok(())
    }

    async fn interface_clear(&self, board: u8) -> Result<(), BusError> {
        self.bench().calls.push(BusCall::InterfaceClear(board));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUT: BusAddress = BusAddress { board: 0, primary: 12 };
    const GATE: BusAddress = BusAddress { board: 0, primary: 14 };

    async fn program(bus: &MockBus, address: BusAddress, commands: &[&str]) {
        for command in commands {
            bus.write(address, command).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_identification() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.write(DUT, "U0X").await.unwrap();
        assert_eq!(bus.read(DUT).await.unwrap(), K236_IDENTITY);
    }

    #[tokio::test]
    async fn test_absent_listener() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        let missing = BusAddress::new(0, 3);
        assert!(!bus.listener_present(missing).await.unwrap());
        let err = bus.write(missing, "U0X").await.unwrap_err();
        assert_eq!(err.code, BusErrorCode::Enol);

        bus.set_present(DUT, false);
        assert!(!bus.listener_present(DUT).await.unwrap());
    }

    #[tokio::test]
    async fn test_dc_reading_raises_service_request() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.set_resistance(DUT, 1.0e3);
        program(&bus, DUT, &["F0,0", "L0.01,0X", "B1,0,0X", "R1", "N1", "M185,0X"]).await;

        // Ready is already true when the mask is set.
        let byte = bus.serial_poll(DUT).await.unwrap();
        assert!(byte.requests_service());
        assert!(byte.contains(StatusByte::READY_FOR_TRIGGER));
        assert!(!bus.serial_poll(DUT).await.unwrap().requests_service());

        bus.trigger(DUT).await.unwrap();
        let byte = bus.serial_poll(DUT).await.unwrap();
        assert!(byte.contains(StatusByte::READING_DONE | StatusByte::SERVICE_REQUEST));
        assert_eq!(bus.read(DUT).await.unwrap(), "+1.0000E+00,+1.0000E-03");
    }

    #[tokio::test]
    async fn test_trigger_ignored_when_not_armed() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        program(&bus, GATE, &["F0,0", "B1,0,0X", "M185,0X"]).await;
        bus.trigger(GATE).await.unwrap();
        assert!(bus.read(GATE).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_payload() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.set_resistance(DUT, 100.0);
        program(
            &bus,
            DUT,
            &["M0,0X", "F0,1", "L0.1,0X", "Q1,0,1,0.25,0,100X", "R1", "N1X", "M146,0X"],
        )
        .await;
        bus.trigger(DUT).await.unwrap();
        let byte = bus.serial_poll(DUT).await.unwrap();
        assert!(byte.contains(StatusByte::SWEEP_DONE));

        let payload = bus.read(DUT).await.unwrap();
        let fields: Vec<f64> = payload.split(',').map(|f| f.parse().unwrap()).collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], 0.0);
        assert_eq!(fields[6], 0.75);
        assert!((fields[7] - 0.0075).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_compliance_clamps_reading() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.set_resistance(DUT, 10.0);
        program(&bus, DUT, &["F0,0", "L0.001,0X", "B1,0,0X", "R1", "N1", "M185,0X"]).await;
        bus.trigger(DUT).await.unwrap();
        let byte = bus.serial_poll(DUT).await.unwrap();
        assert!(byte.contains(StatusByte::COMPLIANCE));
        assert_eq!(bus.read(DUT).await.unwrap(), "+1.0000E+00,+1.0000E-03");
    }

    #[tokio::test]
    async fn test_invalid_command_sets_error() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        program(&bus, DUT, &["M32,0X", "K9X"]).await;
        let byte = bus.serial_poll(DUT).await.unwrap();
        assert!(byte.contains(StatusByte::ERROR | StatusByte::SERVICE_REQUEST));

        bus.write(DUT, "U1X").await.unwrap();
        let word = bus.read(DUT).await.unwrap();
        assert!(word.starts_with("ERS01"));
        assert!(!bus.peek_status(DUT).unwrap().contains(StatusByte::ERROR));
    }

    #[tokio::test]
    async fn test_gate_bias_moves_channel_resistance() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        program(&bus, GATE, &["F0,0", "B5,0,0X", "R1", "N1"]).await;
        program(&bus, DUT, &["F0,0", "B0.1,0,0X", "R1", "N1"]).await;
        bus.trigger(DUT).await.unwrap();
        let reading = bus.read(DUT).await.unwrap();
        let current: f64 = reading.split(',').nth(1).unwrap().parse().unwrap();
        let expected = 0.1 / graphene_channel_resistance(5.0);
        assert!((current - expected).abs() / expected < 1e-3);
    }

    #[tokio::test]
    async fn test_failure_is_one_shot() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.fail_next_write();
        assert!(bus.write(DUT, "N0X").await.is_err());
        assert!(bus.write(DUT, "N0X").await.is_ok());

        bus.fail_next_poll();
        assert!(bus.serial_poll(DUT).await.is_err());
        assert!(bus.serial_poll(DUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_status_and_call_log() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        bus.inject_status(DUT, StatusByte::ERROR | StatusByte::SERVICE_REQUEST);
        assert_eq!(bus.serial_poll(DUT).await.unwrap().bits(), 0x60);
        bus.device_clear(DUT).await.unwrap();

        let calls = bus.calls();
        assert_eq!(calls[0], BusCall::SerialPoll(DUT));
        assert_eq!(calls[1], BusCall::DeviceClear(DUT));
        bus.clear_calls();
        assert!(bus.calls().is_empty());
    }

    #[test]
    fn test_instrument_number() {
        assert_eq!(instrument_number(1.0e-3), "+1.0000E-03");
        assert_eq!(instrument_number(-12.5), "-1.2500E+01");
        assert_eq!(instrument_number(0.0), "+0.0000E+00");
    }
}
