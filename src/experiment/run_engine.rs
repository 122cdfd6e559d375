//! Measurement engine for the two GFET protocols.
//!
//! The engine drives the DUT evaluator and the optional gate generator
//! strictly one after the other: it programs a unit, waits until it is
//! ready for a trigger, triggers it and then awaits the matching
//! notification from its event stream. Nothing is written or plotted for a
//! step before the units involved were ready, and the gate never moves on
//! before the step's lines reached the output file.
//!
//! # Protocols
//!
//! ```text
//! IdsVdsVsGate: for each Vg
//!     gate: source Vg -> ready -> trigger -> reading (Vg, Ig)
//!     dut:  arm Vds sweep -> ready -> trigger -> sweep buffer
//!     file {stem}_{step}: header + one line per (Vds, Ids); plot Ids(Vds)
//!
//! RdsVsGate: for each Vds (one file and one series each)
//!     for each Vg
//!         gate: source Vg
//!         2x: gate ready -> trigger -> reading
//!             dut: source Vds -> ready -> trigger -> reading -> standby
//!         keep the second pair; plot Vds/Ids against Vg when |Ids| > 1e-14
//! ```
//!
//! Step values are `start + k·step`, accepted while they stay inside the
//! closed interval spanned by start and stop (see [`StepSequence`]).
//!
//! # Ending a run
//!
//! Event receivers are dropped before the instruments are stopped, so no
//! late notification can drive the run once it is over. Fatal errors (see
//! [`DaqError::is_fatal`]) release both sessions; every other ending puts
//! both units in standby with `stop_sweep`.

use super::state::{MeasurementKind, RunState, RunStatus};
use crate::config::{BenchConfig, SweepSpec};
use crate::error::{AppResult, DaqError};
use crate::format::format_general;
use crate::hardware::gpib::BusAddress;
use crate::hardware::keithley236::{
    InstrumentEvent, InstrumentNotification, Keithley236, SourceKind,
};
use crate::measurement::output::OutputFile;
use crate::measurement::sample::{decode_sweep, Reading, Sample};
use crate::measurement::sink::{step_color, SampleSink, SymbolKind, PEN_WIDTH};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Title of the single series recorded without a gate generator.
const UNGATED_TITLE: &str = "Ids-Vds";

/// Snapshot of the settings a run works with.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Drain-source sweep / bias steps
    pub dut: SweepSpec,
    /// Gate voltage steps
    pub gate: SweepSpec,
    /// Directory receiving the step files
    pub base_dir: PathBuf,
    /// File name template
    pub file_name: String,
    /// Sample description for the file headers
    pub sample_info: String,
    /// Longest wait for ready-for-trigger
    pub ready_timeout: Duration,
    /// Longest wait for a reading, on top of programmed dwell times
    pub event_timeout: Duration,
}

impl RunSettings {
    /// Take the run settings from the bench configuration.
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            dut: config.dut,
            gate: config.gate,
            base_dir: config.output.base_dir.clone(),
            file_name: config.output.file_name.clone(),
            sample_info: config.output.sample_info.clone(),
            ready_timeout: Duration::from_millis(config.bus.ready_timeout_ms),
            event_timeout: Duration::from_millis(config.bus.event_timeout_ms),
        }
    }

    /// Wait for a DUT sweep: the dwell of every point plus the event timeout.
    fn sweep_timeout(&self) -> Duration {
        self.event_timeout + self.dut.wait_time() * self.dut.point_count
    }
}

/// Values `start + k·step` inside the closed interval spanned by `start`
/// and `stop`.
///
/// Both bounds are checked on every advance, whatever the sign of `step`,
/// with a tolerance of `1e-9·|step|` so that accumulated rounding does not
/// drop the last point. A zero step yields `start` once.
#[derive(Debug, Clone)]
pub struct StepSequence {
    start: f64,
    step: f64,
    low: f64,
    high: f64,
    index: u32,
    done: bool,
}

impl StepSequence {
    /// Sequence from `start` towards `stop`.
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        let tolerance = 1.0e-9 * step.abs();
        Self {
            start,
            step,
            low: start.min(stop) - tolerance,
            high: start.max(stop) + tolerance,
            index: 0,
            done: false,
        }
    }

    /// Sequence of a sweep specification, stepped by its signed step.
    pub fn of(spec: &SweepSpec) -> Self {
        Self::new(spec.start, spec.stop, spec.step())
    }

    /// True if `value` lies in the accepted interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl Iterator for StepSequence {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.done {
            return None;
        }
        let value = self.start + self.step * f64::from(self.index);
        if !self.contains(value) {
            self.done = true;
            return None;
        }
        if self.step == 0.0 {
            self.done = true;
        }
        self.index += 1;
        Some(value)
    }
}

/// Clears the busy flag when a run ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs GFET measurement protocols on a DUT evaluator and an optional gate
/// generator.
///
/// # Example
///
/// ```no_run
/// use gfet_daq::config::BenchConfig;
/// use gfet_daq::experiment::{MeasurementEngine, MeasurementKind, RunSettings};
/// use gfet_daq::hardware::gpib::BusAddress;
/// use gfet_daq::hardware::keithley236::Keithley236;
/// use gfet_daq::hardware::mock::MockBus;
/// use gfet_daq::measurement::PlotModel;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo(config: BenchConfig) -> gfet_daq::error::AppResult<()> {
/// let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
/// let dut = Keithley236::new(bus.clone(), BusAddress::new(0, 12));
/// let gate = Keithley236::new(bus, BusAddress::new(0, 14));
/// let engine = MeasurementEngine::new(
///     dut,
///     Some(gate),
///     PlotModel::new(3000),
///     RunSettings::from_config(&config),
/// );
/// let status = engine
///     .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
///     .await?;
/// println!("{} samples in {} files", status.sample_count, status.step);
/// # Ok(())
/// # }
/// ```
pub struct MeasurementEngine<S: SampleSink> {
    dut: Keithley236,
    gate: Option<Keithley236>,
    sink: Mutex<S>,
    settings: RunSettings,
    status: watch::Sender<RunStatus>,
    busy: AtomicBool,
}

impl<S: SampleSink> MeasurementEngine<S> {
    /// Engine over the given units. No bus traffic happens until
    /// [`run`](Self::run).
    pub fn new(dut: Keithley236, gate: Option<Keithley236>, sink: S, settings: RunSettings) -> Self {
        let (status, _) = watch::channel(RunStatus::default());
        Self {
            dut,
            gate,
            sink: Mutex::new(sink),
            settings,
            status,
            busy: AtomicBool::new(false),
        }
    }

    /// DUT evaluator.
    pub fn dut(&self) -> &Keithley236 {
        &self.dut
    }

    /// Gate generator, if the bench has one.
    pub fn gate(&self) -> Option<&Keithley236> {
        self.gate.as_ref()
    }

    /// Settings used by the next run.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Status of the current or last run.
    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Follow run progress.
    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Inspect the sink.
    pub fn with_sink<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.sink.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn draw(&self, f: impl FnOnce(&mut S)) {
        f(&mut self.sink.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn update(&self, f: impl FnOnce(&mut RunStatus)) {
        self.status.send_modify(f);
    }

    /// Run `kind` to completion.
    ///
    /// Cancelling `cancel` stops the run after the current instrument
    /// operation; the returned status is then [`RunState::Stopped`].
    ///
    /// # Errors
    /// - `RunInProgress` while another run is active
    /// - `GateGeneratorRequired` for a resistance run without a gate unit
    /// - any instrument, payload or file error that ended the run
    pub async fn run(&self, kind: MeasurementKind, cancel: CancellationToken) -> AppResult<RunStatus> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DaqError::RunInProgress);
        }
        let _busy = BusyGuard(&self.busy);

        if kind == MeasurementKind::RdsVsGate && self.gate.is_none() {
            return Err(DaqError::GateGeneratorRequired);
        }

        self.status.send_replace(RunStatus::starting(kind));
        info!(%kind, dut = %self.dut.address(), gate = ?self.gate.as_ref().map(Keithley236::address), "measurement starting");

        if let Err(err) = self.init_instruments().await {
            self.release_instruments().await;
            return Err(self.fail(err));
        }
        self.update(|status| status.state = RunState::Running);

        let outcome = match kind {
            MeasurementKind::IdsVdsVsGate => self.run_ids_vds(&cancel).await,
            MeasurementKind::RdsVsGate => match self.gate.as_ref() {
                Some(gate) => self.run_rds(gate, &cancel).await,
                None => Err(DaqError::GateGeneratorRequired),
            },
        };

        match &outcome {
            Err(err) if err.is_fatal() => self.release_instruments().await,
            _ => self.stop_instruments().await,
        }

        match outcome {
            Ok(()) => Ok(self.complete(RunState::Complete)),
            Err(DaqError::Cancelled) => Ok(self.complete(RunState::Stopped)),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Record a run that ended without error.
    fn complete(&self, state: RunState) -> RunStatus {
        self.update(|status| status.state = state);
        let status = self.status();
        info!(%state, steps = status.step, samples = status.sample_count, "measurement ended");
        status
    }

    /// Record the error that ended the run and pass it on.
    fn fail(&self, err: DaqError) -> DaqError {
        error!(error = %err, fatal = err.is_fatal(), "measurement failed");
        self.update(|status| {
            status.state = RunState::Error;
            status.last_error = Some(err.to_string());
        });
        err
    }

    async fn init_instruments(&self) -> AppResult<()> {
        self.dut.init().await?;
        if let Some(gate) = &self.gate {
            gate.init().await?;
        }
        Ok(())
    }

    /// Standby both units and stop their notifiers.
    async fn stop_instruments(&self) {
        self.dut.stop_sweep().await;
        if let Some(gate) = &self.gate {
            gate.stop_sweep().await;
        }
    }

    /// Close both sessions.
    async fn release_instruments(&self) {
        self.dut.end_measure().await;
        if let Some(gate) = &self.gate {
            gate.end_measure().await;
        }
    }

    fn new_series(&self, step: u32, title: &str) {
        self.draw(|sink| {
            sink.create_series(step, PEN_WIDTH, step_color(step), SymbolKind::Line, title);
            sink.show(step, true);
            sink.show_title(step, true);
            sink.refresh();
        });
    }

    fn open_step_file(&self, step: u32) -> AppResult<OutputFile> {
        let settings = &self.settings;
        let mut file = OutputFile::create(&settings.base_dir, &settings.file_name, step)?;
        file.write_header(&settings.sample_info, &settings.dut, &settings.gate)?;
        Ok(file)
    }

    /// Ids-Vds sweep at every gate step.
    async fn run_ids_vds(&self, cancel: &CancellationToken) -> AppResult<()> {
        let mut dut_events = self.dut.subscribe();
        let mut gate_events = self.gate.as_ref().map(Keithley236::subscribe);

        let gate_values: Vec<Option<f64>> = match &self.gate {
            Some(_) => StepSequence::of(&self.settings.gate).map(Some).collect(),
            None => {
                warn!("no gate generator: recording a single sweep without gate bias");
                vec![None]
            }
        };

        for (index, gate_value) in gate_values.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DaqError::Cancelled);
            }
            let step = index as u32 + 1;
            self.update(|status| {
                status.step = step;
                status.gate_voltage = gate_value;
            });

            let gate_reading = match (self.gate.as_ref(), gate_events.as_mut(), gate_value) {
                (Some(gate), Some(events), Some(level)) => {
                    gate.source_voltage(level, self.settings.gate.compliance).await?;
                    let reading = self.trigger_reading(gate, events, cancel).await?;
                    debug!(step, vg = reading.source, ig = reading.measure, "gate biased");
                    Some(reading)
                }
                _ => None,
            };
            let title = match gate_value {
                Some(level) => format_general(level, 6),
                None => UNGATED_TITLE.to_string(),
            };
            self.new_series(step, &title);

            let buffer = self.sweep_dut(&mut dut_events, cancel).await?;
            let pairs = decode_sweep(&buffer)?;

            let mut file = self.open_step_file(step)?;
            let (gate_voltage, gate_current) = gate_reading
                .map(|r| (r.source, r.measure))
                .unwrap_or((f64::NAN, f64::NAN));
            for pair in &pairs {
                let sample = Sample {
                    gate_voltage,
                    gate_current,
                    drain_voltage: pair.source,
                    drain_current: pair.measure,
                };
                file.write_sample(&sample)?;
                self.draw(|sink| sink.append_point(step, pair.source, pair.measure));
            }
            self.draw(|sink| sink.refresh());
            file.close()?;
            self.update(|status| status.sample_count += pairs.len());
            info!(step, vg = ?gate_value, points = pairs.len(), "gate step recorded");
        }
        Ok(())
    }

    /// Arm the DUT sweep, trigger it and return the raw sweep buffer.
    async fn sweep_dut(
        &self,
        events: &mut broadcast::Receiver<InstrumentNotification>,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let spec = &self.settings.dut;
        self.dut
            .arm_sweep(
                SourceKind::Voltage,
                spec.start,
                spec.stop,
                spec.sweep_step(),
                f64::from(spec.wait_time_ms),
                spec.compliance,
            )
            .await?;
        self.dut
            .wait_until_ready(self.settings.ready_timeout, cancel)
            .await?;
        self.dut.send_trigger().await?;
        next_event(
            events,
            self.dut.address(),
            "sweep buffer",
            self.settings.sweep_timeout(),
            cancel,
            |event| match event {
                InstrumentEvent::SweepComplete(buffer) => Some(buffer.clone()),
                _ => None,
            },
        )
        .await
    }

    /// Wait until `smu` is ready, trigger it and decode its reading.
    async fn trigger_reading(
        &self,
        smu: &Keithley236,
        events: &mut broadcast::Receiver<InstrumentNotification>,
        cancel: &CancellationToken,
    ) -> AppResult<Reading> {
        smu.wait_until_ready(self.settings.ready_timeout, cancel).await?;
        smu.send_trigger().await?;
        let payload = next_event(
            events,
            smu.address(),
            "reading",
            self.settings.event_timeout,
            cancel,
            |event| match event {
                InstrumentEvent::NewReading(payload) => Some(payload.clone()),
                _ => None,
            },
        )
        .await?;
        Reading::decode(&payload)
    }

    /// Resistance against gate voltage at every drain bias step.
    async fn run_rds(&self, gate: &Keithley236, cancel: &CancellationToken) -> AppResult<()> {
        let mut dut_events = self.dut.subscribe();
        let mut gate_events = gate.subscribe();
        let settings = &self.settings;

        for (index, drain_bias) in StepSequence::of(&settings.dut).enumerate() {
            let step = index as u32 + 1;
            self.update(|status| {
                status.step = step;
                status.drain_voltage = Some(drain_bias);
            });
            self.new_series(step, &format_general(drain_bias, 6));
            let mut file = self.open_step_file(step)?;
            info!(step, vds = drain_bias, "resistance sweep started");

            for gate_level in StepSequence::of(&settings.gate) {
                if cancel.is_cancelled() {
                    return Err(DaqError::Cancelled);
                }
                self.update(|status| status.gate_voltage = Some(gate_level));
                gate.source_voltage(gate_level, settings.gate.compliance).await?;

                // Every other pair of readings is discarded.
                let mut kept = None;
                for _ in 0..2 {
                    let gate_reading = self.trigger_reading(gate, &mut gate_events, cancel).await?;
                    self.dut
                        .source_voltage(drain_bias, settings.dut.compliance)
                        .await?;
                    let dut_reading = self
                        .trigger_reading(&self.dut, &mut dut_events, cancel)
                        .await?;
                    self.dut.stand_by().await?;
                    kept = Some((gate_reading, dut_reading));
                }
                let Some((gate_reading, dut_reading)) = kept else {
                    continue;
                };

                let sample = Sample {
                    gate_voltage: gate_reading.source,
                    gate_current: gate_reading.measure,
                    drain_voltage: dut_reading.source,
                    drain_current: dut_reading.measure,
                };
                file.write_sample(&sample)?;
                file.flush()?;
                self.update(|status| status.sample_count += 1);

                match sample.resistance() {
                    Some(resistance) => self.draw(|sink| {
                        sink.append_point(step, sample.gate_voltage, resistance);
                        sink.refresh();
                    }),
                    None => debug!(
                        step,
                        vg = sample.gate_voltage,
                        ids = sample.drain_current,
                        "drain current too small for a resistance"
                    ),
                }
            }
            file.close()?;
        }
        Ok(())
    }
}

/// Await the first event of `events` accepted by `accept`.
///
/// Other events are skipped; compliance, instrument errors and bus faults
/// among them are logged as they are advisory for the run.
async fn next_event<T>(
    events: &mut broadcast::Receiver<InstrumentNotification>,
    address: BusAddress,
    expected: &'static str,
    timeout: Duration,
    cancel: &CancellationToken,
    mut accept: impl FnMut(&InstrumentEvent) -> Option<T>,
) -> AppResult<T> {
    let deadline = Instant::now() + timeout;
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Err(DaqError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(DaqError::EventTimeout { address, expected, timeout });
            }
            received = events.recv() => received,
        };
        let notification = match received {
            Ok(notification) => notification,
            Err(RecvError::Lagged(skipped)) => {
                warn!(instrument = %address, skipped, "event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => return Err(DaqError::EventStreamClosed(address)),
        };
        if let Some(value) = accept(&notification.event) {
            return Ok(value);
        }
        match &notification.event {
            InstrumentEvent::ComplianceEntered { count } => {
                warn!(instrument = %address, count, "in compliance")
            }
            InstrumentEvent::Error(word) => warn!(instrument = %address, %word, "instrument error"),
            InstrumentEvent::Warning(word) => warn!(instrument = %address, %word, "instrument warning"),
            InstrumentEvent::Fault(reason) => warn!(instrument = %address, %reason, "bus fault"),
            other => debug!(instrument = %address, event = ?other, "event skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::keithley236::DriverTiming;
    use crate::hardware::mock::MockBus;
    use crate::measurement::sink::PlotModel;
    use std::sync::Arc;

    fn spec(start: f64, stop: f64, point_count: u32) -> SweepSpec {
        SweepSpec {
            start,
            stop,
            compliance: 1e-3,
            wait_time_ms: 100,
            point_count,
            interval_s: 1.0,
        }
    }

    fn settings(dir: &std::path::Path) -> RunSettings {
        RunSettings {
            dut: spec(0.0, 1.0, 10),
            gate: spec(0.0, 1.0, 2),
            base_dir: dir.to_path_buf(),
            file_name: "data.dat".to_string(),
            sample_info: String::new(),
            ready_timeout: Duration::from_secs(2),
            event_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_step_sequence_closed_interval() {
        let values: Vec<f64> = StepSequence::new(0.0, 1.0, 0.5).collect();
        assert_eq!(values, vec![0.0, 0.5, 1.0]);

        let values: Vec<f64> = StepSequence::new(1.0, -1.0, -0.5).collect();
        assert_eq!(values, vec![1.0, 0.5, 0.0, -0.5, -1.0]);
    }

    #[test]
    fn test_step_sequence_keeps_rounded_last_point() {
        let values: Vec<f64> = StepSequence::of(&spec(0.0, 1.0, 3)).collect();
        assert_eq!(values.len(), 4);
        assert!((values[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_step_sequence_degenerate() {
        assert_eq!(StepSequence::new(2.0, 2.0, 0.0).collect::<Vec<_>>(), vec![2.0]);
        // A step pointing away from stop leaves the interval at once.
        assert_eq!(StepSequence::new(0.0, 1.0, -0.5).collect::<Vec<_>>(), vec![0.0]);
        assert!(StepSequence::new(0.0, 1.0, f64::NAN).nth(1).is_none());
    }

    #[test]
    fn test_sweep_timeout_covers_dwell() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        assert_eq!(settings.sweep_timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_rds_needs_gate_generator() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
        let dut = Keithley236::with_timing(bus.clone(), BusAddress::new(0, 12), DriverTiming::immediate());
        let engine = MeasurementEngine::new(dut, None, PlotModel::new(100), settings(dir.path()));

        let err = engine
            .run(MeasurementKind::RdsVsGate, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::GateGeneratorRequired));
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_releases_both_units() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
        bus.set_present(BusAddress::new(0, 14), false);
        let timing = DriverTiming::immediate();
        let dut = Keithley236::with_timing(bus.clone(), BusAddress::new(0, 12), timing);
        let gate = Keithley236::with_timing(bus.clone(), BusAddress::new(0, 14), timing);
        let engine = MeasurementEngine::new(dut, Some(gate), PlotModel::new(100), settings(dir.path()));

        let err = engine
            .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::InstrumentNotPresent { .. }));
        let status = engine.status();
        assert_eq!(status.state, RunState::Error);
        assert!(status.last_error.is_some());
        assert_eq!(engine.dut().state(), crate::hardware::keithley236::DriverState::Idle);
        // Nothing was sourced.
        assert!(!bus.writes_to(BusAddress::new(0, 12)).iter().any(|w| w.starts_with('B')));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
        let timing = DriverTiming::immediate();
        let dut = Keithley236::with_timing(bus.clone(), BusAddress::new(0, 12), timing);
        let gate = Keithley236::with_timing(bus.clone(), BusAddress::new(0, 14), timing);
        let engine = MeasurementEngine::new(dut, Some(gate), PlotModel::new(100), settings(dir.path()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = engine
            .run(MeasurementKind::IdsVdsVsGate, cancel)
            .await
            .unwrap();
        assert_eq!(status.state, RunState::Stopped);
        assert_eq!(status.sample_count, 0);
        assert!(engine.status().state.can_begin());
    }
}
