//! End-to-end measurement runs on the simulated bench.

use async_trait::async_trait;
use gfet_daq::config::SweepSpec;
use gfet_daq::error::DaqError;
use gfet_daq::experiment::{MeasurementEngine, MeasurementKind, RunSettings, RunState};
use gfet_daq::hardware::gpib::{BusAddress, BusError, BusStatus, GpibTransport};
use gfet_daq::hardware::keithley236::{DriverState, DriverTiming, Keithley236};
use gfet_daq::hardware::mock::{graphene_channel_resistance, BusCall, MockBus};
use gfet_daq::hardware::status::StatusByte;
use gfet_daq::measurement::{PlotModel, Sample};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DUT: BusAddress = BusAddress { board: 0, primary: 12 };
const GATE: BusAddress = BusAddress { board: 0, primary: 14 };

fn spec(start: f64, stop: f64, point_count: u32, compliance: f64) -> SweepSpec {
    SweepSpec {
        start,
        stop,
        compliance,
        wait_time_ms: 100,
        point_count,
        interval_s: 1.0,
    }
}

fn settings(dir: &Path, dut: SweepSpec, gate: SweepSpec) -> RunSettings {
    RunSettings {
        dut,
        gate,
        base_dir: dir.to_path_buf(),
        file_name: "data.dat".to_string(),
        sample_info: "GFET #3\nsimulated".to_string(),
        ready_timeout: Duration::from_secs(5),
        event_timeout: Duration::from_secs(5),
    }
}

struct Bench {
    bus: Arc<MockBus>,
    engine: MeasurementEngine<PlotModel>,
    dir: TempDir,
}

fn bench(dut: SweepSpec, gate: SweepSpec, with_gate: bool) -> Bench {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
    let timing = DriverTiming::immediate();
    let dut_unit = Keithley236::with_timing(bus.clone(), DUT, timing);
    let gate_unit = with_gate.then(|| Keithley236::with_timing(bus.clone(), GATE, timing));
    let engine = MeasurementEngine::new(
        dut_unit,
        gate_unit,
        PlotModel::new(3000),
        settings(dir.path(), dut, gate),
    );
    Bench { bus, engine, dir }
}

/// Passes everything through but truncates sweep buffers from `target`.
struct GarbledSweep {
    inner: Arc<MockBus>,
    target: BusAddress,
}

#[async_trait]
impl GpibTransport for GarbledSweep {
    fn name(&self) -> &str {
        "garbled"
    }

    async fn write(&self, address: BusAddress, command: &str) -> Result<BusStatus, BusError> {
        self.inner.write(address, command).await
    }

    async fn read(&self, address: BusAddress) -> Result<String, BusError> {
        let response = self.inner.read(address).await?;
        if address == self.target && response.split(',').count() > 2 {
            return Ok("+1.0000E+00".to_string());
        }
        Ok(response)
    }

    async fn serial_poll(&self, address: BusAddress) -> Result<StatusByte, BusError> {
        self.inner.serial_poll(address).await
    }

    async fn trigger(&self, address: BusAddress) -> Result<BusStatus, BusError> {
        self.inner.trigger(address).await
    }

    async fn device_clear(&self, address: BusAddress) -> Result<(), BusError> {
        self.inner.device_clear(address).await
    }

    async fn listener_present(&self, address: BusAddress) -> Result<bool, BusError> {
        self.inner.listener_present(address).await
    }

    async fn go_offline(&self, address: BusAddress) -> Result<(), BusError> {
        self.inner.go_offline(address).await
    }

    async fn interface_clear(&self, board: u8) -> Result<(), BusError> {
        self.inner.interface_clear(board).await
    }
}

fn read_samples(path: &Path) -> (Vec<String>, Vec<Sample>) {
    let text = std::fs::read_to_string(path).unwrap();
    let header = text
        .lines()
        .filter(|line| line.trim_start().starts_with('#'))
        .map(str::to_string)
        .collect();
    let samples = text.lines().filter_map(Sample::parse_line).collect();
    (header, samples)
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn ids_vds_writes_one_file_per_gate_step() {
    let bench = bench(spec(0.0, 1.0, 10, 1e-3), spec(0.0, 1.0, 2, 1e-6), true);

    let status = bench
        .engine
        .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status.state, RunState::Complete);
    assert_eq!(status.step, 3);
    assert_eq!(status.sample_count, 30);
    assert_eq!(file_count(bench.dir.path()), 3);

    for (step, gate_voltage) in [(1, 0.0), (2, 0.5), (3, 1.0)] {
        let path = bench.dir.path().join(format!("data_{}.dat", step));
        let (header, samples) = read_samples(&path);
        assert_eq!(header.len(), 5);
        assert_eq!(header[1], "# GFET #3");
        assert!(header[3].starts_with("# Vds_Start=0[V] Vds_Stop=1[V]"));
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|s| s.gate_voltage == gate_voltage));
        // Drain voltages come in sweep order.
        assert!(samples
            .windows(2)
            .all(|pair| pair[1].drain_voltage > pair[0].drain_voltage));
        // Current follows the channel resistance at this gate bias.
        let last = samples[9];
        let expected = last.drain_voltage / graphene_channel_resistance(gate_voltage);
        assert!((last.drain_current - expected).abs() / expected < 1e-4);
    }

    bench.engine.with_sink(|plot| {
        assert_eq!(plot.series_ids(), vec![1, 2, 3]);
        assert_eq!(plot.series(2).unwrap().title, "0.5");
        assert!(plot.series(3).unwrap().visible);
        assert_eq!(plot.point_count(), 30);
    });
    assert_eq!(bench.engine.dut().state(), DriverState::Idle);
    assert_eq!(bench.engine.gate().unwrap().state(), DriverState::Idle);
}

#[tokio::test]
async fn ids_vds_without_gate_records_single_sweep() {
    let bench = bench(spec(0.0, 2.0, 20, 1e-3), spec(0.0, 1.0, 2, 1e-6), false);

    let status = bench
        .engine
        .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status.step, 1);
    let (_, samples) = read_samples(&bench.dir.path().join("data_1.dat"));
    assert_eq!(samples.len(), 20);
    assert!(samples.iter().all(|s| s.gate_voltage.is_nan() && s.gate_current.is_nan()));
    assert!(!bench
        .bus
        .calls()
        .iter()
        .any(|call| matches!(call, BusCall::Write { address, .. } if *address == GATE)));
}

#[tokio::test]
async fn point_count_bounds_give_monotonic_sweeps() {
    for point_count in [3, 500] {
        let bench = bench(spec(-1.0, 1.0, point_count, 1e-3), spec(0.0, 0.0, 3, 1e-6), false);
        assert!(bench.engine.settings().dut.sweep_step() > 0.0);

        bench
            .engine
            .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
            .await
            .unwrap();

        let (_, samples) = read_samples(&bench.dir.path().join("data_1.dat"));
        assert_eq!(samples.len(), point_count as usize);
        assert_eq!(samples[0].drain_voltage, -1.0);
        assert!(samples
            .windows(2)
            .all(|pair| pair[1].drain_voltage > pair[0].drain_voltage));
    }
}

#[tokio::test]
async fn rds_plots_resistance_and_discards_every_other_reading() {
    let bench = bench(spec(0.1, 0.2, 1, 1e-3), spec(-1.0, 1.0, 2, 1e-6), true);

    let status = bench
        .engine
        .run(MeasurementKind::RdsVsGate, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status.state, RunState::Complete);
    assert_eq!(status.step, 2);
    assert_eq!(status.sample_count, 6);

    for (step, drain_voltage) in [(1, 0.1), (2, 0.2)] {
        let (_, samples) = read_samples(&bench.dir.path().join(format!("data_{}.dat", step)));
        let gates: Vec<f64> = samples.iter().map(|s| s.gate_voltage).collect();
        assert_eq!(gates, vec![-1.0, 0.0, 1.0]);
        assert!(samples.iter().all(|s| s.drain_voltage == drain_voltage));
    }

    bench.engine.with_sink(|plot| {
        let series = plot.series(1).unwrap();
        assert_eq!(series.title, "0.1");
        assert_eq!(series.points().len(), 3);
        for &(vg, rds) in series.points() {
            let expected = graphene_channel_resistance(vg);
            assert!((rds - expected).abs() / expected < 1e-4);
        }
    });

    let triggers = |address: BusAddress| {
        bench
            .bus
            .calls()
            .iter()
            .filter(|call| **call == BusCall::Trigger(address))
            .count()
    };
    assert_eq!(triggers(DUT), 12);
    assert_eq!(triggers(GATE), 12);
}

#[tokio::test]
async fn rds_below_current_floor_is_written_not_plotted() {
    let bench = bench(spec(0.1, 0.1, 10, 1e-3), spec(0.0, 1.0, 2, 1e-6), true);
    bench.bus.set_resistance(DUT, 1.0e14);

    let status = bench
        .engine
        .run(MeasurementKind::RdsVsGate, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status.step, 1);
    let (_, samples) = read_samples(&bench.dir.path().join("data_1.dat"));
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.drain_current == 1.0e-15));
    bench.engine.with_sink(|plot| {
        assert!(plot.series(1).is_some());
        assert_eq!(plot.point_count(), 0);
    });
}

#[tokio::test]
async fn second_run_while_active_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    // Bus latency keeps the first run pending while the second one starts.
    let bus = Arc::new(MockBus::gfet_bench(0, 12, 14).with_latency(Duration::from_millis(1)));
    let timing = DriverTiming::immediate();
    let engine = MeasurementEngine::new(
        Keithley236::with_timing(bus.clone(), DUT, timing),
        Some(Keithley236::with_timing(bus.clone(), GATE, timing)),
        PlotModel::new(3000),
        settings(dir.path(), spec(0.0, 1.0, 10, 1e-3), spec(0.0, 1.0, 2, 1e-6)),
    );

    let (first, second) = tokio::join!(
        engine.run(MeasurementKind::IdsVdsVsGate, CancellationToken::new()),
        async {
            tokio::task::yield_now().await;
            engine
                .run(MeasurementKind::RdsVsGate, CancellationToken::new())
                .await
        }
    );

    assert_eq!(first.unwrap().state, RunState::Complete);
    assert!(matches!(second, Err(DaqError::RunInProgress)));
    // The refused run left the status of the active one alone.
    assert_eq!(engine.status().kind, Some(MeasurementKind::IdsVdsVsGate));
}

#[tokio::test]
async fn cancel_mid_run_stops_both_units() {
    let bench = bench(spec(0.0, 1.0, 10, 1e-3), spec(-5.0, 5.0, 100, 1e-6), true);
    let cancel = CancellationToken::new();
    let mut status = bench.engine.watch_status();

    let stopper = cancel.clone();
    let (result, _) = tokio::join!(
        bench.engine.run(MeasurementKind::IdsVdsVsGate, cancel),
        async move {
            // Stop once the second gate step has started.
            while status.borrow_and_update().step < 2 {
                if status.changed().await.is_err() {
                    break;
                }
            }
            stopper.cancel();
        }
    );

    let status = result.unwrap();
    assert_eq!(status.state, RunState::Stopped);
    assert!(status.step >= 2 && status.step < 101);
    assert_eq!(bench.engine.dut().state(), DriverState::Idle);
    assert_eq!(bench.engine.gate().unwrap().state(), DriverState::Idle);
    let standby = ["M0,0X", "R0", "N0X"].map(String::from);
    assert!(bench.bus.writes_to(DUT).ends_with(&standby));
    assert!(bench.bus.writes_to(GATE).ends_with(&standby));
}

#[tokio::test]
async fn malformed_sweep_buffer_fails_run_and_stops_units() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
    let garbled = Arc::new(GarbledSweep {
        inner: bus.clone(),
        target: DUT,
    });
    let timing = DriverTiming::immediate();
    let engine = MeasurementEngine::new(
        Keithley236::with_timing(garbled.clone(), DUT, timing),
        Some(Keithley236::with_timing(garbled, GATE, timing)),
        PlotModel::new(3000),
        settings(dir.path(), spec(0.0, 1.0, 10, 1e-3), spec(0.0, 1.0, 2, 1e-6)),
    );

    let result = engine
        .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(DaqError::MalformedPayload(_))));
    let status = engine.status();
    assert_eq!(status.state, RunState::Error);
    assert!(status.last_error.unwrap().contains("expected at least 2 fields"));
    assert_eq!(status.step, 1);
    assert_eq!(file_count(dir.path()), 0);
    assert_eq!(engine.dut().state(), DriverState::Idle);
    assert_eq!(engine.gate().unwrap().state(), DriverState::Idle);
    let standby = ["M0,0X", "R0", "N0X"].map(String::from);
    assert!(bus.writes_to(DUT).ends_with(&standby));
    assert!(bus.writes_to(GATE).ends_with(&standby));
}

#[tokio::test]
async fn missing_output_directory_fails_run_and_stops_units() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let bus = Arc::new(MockBus::gfet_bench(0, 12, 14));
    let timing = DriverTiming::immediate();
    let engine = MeasurementEngine::new(
        Keithley236::with_timing(bus.clone(), DUT, timing),
        Some(Keithley236::with_timing(bus.clone(), GATE, timing)),
        PlotModel::new(3000),
        settings(&missing, spec(0.0, 1.0, 10, 1e-3), spec(0.0, 1.0, 2, 1e-6)),
    );

    let result = engine
        .run(MeasurementKind::IdsVdsVsGate, CancellationToken::new())
        .await;

    match result {
        Err(DaqError::FileIo { path, .. }) => assert_eq!(path, missing.join("data_1.dat")),
        other => panic!("expected a file error, got {:?}", other),
    }
    let status = engine.status();
    assert_eq!(status.state, RunState::Error);
    assert!(status.last_error.is_some());
    assert!(!missing.exists());
    assert_eq!(engine.dut().state(), DriverState::Idle);
    assert_eq!(engine.gate().unwrap().state(), DriverState::Idle);
}
