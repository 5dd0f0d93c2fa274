//! End-to-end sweeps against the simulated instruments.

use spinwave_daq::fusion::{ChannelSink, Fields, FusedRow, FusionSettings};
use spinwave_daq::hardware::capabilities::{DC_CURRENT_COLUMN, DC_VOLTAGE_COLUMN, FIELD_COLUMN};
use spinwave_daq::hardware::mock::{
    FaultPlan, MockGaussProbe, MockMagnetSupply, MockSourceMeter, MockVna, SimulatedField,
};
use spinwave_daq::hardware::{BiasMode, SetpointDriver};
use spinwave_daq::sweep::{run_sweep, Completion, SweepOrchestrator, SweepReport};
use spinwave_daq::workers::{
    FieldProbePoller, ProducerWorker, SourceMeterPoller, SweepWorker, Trajectory, VnaPoller,
    Worker,
};
use spinwave_daq::{AppResult, DaqError, SweepClock};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const TIME: &str = "Timestamp (s)";
const PROBE_DELAY: Duration = Duration::from_millis(50);
const POLL: Duration = Duration::from_millis(5);

struct Rig {
    clock: SweepClock,
    field: SimulatedField,
    producers: Vec<Box<dyn Worker>>,
}

impl Rig {
    /// Field probe (reference) and VNA sharing one simulated field.
    fn new(initial_field: f64, probe_faults: FaultPlan, vna_faults: FaultPlan) -> Self {
        let clock = SweepClock::new();
        let field = SimulatedField::new(initial_field);
        let probe = MockGaussProbe::new(field.clone(), PROBE_DELAY).with_faults(probe_faults);
        let vna = MockVna::new(Duration::from_millis(2))
            .with_field(field.clone())
            .with_faults(vna_faults);
        let producers: Vec<Box<dyn Worker>> = vec![
            Box::new(ProducerWorker::new(
                "field-probe",
                FieldProbePoller::new(probe),
                clock,
                256,
            )),
            Box::new(ProducerWorker::new(
                "vna",
                VnaPoller::new(vna, Duration::from_millis(1)),
                clock,
                256,
            )),
        ];
        Self {
            clock,
            field,
            producers,
        }
    }

    fn wire(
        self,
        sweep: Option<Box<dyn Worker>>,
    ) -> (SweepOrchestrator, UnboundedReceiver<FusedRow>) {
        let (sink, rows) = ChannelSink::new();
        let mut static_fields = Fields::new();
        static_fields.insert("Frequency (Hz)".to_string(), 6.5e9);
        let orchestrator = SweepOrchestrator::startup(
            self.producers,
            sweep,
            Box::new(sink),
            FusionSettings {
                static_fields,
                ..FusionSettings::default()
            },
            Duration::from_secs(2),
        )
        .unwrap();
        (orchestrator, rows)
    }
}

fn run(
    orchestrator: &mut SweepOrchestrator,
    completion: Completion,
) -> (AppResult<SweepReport>, Vec<f64>) {
    let abort = AtomicBool::new(false);
    let mut progress = Vec::new();
    let result = run_sweep(orchestrator, completion, &abort, POLL, |p| progress.push(p));
    (result, progress)
}

fn collect(rows: &mut UnboundedReceiver<FusedRow>) -> Vec<FusedRow> {
    std::iter::from_fn(|| rows.try_recv().ok()).collect()
}

fn assert_time_ordered(rows: &[FusedRow]) {
    let times: Vec<f64> = rows.iter().map(|row| row.get(TIME).unwrap()).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "times not increasing: {times:?}");
}

#[test]
fn test_time_sweep_fuses_all_instruments() {
    let mut rig = Rig::new(0.1, FaultPlan::none(), FaultPlan::none());
    let mut meter = MockSourceMeter::new(BiasMode::Voltage, 1_000.0);
    meter.apply_setpoint(0.5).unwrap();
    rig.producers.push(Box::new(ProducerWorker::new(
        "source-meter",
        SourceMeterPoller::new(meter, Duration::from_millis(2)),
        rig.clock,
        256,
    )));
    let (mut orch, mut rows) = rig.wire(None);

    let (report, progress) = run(&mut orch, Completion::Duration(Duration::from_millis(400)));
    let report = report.unwrap();
    let rows = collect(&mut rows);

    assert!(!report.aborted);
    assert!(report.unclean_threads.is_empty());
    assert_eq!(report.rows_emitted as usize, rows.len());
    assert!(rows.len() >= 3, "only {} rows", rows.len());
    assert_eq!(progress.last().copied(), Some(100.0));
    assert_time_ordered(&rows);

    for row in &rows {
        assert_eq!(row.get(FIELD_COLUMN), Some(0.1));
        assert_eq!(row.get(DC_VOLTAGE_COLUMN), Some(0.5));
        assert!((row.get(DC_CURRENT_COLUMN).unwrap() - 5e-4).abs() < 1e-12);
        assert!(row.get("S21 real").is_some());
        assert_eq!(row.get("Frequency (Hz)"), Some(6.5e9));
    }
}

#[test]
fn test_field_sweep_drives_supply_to_final_setpoint() {
    let rig = Rig::new(0.0, FaultPlan::none(), FaultPlan::none());
    let field = rig.field.clone();
    let trajectory = Trajectory::linear(0.0, 0.1, 0.5, Duration::from_millis(10)).unwrap();
    assert_eq!(trajectory.setpoints().len(), 21);
    let sweep = SweepWorker::new(
        "magnet",
        MockMagnetSupply::new(field.clone()),
        trajectory,
        rig.clock,
        false,
        256,
    );
    let (mut orch, mut rows) = rig.wire(Some(Box::new(sweep)));

    let (report, progress) = run(&mut orch, Completion::SweepWorker);
    let report = report.unwrap();
    let rows = collect(&mut rows);

    assert!(!report.aborted);
    assert_eq!(field.get(), 0.1);
    assert_eq!(progress.last().copied(), Some(100.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(!rows.is_empty());
    assert_time_ordered(&rows);

    let fields: Vec<f64> = rows.iter().map(|row| row.get(FIELD_COLUMN).unwrap()).collect();
    assert!(fields.iter().all(|f| (0.0..=0.1).contains(f)));
    assert!(fields.windows(2).all(|w| w[0] <= w[1]), "field not monotonic: {fields:?}");
}

#[test]
fn test_dc_sweep_publishes_setpoints_as_stream() {
    let rig = Rig::new(0.1, FaultPlan::none(), FaultPlan::none());
    let trajectory = Trajectory::linear(0.0, 0.01, 0.05, Duration::from_millis(10)).unwrap();
    let sweep = SweepWorker::new(
        "source-meter",
        MockSourceMeter::new(BiasMode::Current, 50.0),
        trajectory,
        rig.clock,
        true,
        256,
    );
    let (mut orch, mut rows) = rig.wire(Some(Box::new(sweep)));

    let (report, _) = run(&mut orch, Completion::SweepWorker);
    report.unwrap();
    let rows = collect(&mut rows);

    assert!(!rows.is_empty());
    for row in &rows {
        let current = row.get(DC_CURRENT_COLUMN).unwrap();
        assert!((0.0..=0.01 + 1e-12).contains(&current), "current {current}");
        assert!(row.get(FIELD_COLUMN).is_some());
    }
}

#[test]
fn test_fatal_supply_error_fails_the_sweep() {
    let rig = Rig::new(0.0, FaultPlan::none(), FaultPlan::none());
    let trajectory = Trajectory::linear(0.0, 0.1, 0.5, Duration::from_millis(10)).unwrap();
    let supply = MockMagnetSupply::new(rig.field.clone()).with_faults(FaultPlan::fail_after(3));
    let sweep = SweepWorker::new("magnet", supply, trajectory, rig.clock, false, 256);
    let (mut orch, _rows) = rig.wire(Some(Box::new(sweep)));

    let (result, _) = run(&mut orch, Completion::SweepWorker);
    match result {
        Err(DaqError::SweepFailed(message)) => {
            assert!(message.contains("simulated failure"), "{message}")
        }
        other => panic!("expected SweepFailed, got {other:?}"),
    }
    assert!(orch.shutdown().is_empty());
}

#[test]
fn test_probe_timeouts_are_retried() {
    let rig = Rig::new(0.1, FaultPlan::timeout_every(2), FaultPlan::none());
    let (mut orch, mut rows) = rig.wire(None);

    let (report, _) = run(&mut orch, Completion::Duration(Duration::from_millis(400)));
    report.unwrap();

    assert!(orch.producer_failures().is_empty());
    assert!(!collect(&mut rows).is_empty());
}

#[test]
fn test_vna_trigger_timeouts_keep_rows_flowing() {
    let rig = Rig::new(0.1, FaultPlan::none(), FaultPlan::timeout_every(3));
    let (mut orch, mut rows) = rig.wire(None);

    let (report, _) = run(&mut orch, Completion::Duration(Duration::from_millis(600)));
    let report = report.unwrap();
    let rows = collect(&mut rows);

    assert!(report.producer_failures.is_empty());
    assert!(rows.len() >= 3, "only {} rows", rows.len());
    assert!(rows.iter().all(|row| row.get("S21 real").is_some()));
    assert_time_ordered(&rows);
}

#[test]
fn test_producer_failure_ends_acquisition_and_is_reported() {
    let rig = Rig::new(0.1, FaultPlan::none(), FaultPlan::fail_after(2));
    let (mut orch, _rows) = rig.wire(None);

    let begin = Instant::now();
    let (report, _) = run(&mut orch, Completion::Duration(Duration::from_secs(30)));
    let report = report.unwrap();

    assert!(begin.elapsed() < Duration::from_secs(10));
    assert!(!report.aborted);
    assert_eq!(report.producer_failures.len(), 1);
    assert_eq!(report.producer_failures[0].0, "vna");
    assert!(report.producer_failures[0].1.contains("simulated failure"));
    assert_eq!(orch.producer_failures(), report.producer_failures);
}

#[test]
fn test_time_sweep_with_sweep_completion_is_rejected() {
    let rig = Rig::new(0.1, FaultPlan::none(), FaultPlan::none());
    let (mut orch, _rows) = rig.wire(None);

    let (result, progress) = run(&mut orch, Completion::SweepWorker);
    assert!(matches!(result, Err(DaqError::NoSweepWorker)));
    assert!(progress.is_empty());
    assert!(orch.engine().started_at().is_none());
}
