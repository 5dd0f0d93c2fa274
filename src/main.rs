//! CLI Entry Point for spinwave-daq
//!
//! Runs a sweep against simulated instruments and prints every fused row as
//! one JSON object per line on stdout. Logs go to stderr.
//!
//! # Sweep kinds
//!
//! - `time`: field probe, VNA and source-meter sampled for a fixed duration
//! - `field`: magnet supply ramped from `--start` to `--stop` tesla while the
//!   field probe and VNA are sampled
//! - `dc`: source-meter bias current ramped from `--start` to `--stop` ampere
//!   while the field probe and VNA are sampled
//!
//! # Usage
//!
//! ```bash
//! spinwave-daq simulate --kind field --duration 10 --stop 0.2 > rows.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use spinwave_daq::config::DaqConfig;
use spinwave_daq::fusion::{ChannelSink, Fields, FusedRow, FusionSettings};
use spinwave_daq::hardware::mock::{
    MockGaussProbe, MockMagnetSupply, MockSourceMeter, MockVna, SimulatedField,
};
use spinwave_daq::hardware::{BiasMode, SetpointDriver};
use spinwave_daq::sweep::{run_sweep, Completion, SweepOrchestrator};
use spinwave_daq::tracing_init::{self, OutputFormat, TracingConfig};
use spinwave_daq::workers::{
    FieldProbePoller, ProducerWorker, SourceMeterPoller, SweepWorker, Trajectory, VnaPoller,
    Worker,
};
use spinwave_daq::SweepClock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Averaging time of the simulated VNA.
const VNA_AVERAGING_TIME: Duration = Duration::from_millis(50);
/// Probe frequency reported as a static field.
const VNA_FREQUENCY_HZ: f64 = 6.5e9;

#[derive(Parser)]
#[command(name = "spinwave-daq")]
#[command(about = "Multi-instrument sweep acquisition with time-aligned data fusion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep against simulated instruments
    Simulate {
        /// Kind of sweep
        #[arg(long, value_enum, default_value_t = SweepKind::Time)]
        kind: SweepKind,

        /// Acquisition time (time sweeps) or ramp time (driven sweeps), in seconds
        #[arg(long, default_value_t = 5.0)]
        duration: f64,

        /// First setpoint of a driven sweep
        #[arg(long)]
        start: Option<f64>,

        /// Last setpoint of a driven sweep
        #[arg(long)]
        stop: Option<f64>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log output format
        #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
        format: LogFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SweepKind {
    Time,
    Field,
    Dc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            kind,
            duration,
            start,
            stop,
            config,
            format,
        } => {
            let config = match config {
                Some(path) => DaqConfig::load_from(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DaqConfig::load()?,
            };
            config.validate()?;
            tracing_init::init(TracingConfig::from_config(&config)?.with_format(format.into()))?;

            let duration = Duration::try_from_secs_f64(duration)
                .context("--duration must be a non-negative number of seconds")?;
            simulate(kind, duration, start, stop, config).await
        }
    }
}

async fn simulate(
    kind: SweepKind,
    duration: Duration,
    start: Option<f64>,
    stop: Option<f64>,
    config: DaqConfig,
) -> Result<()> {
    let (sink, mut rows) = ChannelSink::new();
    let (mut orchestrator, completion) = build_sweep(kind, duration, start, stop, &config, sink)?;

    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = Arc::clone(&abort);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received; aborting sweep");
                abort.store(true, Ordering::SeqCst);
            }
        });
    }

    info!(?kind, ?duration, "Starting simulated sweep");
    let poll_interval = config.engine.poll_interval;
    let mut sweep = tokio::task::spawn_blocking(move || {
        run_sweep(&mut orchestrator, completion, &abort, poll_interval, |percent| {
            debug!(percent, "Sweep progress");
        })
    });

    let report = loop {
        tokio::select! {
            Some(row) = rows.recv() => print_row(&row)?,
            result = &mut sweep => break result??,
        }
    };
    while let Ok(row) = rows.try_recv() {
        print_row(&row)?;
    }

    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_row(row: &FusedRow) -> Result<()> {
    println!("{}", serde_json::to_string(row)?);
    Ok(())
}

/// Wire mock instruments for `kind`.
///
/// The field probe is always the reference stream: it is the slowest producer.
fn build_sweep(
    kind: SweepKind,
    duration: Duration,
    start: Option<f64>,
    stop: Option<f64>,
    config: &DaqConfig,
    sink: ChannelSink,
) -> Result<(SweepOrchestrator, Completion)> {
    let clock = SweepClock::new();
    let capacity = config.engine.queue_capacity;
    let field = SimulatedField::new(match kind {
        SweepKind::Field => start.unwrap_or(0.0),
        _ => 0.1,
    });

    let probe = MockGaussProbe::new(field.clone(), config.pollers.field_probe_delay).with_noise(1e-5);
    let vna = MockVna::new(VNA_AVERAGING_TIME).with_field(field.clone());
    let mut producers: Vec<Box<dyn Worker>> = vec![
        Box::new(ProducerWorker::new(
            "field-probe",
            FieldProbePoller::new(probe),
            clock,
            capacity,
        )),
        Box::new(ProducerWorker::new(
            "vna",
            VnaPoller::new(vna, config.pollers.vna_delay),
            clock,
            capacity,
        )),
    ];

    let update_delay = config.sweep.update_delay;
    let (sweep, completion): (Option<Box<dyn Worker>>, Completion) = match kind {
        SweepKind::Time => {
            let mut meter = MockSourceMeter::new(BiasMode::Voltage, 1_000.0);
            meter.apply_setpoint(0.5)?;
            producers.push(Box::new(ProducerWorker::new(
                "source-meter",
                SourceMeterPoller::new(meter, config.pollers.source_meter_delay),
                clock,
                capacity,
            )));
            (None, Completion::Duration(duration))
        }
        SweepKind::Field => {
            let trajectory = ramp(start.unwrap_or(0.0), stop.unwrap_or(0.2), duration, update_delay)?;
            let supply = MockMagnetSupply::new(field);
            let worker = SweepWorker::new("magnet", supply, trajectory, clock, false, capacity);
            (Some(Box::new(worker) as Box<dyn Worker>), Completion::SweepWorker)
        }
        SweepKind::Dc => {
            let trajectory = ramp(start.unwrap_or(0.0), stop.unwrap_or(0.01), duration, update_delay)?;
            let meter = MockSourceMeter::new(BiasMode::Current, 50.0);
            let worker = SweepWorker::new("source-meter", meter, trajectory, clock, true, capacity);
            (Some(Box::new(worker) as Box<dyn Worker>), Completion::SweepWorker)
        }
    };

    let mut static_fields = Fields::new();
    static_fields.insert("Frequency (Hz)".to_string(), VNA_FREQUENCY_HZ);
    let settings = FusionSettings {
        time_column: config.engine.time_column.clone(),
        static_fields,
        yield_interval: config.engine.yield_interval,
    };

    let orchestrator = SweepOrchestrator::startup(
        producers,
        sweep,
        Box::new(sink),
        settings,
        config.engine.shutdown_timeout,
    )?;
    Ok((orchestrator, completion))
}

/// Linear trajectory covering `start..=stop` in roughly `duration`.
fn ramp(start: f64, stop: f64, duration: Duration, update_delay: Duration) -> Result<Trajectory> {
    let seconds = duration.as_secs_f64().max(update_delay.as_secs_f64());
    let ramp_rate = ((stop - start).abs() / seconds).max(f64::MIN_POSITIVE);
    Ok(Trajectory::linear(start, stop, ramp_rate, update_delay)?)
}
