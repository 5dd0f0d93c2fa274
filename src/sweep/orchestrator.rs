//! Wiring and lifecycle of one sweep.
//!
//! The orchestrator owns the fusion engine, every producer worker and the
//! optional sweep worker, and fixes the order in which they are started and
//! stopped:
//!
//! ```text
//! start:  FusionEngine ──> producers (in order) ──> SweepWorker
//! stop:   SweepWorker ──> producers (reverse) ──> FusionEngine
//! ```
//!
//! Starting the engine first means no producer enqueues into an engine that is
//! not yet consuming; stopping it last means it drains everything already
//! queued before it leaves its loop.

use crate::error::{AppResult, DaqError};
use crate::fusion::{EngineStats, Fields, FusionEngine, FusionSettings, ResultsSink};
use crate::lifecycle::JoinOutcome;
use crate::workers::Worker;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`SweepOrchestrator`].
///
/// ```text
/// Ready ──start──> Running ──request_stop──> Stopping ──shutdown──> ShutDown
///   │                                                                  ▲
///   └──────────────────────────shutdown────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// Wired, nothing started
    Ready,
    /// All threads started
    Running,
    /// Stop requested, threads winding down
    Stopping,
    /// Threads joined (or detached after a timeout)
    ShutDown,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorState::Ready => write!(f, "Ready"),
            OrchestratorState::Running => write!(f, "Running"),
            OrchestratorState::Stopping => write!(f, "Stopping"),
            OrchestratorState::ShutDown => write!(f, "ShutDown"),
        }
    }
}

/// Owner of the engine and all workers of one sweep.
///
/// # Example
///
/// ```rust,ignore
/// let mut orchestrator = SweepOrchestrator::startup(
///     vec![Box::new(probe_worker), Box::new(vna_worker)],
///     Some(Box::new(magnet_worker)),
///     Box::new(sink),
///     FusionSettings::default(),
///     Duration::from_secs(5),
/// )?;
/// orchestrator.start()?;
/// while !orchestrator.sweep_finished()? {
///     std::thread::sleep(Duration::from_millis(100));
/// }
/// orchestrator.request_stop();
/// while !orchestrator.all_data_processed() {
///     std::thread::sleep(Duration::from_millis(100));
/// }
/// orchestrator.shutdown();
/// ```
pub struct SweepOrchestrator {
    engine: FusionEngine,
    producers: Vec<Box<dyn Worker>>,
    sweep: Option<Box<dyn Worker>>,
    shutdown_timeout: Duration,
    state: OrchestratorState,
}

impl SweepOrchestrator {
    /// Wire workers to a new fusion engine.
    ///
    /// # Arguments
    ///
    /// * `producers` - Passive samplers; the first one is the reference
    ///   stream and must be the slowest
    /// * `sweep` - Worker driving the trajectory, if the sweep has one. Its
    ///   queue, when it publishes, is registered after all producers
    /// * `sink` - Receiver of fused rows
    /// * `settings` - Engine settings
    /// * `shutdown_timeout` - Bound on each thread join in [`Self::shutdown`]
    ///
    /// # Errors
    ///
    /// Returns [`DaqError::NoStreams`] if no worker publishes data.
    pub fn startup(
        mut producers: Vec<Box<dyn Worker>>,
        mut sweep: Option<Box<dyn Worker>>,
        sink: Box<dyn ResultsSink>,
        settings: FusionSettings,
        shutdown_timeout: Duration,
    ) -> AppResult<Self> {
        let mut inputs = Vec::new();
        let mut intervals = Vec::new();
        for worker in producers.iter_mut().chain(sweep.iter_mut()) {
            if let Some(rx) = worker.take_output() {
                debug!(worker = worker.name(), stream = inputs.len(), "Registered stream");
                inputs.push(rx);
                intervals.push((worker.name().to_string(), worker.nominal_interval()));
            }
        }

        check_reference_stream(&intervals);

        let engine = FusionEngine::new(inputs, sink, settings)?;
        info!(
            producers = producers.len(),
            has_sweep_worker = sweep.is_some(),
            streams = engine.stream_count(),
            "Sweep wired"
        );

        Ok(Self {
            engine,
            producers,
            sweep,
            shutdown_timeout,
            state: OrchestratorState::Ready,
        })
    }

    /// Start engine, producers and sweep worker, in that order.
    ///
    /// If any start fails, everything already started is shut down and the
    /// error is returned.
    pub fn start(&mut self) -> AppResult<()> {
        if self.state != OrchestratorState::Ready {
            return Err(DaqError::InvalidState(format!(
                "cannot start sweep in state {}",
                self.state
            )));
        }
        self.state = OrchestratorState::Running;

        if let Err(e) = self.start_all() {
            error!(error = %e, "Sweep start failed; tearing down");
            self.shutdown();
            return Err(e);
        }
        info!("Sweep started");
        Ok(())
    }

    fn start_all(&mut self) -> AppResult<()> {
        self.engine.start()?;
        for worker in &mut self.producers {
            worker.start()?;
            debug!(worker = worker.name(), "Producer started");
        }
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.start()?;
            debug!(worker = sweep.name(), "Sweep worker started");
        }
        Ok(())
    }

    /// Ask every thread to stop: sweep worker, producers in reverse, engine.
    ///
    /// Non-blocking. Poll [`Self::all_data_processed`] to learn when the
    /// engine has drained.
    pub fn request_stop(&mut self) {
        if let Some(sweep) = &self.sweep {
            sweep.request_stop();
        }
        for worker in self.producers.iter().rev() {
            worker.request_stop();
        }
        self.engine.request_stop();
        if self.state == OrchestratorState::Running {
            self.state = OrchestratorState::Stopping;
        }
    }

    /// Whether the sweep worker has finished its trajectory (or failed).
    ///
    /// # Errors
    ///
    /// Returns [`DaqError::NoSweepWorker`] if the sweep has no sweep worker.
    pub fn sweep_finished(&self) -> AppResult<bool> {
        self.sweep
            .as_ref()
            .map(|sweep| sweep.is_finished())
            .ok_or(DaqError::NoSweepWorker)
    }

    /// Whether a sweep worker is configured.
    pub fn has_sweep_worker(&self) -> bool {
        self.sweep.is_some()
    }

    /// Failure recorded by the sweep worker.
    pub fn sweep_failure(&self) -> Option<String> {
        self.sweep.as_ref().and_then(|sweep| sweep.failure())
    }

    /// Failures recorded by producers, as `(worker, message)`.
    pub fn producer_failures(&self) -> Vec<(String, String)> {
        self.producers
            .iter()
            .filter_map(|w| w.failure().map(|f| (w.name().to_string(), f)))
            .collect()
    }

    /// Whether any producer has ended with a failure.
    pub fn producer_failed(&self) -> bool {
        self.producers.iter().any(|w| w.failure().is_some())
    }

    /// Trajectory completion of the sweep worker, in percent.
    pub fn progress(&self) -> Option<f64> {
        self.sweep.as_ref().and_then(|sweep| sweep.progress())
    }

    /// Whether the engine has finished its final drain pass.
    pub fn all_data_processed(&self) -> bool {
        self.engine.all_data_processed()
    }

    /// Whether the engine thread died.
    pub fn engine_failed(&self) -> bool {
        self.engine.has_failed()
    }

    /// Replace the static fields applied to subsequently fused rows.
    pub fn update_static_fields(&self, fields: Fields) {
        debug!(columns = fields.len(), "Static fields updated");
        self.engine.static_fields().update(fields);
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// The fusion engine.
    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Stop everything and join every thread in stop order.
    ///
    /// Each join waits at most the shutdown timeout. A thread that does not
    /// exit in time is detached and logged; shutdown itself never fails.
    /// Returns the names of threads that did not join cleanly. Idempotent.
    pub fn shutdown(&mut self) -> Vec<String> {
        if self.state == OrchestratorState::ShutDown {
            return Vec::new();
        }
        self.request_stop();

        let timeout = self.shutdown_timeout;
        let mut unclean = Vec::new();
        let mut record = |name: &str, outcome: JoinOutcome| match outcome {
            JoinOutcome::Joined | JoinOutcome::NotStarted => {}
            JoinOutcome::Panicked | JoinOutcome::TimedOut => {
                warn!(thread = name, ?outcome, "Thread did not shut down cleanly");
                unclean.push(name.to_string());
            }
        };

        if let Some(sweep) = self.sweep.as_mut() {
            let outcome = sweep.join(timeout);
            record(sweep.name(), outcome);
        }
        for worker in self.producers.iter_mut().rev() {
            let outcome = worker.join(timeout);
            record(worker.name(), outcome);
        }
        let outcome = self.engine.join(timeout);
        record(crate::fusion::engine::ENGINE_THREAD_NAME, outcome);

        self.state = OrchestratorState::ShutDown;
        info!(unclean = unclean.len(), stats = ?self.engine.stats(), "Sweep shut down");
        unclean
    }
}

impl Drop for SweepOrchestrator {
    fn drop(&mut self) {
        if matches!(
            self.state,
            OrchestratorState::Running | OrchestratorState::Stopping
        ) {
            self.shutdown();
        }
    }
}

/// Warn when a stream other than the reference is nominally slower.
fn check_reference_stream(intervals: &[(String, Option<Duration>)]) {
    let Some((reference, Some(reference_interval))) = intervals.first() else {
        return;
    };
    for (name, interval) in intervals.iter().skip(1) {
        if let Some(interval) = interval {
            if interval > reference_interval {
                warn!(
                    reference = %reference,
                    worker = %name,
                    reference_interval_ms = reference_interval.as_millis() as u64,
                    worker_interval_ms = interval.as_millis() as u64,
                    "Stream is slower than the reference stream; rows will be sparse"
                );
            }
        }
    }
}
