//! Cooperative procedure loop driving one sweep to completion.
//!
//! The procedure thread never blocks on worker internals. It polls the
//! orchestrator's predicates and sleeps in between:
//!
//! 1. start everything
//! 2. wait for completion (trajectory end or elapsed duration), abort, or a
//!    failed producer (its stream can no longer be fused)
//! 3. request stop
//! 4. wait until the engine has drained, or abort / engine failure
//! 5. shut down, then report

use crate::error::{AppResult, DaqError};
use crate::fusion::EngineStats;
use crate::sweep::orchestrator::SweepOrchestrator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// When the acquisition phase of a sweep ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// When the sweep worker reaches the end of its trajectory
    SweepWorker,
    /// After a fixed duration (time sweeps without a driven trajectory)
    Duration(Duration),
}

/// Summary of a finished sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
    /// Whether the sweep was aborted before completing
    pub aborted: bool,
    /// Engine counters at shutdown
    pub rows_emitted: u64,
    /// Samples taken out of producer queues
    pub samples_ingested: u64,
    /// Unmatched samples dropped at stop
    pub samples_discarded: u64,
    /// Threads that had to be detached or had panicked at shutdown
    pub unclean_threads: Vec<String>,
    /// Producers that ended with a failure, as `(worker, message)`
    pub producer_failures: Vec<(String, String)>,
}

impl SweepReport {
    fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        aborted: bool,
        stats: EngineStats,
        unclean_threads: Vec<String>,
        producer_failures: Vec<(String, String)>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            aborted,
            rows_emitted: stats.rows_emitted,
            samples_ingested: stats.samples_ingested,
            samples_discarded: stats.samples_discarded,
            unclean_threads,
            producer_failures,
        }
    }
}

/// Run a wired sweep to completion.
///
/// # Arguments
///
/// * `orchestrator` - Wired, not yet started sweep
/// * `completion` - When to end acquisition
/// * `abort` - Set from any thread to end the sweep early
/// * `poll_interval` - Sleep between predicate checks
/// * `progress` - Called with the completion percentage on every poll
///
/// # Errors
///
/// - [`DaqError::NoSweepWorker`] if `completion` needs a sweep worker and
///   none is configured (checked before anything is started)
/// - [`DaqError::EngineFailed`] if the fusion engine thread died
/// - [`DaqError::SweepFailed`] if the driven instrument failed
///
/// A failed producer ends acquisition early without an error; the failure is
/// listed in [`SweepReport::producer_failures`].
///
/// In every case the orchestrator is shut down before returning.
pub fn run_sweep<P>(
    orchestrator: &mut SweepOrchestrator,
    completion: Completion,
    abort: &AtomicBool,
    poll_interval: Duration,
    mut progress: P,
) -> AppResult<SweepReport>
where
    P: FnMut(f64),
{
    if completion == Completion::SweepWorker && !orchestrator.has_sweep_worker() {
        return Err(DaqError::NoSweepWorker);
    }

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = tracing::info_span!("sweep", run_id = %run_id);
    let _enter = span.enter();

    orchestrator.start()?;
    let start = Instant::now();
    let mut aborted = false;

    loop {
        if abort.load(Ordering::SeqCst) {
            warn!("Sweep aborted");
            aborted = true;
            break;
        }
        if orchestrator.engine_failed() {
            break;
        }
        if orchestrator.producer_failed() {
            warn!("Producer failed; ending acquisition");
            break;
        }

        let done = match completion {
            Completion::SweepWorker => {
                progress(orchestrator.progress().unwrap_or(0.0));
                orchestrator.sweep_finished()?
            }
            Completion::Duration(duration) => {
                let elapsed = start.elapsed();
                let percent = if duration.is_zero() {
                    100.0
                } else {
                    (elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0).min(100.0)
                };
                progress(percent);
                elapsed >= duration
            }
        };
        if done {
            break;
        }
        thread::sleep(poll_interval);
    }

    orchestrator.request_stop();
    while !orchestrator.all_data_processed() {
        if orchestrator.engine_failed() {
            break;
        }
        if abort.load(Ordering::SeqCst) {
            if !aborted {
                warn!("Sweep aborted while draining");
            }
            aborted = true;
            break;
        }
        thread::sleep(poll_interval);
    }

    let unclean = orchestrator.shutdown();
    let producer_failures = orchestrator.producer_failures();
    for (worker, failure) in &producer_failures {
        warn!(worker = %worker, failure = %failure, "Producer ended with a failure");
    }

    if orchestrator.engine_failed() {
        error!("Fusion engine failed; data after the failure is lost");
        return Err(DaqError::EngineFailed);
    }
    if let Some(failure) = orchestrator.sweep_failure() {
        error!(failure = %failure, "Sweep failed");
        return Err(DaqError::SweepFailed(failure));
    }

    let report = SweepReport::new(
        run_id,
        started_at,
        aborted,
        orchestrator.stats(),
        unclean,
        producer_failures,
    );
    info!(
        rows = report.rows_emitted,
        aborted = report.aborted,
        producer_failures = report.producer_failures.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Sweep complete"
    );
    Ok(report)
}
