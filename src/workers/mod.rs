//! Producer and sweep workers.
//!
//! A worker owns exactly one instrument handle and one OS thread. It samples
//! its instrument in a loop and publishes `(timestamp, fields)` samples to its
//! own bounded queue, whose receiving end is handed to the fusion engine.
//!
//! - [`ProducerWorker`] runs any [`Sampler`]; the concrete pollers live in
//!   [`pollers`]
//! - [`SweepWorker`] additionally drives a [`SetpointDriver`](crate::hardware::SetpointDriver)
//!   through a [`Trajectory`]
//!
//! Both implement [`Worker`], the single interface the orchestrator sees.

pub mod base;
pub mod pollers;
pub mod producer;
pub mod sweep;

pub use base::{WorkerContext, WorkerCore};
pub use pollers::{FieldProbePoller, SourceMeterPoller, VnaPoller};
pub use producer::{ProducerWorker, Sampler};
pub use sweep::{ProgressCallback, SweepWorker, Trajectory, MAX_TRAJECTORY_STEPS};

use crate::error::AppResult;
use crate::fusion::SampleReceiver;
use crate::lifecycle::JoinOutcome;
use std::time::Duration;

/// Capability shared by every background worker.
///
/// # Contract
/// - `start` spawns the worker thread; calling it twice is an error
/// - `request_stop` is cooperative and observed at loop-iteration granularity;
///   an instrument call in flight completes first
/// - `is_finished` becomes `true` when the thread exits, including on failure
/// - `take_output` hands out the queue receiver once; workers that publish
///   nothing return `None`
pub trait Worker: Send {
    /// Name used for the thread and in logs.
    fn name(&self) -> &str;

    /// Spawn the worker thread.
    fn start(&mut self) -> AppResult<()>;

    /// Ask the worker to leave its loop.
    fn request_stop(&self);

    /// Whether the worker thread has exited.
    fn is_finished(&self) -> bool;

    /// Take the receiving end of the worker's output queue.
    fn take_output(&mut self) -> Option<SampleReceiver>;

    /// Join the worker thread, waiting at most `timeout`.
    fn join(&mut self, timeout: Duration) -> JoinOutcome;

    /// Terminal failure recorded by the worker, if any.
    fn failure(&self) -> Option<String> {
        None
    }

    /// Expected spacing between two samples, when known.
    ///
    /// Used to check that the slowest producer is registered first.
    fn nominal_interval(&self) -> Option<Duration> {
        None
    }

    /// Trajectory completion in percent, for workers that drive one.
    fn progress(&self) -> Option<f64> {
        None
    }
}

impl<W: Worker + ?Sized> Worker for Box<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start(&mut self) -> AppResult<()> {
        (**self).start()
    }

    fn request_stop(&self) {
        (**self).request_stop()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn take_output(&mut self) -> Option<SampleReceiver> {
        (**self).take_output()
    }

    fn join(&mut self, timeout: Duration) -> JoinOutcome {
        (**self).join(timeout)
    }

    fn failure(&self) -> Option<String> {
        (**self).failure()
    }

    fn nominal_interval(&self) -> Option<Duration> {
        (**self).nominal_interval()
    }

    fn progress(&self) -> Option<f64> {
        (**self).progress()
    }
}
