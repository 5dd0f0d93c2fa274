//! Thread plumbing shared by all workers.

use crate::clock::SweepClock;
use crate::error::{AppResult, DaqError};
use crate::fusion::{sample_queue, Fields, Sample, SampleReceiver, SampleSender};
use crate::lifecycle::{join_with_timeout, ExitGuard, JoinOutcome, ThreadStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info_span, warn};

/// Owner-side state of one worker: its queue, status flags and thread handle.
pub struct WorkerCore {
    name: String,
    clock: SweepClock,
    status: Arc<ThreadStatus>,
    tx: Option<SampleSender>,
    rx: Option<SampleReceiver>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerCore {
    /// Core with an output queue of `queue_capacity` samples.
    pub fn new(name: impl Into<String>, clock: SweepClock, queue_capacity: usize) -> Self {
        let (tx, rx) = sample_queue(queue_capacity);
        Self {
            name: name.into(),
            clock,
            status: ThreadStatus::new(),
            tx: Some(tx),
            rx: Some(rx),
            handle: None,
        }
    }

    /// Core of a worker that publishes nothing.
    pub fn without_output(name: impl Into<String>, clock: SweepClock) -> Self {
        Self {
            name: name.into(),
            clock,
            status: ThreadStatus::new(),
            tx: None,
            rx: None,
            handle: None,
        }
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker thread running `body`.
    ///
    /// The thread is named after the worker, runs inside a span carrying the
    /// worker name, and marks the worker finished when `body` returns or
    /// panics.
    pub fn spawn<F>(&mut self, body: F) -> AppResult<()>
    where
        F: FnOnce(&mut WorkerContext) + Send + 'static,
    {
        if self.handle.is_some() || self.status.is_finished() {
            return Err(DaqError::InvalidState(format!(
                "worker '{}' already started",
                self.name
            )));
        }

        let mut context = WorkerContext {
            name: self.name.clone(),
            clock: self.clock,
            status: Arc::clone(&self.status),
            tx: self.tx.take(),
            dropped: 0,
        };
        let status = Arc::clone(&self.status);
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = ExitGuard::new(status, name.clone());
                let span = info_span!("worker", worker = %name);
                let _enter = span.enter();
                body(&mut context);
                if context.dropped > 0 {
                    warn!(dropped = context.dropped, "Samples dropped on full queue");
                }
            })
            .map_err(|source| DaqError::WorkerSpawn {
                name: self.name.clone(),
                source,
            })?;

        self.handle = Some(handle);
        debug!(worker = %self.name, "Worker thread spawned");
        Ok(())
    }

    /// Ask the thread to stop.
    pub fn request_stop(&self) {
        self.status.request_stop();
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Recorded failure.
    pub fn failure(&self) -> Option<String> {
        self.status.failure().map(str::to_string)
    }

    /// Hand out the queue receiver (once).
    pub fn take_output(&mut self) -> Option<SampleReceiver> {
        self.rx.take()
    }

    /// Join with a bounded wait.
    pub fn join(&mut self, timeout: Duration) -> JoinOutcome {
        join_with_timeout(self.handle.take(), &self.name, timeout)
    }
}

/// Thread-side handle passed to a worker body.
pub struct WorkerContext {
    name: String,
    clock: SweepClock,
    status: Arc<ThreadStatus>,
    tx: Option<SampleSender>,
    dropped: u64,
}

impl WorkerContext {
    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a stop has been requested.
    pub fn should_stop(&self) -> bool {
        self.status.stop_requested()
    }

    /// Sweep clock shared with the other workers.
    pub fn clock(&self) -> SweepClock {
        self.clock
    }

    /// Stamp `fields` with the current time and enqueue them without blocking.
    ///
    /// A full queue means the fusion engine is stalled: the sample is dropped
    /// with a warning. Returns whether the sample was enqueued.
    pub fn publish(&mut self, fields: Fields) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        let sample = Sample::new(self.clock.now(), fields);
        match tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(
                    dropped_total = self.dropped,
                    "Data queue is full; continuing without enqueuing sample"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Data queue closed; sample discarded");
                false
            }
        }
    }

    /// Samples dropped on a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Record a terminal failure.
    pub fn fail(&self, message: impl Into<String>) {
        self.status.fail(message);
    }

    /// Context not attached to any thread or queue, for driving samplers
    /// by hand.
    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> (Self, Arc<ThreadStatus>) {
        let status = ThreadStatus::new();
        let ctx = Self {
            name: name.to_string(),
            clock: SweepClock::new(),
            status: Arc::clone(&status),
            tx: None,
            dropped: 0,
        };
        (ctx, status)
    }
}
