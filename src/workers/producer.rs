//! Generic producer worker.

use crate::clock::SweepClock;
use crate::error::{AppResult, DaqError};
use crate::fusion::{Fields, SampleReceiver};
use crate::lifecycle::JoinOutcome;
use crate::workers::base::{WorkerContext, WorkerCore};
use crate::workers::Worker;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between attempts to start an acquisition.
const START_RETRY_DELAY: Duration = Duration::from_millis(5);

/// One instrument read per loop iteration.
///
/// The producer worker calls [`Sampler::sample`] until a stop is requested.
/// `Ok(None)` means "nothing new this iteration" (e.g. an acquisition that is
/// still averaging). Recoverable errors are logged and retried on the next
/// iteration; any other error terminates the worker. The same holds for
/// [`Sampler::on_start`], which is retried until it succeeds or fails fatally.
pub trait Sampler: Send + 'static {
    /// Called on the worker thread before the first `sample`, again after
    /// each recoverable error.
    fn on_start(&mut self, _ctx: &WorkerContext) -> AppResult<()> {
        Ok(())
    }

    /// Take one reading. May block for the instrument's read time.
    fn sample(&mut self, ctx: &WorkerContext) -> AppResult<Option<Fields>>;

    /// Expected spacing between two published samples.
    fn nominal_interval(&self) -> Option<Duration> {
        None
    }
}

/// Worker that repeatedly samples one instrument and publishes the readings.
pub struct ProducerWorker<S: Sampler> {
    core: WorkerCore,
    sampler: Option<S>,
    nominal_interval: Option<Duration>,
}

impl<S: Sampler> ProducerWorker<S> {
    /// Producer named `name` with an output queue of `queue_capacity` samples.
    pub fn new(
        name: impl Into<String>,
        sampler: S,
        clock: SweepClock,
        queue_capacity: usize,
    ) -> Self {
        let nominal_interval = sampler.nominal_interval();
        Self {
            core: WorkerCore::new(name, clock, queue_capacity),
            sampler: Some(sampler),
            nominal_interval,
        }
    }
}

fn run_sampler<S: Sampler>(mut sampler: S, ctx: &mut WorkerContext) {
    loop {
        match sampler.on_start(ctx) {
            Ok(()) => break,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Recoverable error starting acquisition; retrying");
                if ctx.should_stop() {
                    return;
                }
                thread::sleep(START_RETRY_DELAY);
            }
            Err(e) => {
                error!(error = %e, "Producer failed to start acquisition");
                ctx.fail(e.to_string());
                return;
            }
        }
    }
    info!("Producer started");

    let mut published: u64 = 0;
    while !ctx.should_stop() {
        match sampler.sample(ctx) {
            Ok(Some(fields)) => {
                if ctx.publish(fields) {
                    published += 1;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Recoverable instrument error; retrying");
            }
            Err(e) => {
                error!(error = %e, "Producer failed");
                ctx.fail(e.to_string());
                break;
            }
        }
    }

    debug!(published, dropped = ctx.dropped(), "Producer loop exited");
}

impl<S: Sampler> Worker for ProducerWorker<S> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn start(&mut self) -> AppResult<()> {
        let sampler = self.sampler.take().ok_or_else(|| {
            DaqError::InvalidState(format!(
                "producer '{}' already started",
                self.core.name()
            ))
        })?;
        self.core.spawn(move |ctx| run_sampler(sampler, ctx))
    }

    fn request_stop(&self) {
        self.core.request_stop();
    }

    fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    fn take_output(&mut self) -> Option<SampleReceiver> {
        self.core.take_output()
    }

    fn join(&mut self, timeout: Duration) -> JoinOutcome {
        self.core.join(timeout)
    }

    fn failure(&self) -> Option<String> {
        self.core.failure()
    }

    fn nominal_interval(&self) -> Option<Duration> {
        self.nominal_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Counter {
        next: u64,
        timeout_at: Option<u64>,
        fail_at: Option<u64>,
        start_timeouts: u32,
        start_attempts: u32,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                next: 0,
                timeout_at: None,
                fail_at: None,
                start_timeouts: 0,
                start_attempts: 0,
            }
        }
    }

    impl Sampler for Counter {
        fn on_start(&mut self, _ctx: &WorkerContext) -> AppResult<()> {
            self.start_attempts += 1;
            if self.start_attempts <= self.start_timeouts {
                return Err(DaqError::Timeout("not ready".into()));
            }
            Ok(())
        }

        fn sample(&mut self, _ctx: &WorkerContext) -> AppResult<Option<Fields>> {
            self.next += 1;
            thread::sleep(Duration::from_millis(1));
            if Some(self.next) == self.fail_at {
                return Err(DaqError::Instrument("broken".into()));
            }
            if Some(self.next) == self.timeout_at {
                return Err(DaqError::Timeout("slow".into()));
            }
            let mut fields = Fields::new();
            fields.insert("n".into(), self.next as f64);
            Ok(Some(fields))
        }

        fn nominal_interval(&self) -> Option<Duration> {
            Some(Duration::from_millis(1))
        }
    }

    fn wait_finished(worker: &impl Worker) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "worker did not finish");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_producer_publishes_until_stopped() {
        let mut worker = ProducerWorker::new("counter", Counter::new(), SweepClock::new(), 1024);
        let mut rx = worker.take_output().unwrap();
        assert_eq!(worker.nominal_interval(), Some(Duration::from_millis(1)));

        worker.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(!worker.is_finished());
        worker.request_stop();
        wait_finished(&worker);
        assert_eq!(worker.join(Duration::from_secs(1)), JoinOutcome::Joined);

        let mut expected = 1.0;
        while let Ok(sample) = rx.try_recv() {
            assert_eq!(sample.fields["n"], expected);
            expected += 1.0;
        }
        assert!(expected > 2.0);
        assert!(worker.failure().is_none());
    }

    #[test]
    fn test_producer_retries_timeouts() {
        let mut sampler = Counter::new();
        sampler.timeout_at = Some(2);
        let mut worker = ProducerWorker::new("flaky", sampler, SweepClock::new(), 1024);
        let mut rx = worker.take_output().unwrap();

        worker.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.request_stop();
        wait_finished(&worker);

        let values: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|s| s.fields["n"])
            .collect();
        assert_eq!(&values[..2], &[1.0, 3.0]);
        assert!(worker.failure().is_none());
    }

    #[test]
    fn test_producer_retries_start_timeouts() {
        let mut sampler = Counter::new();
        sampler.start_timeouts = 3;
        let mut worker = ProducerWorker::new("slow-start", sampler, SweepClock::new(), 1024);
        let mut rx = worker.take_output().unwrap();

        worker.start().unwrap();
        thread::sleep(Duration::from_millis(60));
        worker.request_stop();
        wait_finished(&worker);

        assert!(worker.failure().is_none());
        assert_eq!(rx.try_recv().unwrap().fields["n"], 1.0);
    }

    #[test]
    fn test_producer_stops_on_fatal_error() {
        let mut sampler = Counter::new();
        sampler.fail_at = Some(3);
        let mut worker = ProducerWorker::new("fatal", sampler, SweepClock::new(), 1024);
        let mut rx = worker.take_output().unwrap();

        worker.start().unwrap();
        wait_finished(&worker);

        assert!(worker.failure().unwrap().contains("broken"));
        assert_eq!(std::iter::from_fn(|| rx.try_recv().ok()).count(), 2);
    }

    #[test]
    fn test_producer_start_twice_rejected() {
        let mut worker = ProducerWorker::new("twice", Counter::new(), SweepClock::new(), 8);
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(DaqError::InvalidState(_))));
        worker.request_stop();
        worker.join(Duration::from_secs(1));
    }
}
