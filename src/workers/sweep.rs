//! Sweep worker: drives one instrument through a trajectory.

use crate::clock::SweepClock;
use crate::error::{AppResult, DaqError};
use crate::fusion::{Fields, SampleReceiver};
use crate::hardware::capabilities::SetpointDriver;
use crate::lifecycle::JoinOutcome;
use crate::workers::base::{WorkerContext, WorkerCore};
use crate::workers::pollers::round_to_decimals;
use crate::workers::Worker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Guards the step count against `x.0000000001` rounding up to `x + 1`.
const STEP_EPSILON: f64 = 1e-9;

/// Upper bound on the number of steps of one trajectory.
pub const MAX_TRAJECTORY_STEPS: usize = 1_000_000;

/// Invoked on the worker thread with the percentage reached after each step.
pub type ProgressCallback = Box<dyn FnMut(f64) + Send>;

/// Evenly spaced setpoints from `start` to `stop`, both inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    start: f64,
    stop: f64,
    update_delay: Duration,
    setpoints: Vec<f64>,
}

impl Trajectory {
    /// Linear ramp at `ramp_rate` units per second, one setpoint every
    /// `update_delay`.
    ///
    /// The ramp is split into `ceil(|stop - start| / ramp_rate / update_delay)`
    /// steps, so the effective rate never exceeds `ramp_rate`. More than
    /// [`MAX_TRAJECTORY_STEPS`] steps is a configuration error.
    pub fn linear(start: f64, stop: f64, ramp_rate: f64, update_delay: Duration) -> AppResult<Self> {
        if !start.is_finite() || !stop.is_finite() {
            return Err(DaqError::Configuration(format!(
                "trajectory bounds must be finite, got {start} -> {stop}"
            )));
        }
        if !(ramp_rate.is_finite() && ramp_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "ramp rate must be positive, got {ramp_rate}"
            )));
        }
        if update_delay.is_zero() {
            return Err(DaqError::Configuration(
                "update delay must be positive".to_string(),
            ));
        }

        let ramp_time = (stop - start).abs() / ramp_rate;
        let steps = (ramp_time / update_delay.as_secs_f64() - STEP_EPSILON)
            .ceil()
            .max(0.0);
        if steps > MAX_TRAJECTORY_STEPS as f64 {
            return Err(DaqError::Configuration(format!(
                "trajectory needs {steps} steps, more than {MAX_TRAJECTORY_STEPS}; \
                 raise the ramp rate or the update delay"
            )));
        }
        let steps = steps as usize;

        let setpoints = if steps == 0 {
            vec![start]
        } else {
            let step = (stop - start) / steps as f64;
            (0..=steps)
                .map(|i| if i == steps { stop } else { start + step * i as f64 })
                .collect()
        };

        Ok(Self {
            start,
            stop,
            update_delay,
            setpoints,
        })
    }

    /// First setpoint.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Final setpoint.
    pub fn stop(&self) -> f64 {
        self.stop
    }

    /// Pause after each setpoint.
    pub fn update_delay(&self) -> Duration {
        self.update_delay
    }

    /// All setpoints in order.
    pub fn setpoints(&self) -> &[f64] {
        &self.setpoints
    }

    /// Completion in percent for `value`, clamped to `0..=100`.
    ///
    /// A degenerate trajectory (`start == stop`) is complete at any value.
    pub fn progress(&self, value: f64) -> f64 {
        let span = (self.stop - self.start).abs();
        if span == 0.0 {
            return 100.0;
        }
        ((value - self.start).abs() / span * 100.0).clamp(0.0, 100.0)
    }
}

/// Worker that commands a [`SetpointDriver`] through a [`Trajectory`].
///
/// Finishes when the last setpoint has been applied, when a stop is
/// requested, or when the driver fails. A driver failure, including a
/// timeout, is recorded and reported through [`Worker::failure`].
pub struct SweepWorker<D: SetpointDriver + 'static> {
    core: WorkerCore,
    driver: Option<D>,
    trajectory: Trajectory,
    progress: Arc<AtomicU64>,
    callback: Option<ProgressCallback>,
}

impl<D: SetpointDriver + 'static> SweepWorker<D> {
    /// Sweep worker named `name`.
    ///
    /// With `publish_data`, every applied setpoint is also published as a
    /// sample `{driver.quantity(): setpoint}` on a queue of `queue_capacity`.
    pub fn new(
        name: impl Into<String>,
        driver: D,
        trajectory: Trajectory,
        clock: SweepClock,
        publish_data: bool,
        queue_capacity: usize,
    ) -> Self {
        let core = if publish_data {
            WorkerCore::new(name, clock, queue_capacity)
        } else {
            WorkerCore::without_output(name, clock)
        };
        Self {
            core,
            driver: Some(driver),
            trajectory,
            progress: Arc::new(AtomicU64::new(0f64.to_bits())),
            callback: None,
        }
    }

    /// Report progress to `callback` after every step.
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// The trajectory being driven.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }
}

struct SweepRun<D: SetpointDriver> {
    driver: D,
    trajectory: Trajectory,
    progress: Arc<AtomicU64>,
    callback: Option<ProgressCallback>,
}

impl<D: SetpointDriver> SweepRun<D> {
    fn run(mut self, ctx: &mut WorkerContext) {
        let column = self.driver.quantity().to_string();
        info!(
            column = %column,
            start = self.trajectory.start(),
            stop = self.trajectory.stop(),
            steps = self.trajectory.setpoints().len(),
            "Sweep started"
        );

        let update_delay = self.trajectory.update_delay();
        for &target in self.trajectory.setpoints() {
            let value = round_to_decimals(target);
            if let Err(e) = self.driver.apply_setpoint(value) {
                error!(error = %e, setpoint = value, "Setpoint command failed; aborting sweep");
                ctx.fail(e.to_string());
                return;
            }

            let percent = self.trajectory.progress(value);
            self.progress.store(percent.to_bits(), Ordering::SeqCst);
            if let Some(callback) = self.callback.as_mut() {
                callback(percent);
            }

            let mut fields = Fields::new();
            fields.insert(column.clone(), value);
            ctx.publish(fields);

            thread::sleep(update_delay);
            if ctx.should_stop() {
                debug!(setpoint = value, "Sweep stopped before reaching the end");
                return;
            }
        }
        info!("Sweep reached final setpoint");
    }
}

impl<D: SetpointDriver + 'static> Worker for SweepWorker<D> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn start(&mut self) -> AppResult<()> {
        let driver = self.driver.take().ok_or_else(|| {
            DaqError::InvalidState(format!("sweep '{}' already started", self.core.name()))
        })?;
        let run = SweepRun {
            driver,
            trajectory: self.trajectory.clone(),
            progress: Arc::clone(&self.progress),
            callback: self.callback.take(),
        };
        self.core.spawn(move |ctx| run.run(ctx))
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
        Some(self.trajectory.update_delay())
    }

    fn progress(&self) -> Option<f64> {
        Some(f64::from_bits(self.progress.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{FaultPlan, MockMagnetSupply, SimulatedField};
    use crate::hardware::capabilities::FIELD_COLUMN;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_finished(worker: &impl Worker) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "worker did not finish");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_linear_step_count() {
        // 1 unit at 10 units/s with 10 ms updates: 10 steps, 11 setpoints
        let t = Trajectory::linear(0.0, 1.0, 10.0, Duration::from_millis(10)).unwrap();
        assert_eq!(t.setpoints().len(), 11);
        assert_eq!(t.setpoints()[0], 0.0);
        assert_eq!(*t.setpoints().last().unwrap(), 1.0);
        assert!((t.setpoints()[5] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_linear_rounds_step_count_up() {
        let t = Trajectory::linear(0.0, 1.05, 10.0, Duration::from_millis(10)).unwrap();
        assert_eq!(t.setpoints().len(), 12);
    }

    #[test]
    fn test_linear_descending() {
        let t = Trajectory::linear(0.2, -0.2, 1.0, Duration::from_millis(100)).unwrap();
        assert_eq!(t.setpoints().len(), 5);
        assert!(t.setpoints().windows(2).all(|w| w[1] < w[0]));
        assert_eq!(*t.setpoints().last().unwrap(), -0.2);
    }

    #[test]
    fn test_degenerate_trajectory() {
        let t = Trajectory::linear(0.3, 0.3, 1.0, Duration::from_millis(10)).unwrap();
        assert_eq!(t.setpoints(), &[0.3]);
        assert_eq!(t.progress(0.3), 100.0);
    }

    #[test]
    fn test_invalid_trajectories_rejected() {
        let delay = Duration::from_millis(10);
        assert!(Trajectory::linear(0.0, 1.0, 0.0, delay).is_err());
        assert!(Trajectory::linear(0.0, 1.0, -1.0, delay).is_err());
        assert!(Trajectory::linear(0.0, f64::NAN, 1.0, delay).is_err());
        assert!(Trajectory::linear(0.0, 1.0, 1.0, Duration::ZERO).is_err());
    }

    #[test]
    fn test_oversized_trajectory_rejected() {
        let delay = Duration::from_millis(1);
        assert!(matches!(
            Trajectory::linear(0.0, 1.0, 1e-12, delay),
            Err(DaqError::Configuration(_))
        ));
        assert!(matches!(
            Trajectory::linear(0.0, 1.0, f64::MIN_POSITIVE, delay),
            Err(DaqError::Configuration(_))
        ));

        // Exactly at the limit is still accepted
        let t = Trajectory::linear(0.0, 1.0, 1.0, Duration::from_micros(1)).unwrap();
        assert_eq!(t.setpoints().len(), MAX_TRAJECTORY_STEPS + 1);
    }

    #[test]
    fn test_progress_is_clamped() {
        let t = Trajectory::linear(1.0, 3.0, 1.0, Duration::from_millis(100)).unwrap();
        assert_eq!(t.progress(1.0), 0.0);
        assert_eq!(t.progress(2.0), 50.0);
        assert_eq!(t.progress(3.000_000_000_1), 100.0);
    }

    #[test]
    fn test_sweep_runs_to_completion() {
        let field = SimulatedField::new(0.0);
        let trajectory = Trajectory::linear(0.0, 0.01, 1.0, Duration::from_millis(2)).unwrap();
        let expected = trajectory.setpoints().len();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);

        let mut worker = SweepWorker::new(
            "magnet",
            MockMagnetSupply::new(field.clone()),
            trajectory,
            SweepClock::new(),
            true,
            64,
        )
        .with_progress_callback(Box::new(move |p| sink.lock().unwrap().push(p)));
        let mut rx = worker.take_output().unwrap();

        worker.start().unwrap();
        wait_finished(&worker);

        assert!(worker.failure().is_none());
        assert_eq!(worker.progress(), Some(100.0));
        assert_eq!(field.get(), 0.01);

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), expected);
        assert!(reported.windows(2).all(|w| w[1] >= w[0]));

        let published: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|s| s.fields[FIELD_COLUMN])
            .collect();
        assert_eq!(published.len(), expected);
    }

    #[test]
    fn test_sweep_honours_stop_request() {
        let trajectory = Trajectory::linear(0.0, 1.0, 1.0, Duration::from_millis(5)).unwrap();
        let mut worker = SweepWorker::new(
            "slow",
            MockMagnetSupply::new(SimulatedField::new(0.0)),
            trajectory,
            SweepClock::new(),
            false,
            8,
        );
        assert!(worker.take_output().is_none());

        worker.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.request_stop();
        wait_finished(&worker);

        assert!(worker.failure().is_none());
        assert!(worker.progress().unwrap() < 100.0);
    }

    #[test]
    fn test_driver_failure_ends_sweep() {
        let supply =
            MockMagnetSupply::new(SimulatedField::new(0.0)).with_faults(FaultPlan::timeout_every(3));
        let trajectory = Trajectory::linear(0.0, 1.0, 10.0, Duration::from_millis(1)).unwrap();
        let mut worker =
            SweepWorker::new("flaky", supply, trajectory, SweepClock::new(), false, 8);

        worker.start().unwrap();
        wait_finished(&worker);

        assert!(worker.failure().unwrap().contains("timeout"));
        assert!(worker.progress().unwrap() < 100.0);
    }
}
