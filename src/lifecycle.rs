//! Thread lifecycle plumbing shared by the fusion engine and the workers.
//!
//! Cancellation is cooperative: a stop flag checked once per loop iteration.
//! Termination (normal or by panic) is observed through [`ExitGuard`], which
//! marks the owning [`ThreadStatus`] finished when the thread body unwinds or
//! returns. Joins are bounded by a timeout so one stuck instrument call cannot
//! hold up the rest of a teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Interval at which a bounded join checks whether the thread has exited.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Flags shared between a background thread and its owner.
#[derive(Debug, Default)]
pub struct ThreadStatus {
    stop: AtomicBool,
    finished: AtomicBool,
    failure: OnceLock<String>,
}

impl ThreadStatus {
    /// Fresh status: running, no stop requested.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the thread to leave its loop at the next iteration boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Mark the thread as finished.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Whether the thread has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Record a terminal failure. Only the first failure is kept.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.failure.set(message.into());
    }

    /// The recorded failure, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Whether a failure has been recorded.
    pub fn has_failed(&self) -> bool {
        self.failure.get().is_some()
    }
}

/// Marks a [`ThreadStatus`] finished when dropped.
///
/// Created at the top of a thread body. If the thread is unwinding from a
/// panic the status is also marked failed, so pollers see a terminal state
/// instead of waiting forever.
pub struct ExitGuard {
    status: Arc<ThreadStatus>,
    name: String,
}

impl ExitGuard {
    /// Guard `status` for the thread called `name`.
    pub fn new(status: Arc<ThreadStatus>, name: impl Into<String>) -> Self {
        Self {
            status,
            name: name.into(),
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(thread = %self.name, "Thread panicked");
            self.status.fail(format!("thread '{}' panicked", self.name));
        }
        self.status.mark_finished();
    }
}

/// Result of a bounded join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Thread exited normally and was joined
    Joined,
    /// Thread exited by panicking
    Panicked,
    /// Thread was still running at the deadline and has been detached
    TimedOut,
    /// There was no thread to join
    NotStarted,
}

/// Join `handle`, giving up after `timeout`.
///
/// A thread still running at the deadline is detached and an error is
/// logged; this never blocks longer than `timeout` (plus one poll interval).
pub fn join_with_timeout(
    handle: Option<JoinHandle<()>>,
    name: &str,
    timeout: Duration,
) -> JoinOutcome {
    let Some(handle) = handle else {
        return JoinOutcome::NotStarted;
    };

    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!(
                thread = name,
                timeout_ms = timeout.as_millis() as u64,
                "Thread did not finish within timeout; detaching"
            );
            return JoinOutcome::TimedOut;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    match handle.join() {
        Ok(()) => {
            debug!(thread = name, "Thread joined");
            JoinOutcome::Joined
        }
        Err(e) => {
            error!(thread = name, error = ?e, "Thread panicked");
            JoinOutcome::Panicked
        }
    }
}
