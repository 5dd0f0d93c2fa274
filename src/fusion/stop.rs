//! Two-phase stop for the fusion engine.
//!
//! Data still sitting in producer queues when the engine is asked to stop has
//! already been acquired and must be matched. The engine therefore never exits
//! on the iteration in which it first sees the stop request.
//!
//! # State Machine
//!
//! ```text
//! Running ──stop observed──> StopRequested ──next poll──> Draining ──pass done──> Stopped
//! ```
//!
//! Each poll happens at the top of an engine iteration, so at least one full
//! drain-and-merge pass runs after the request is first observed, and the
//! final pass runs in `Draining`.

use std::fmt;

/// Lifecycle of the fusion engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    /// Normal operation
    Running,
    /// Stop observed; this iteration still runs in full
    StopRequested,
    /// Final drain-and-merge pass
    Draining,
    /// Loop exited
    Stopped,
}

impl fmt::Display for StopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopState::Running => write!(f, "Running"),
            StopState::StopRequested => write!(f, "StopRequested"),
            StopState::Draining => write!(f, "Draining"),
            StopState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Tracks the stop state across engine iterations.
#[derive(Debug, Clone)]
pub struct StopStateMachine {
    state: StopState,
}

impl StopStateMachine {
    /// Start in `Running`.
    pub fn new() -> Self {
        Self {
            state: StopState::Running,
        }
    }

    /// Current state.
    pub fn state(&self) -> StopState {
        self.state
    }

    /// Called at the top of every iteration with the current stop flag.
    ///
    /// Returns `true` if the iteration should run.
    pub fn poll(&mut self, stop_requested: bool) -> bool {
        self.state = match self.state {
            StopState::Running if stop_requested => StopState::StopRequested,
            StopState::Running => StopState::Running,
            StopState::StopRequested => StopState::Draining,
            StopState::Draining | StopState::Stopped => StopState::Stopped,
        };
        self.state != StopState::Stopped
    }
}

impl Default for StopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_running_without_request() {
        let mut machine = StopStateMachine::new();
        for _ in 0..5 {
            assert!(machine.poll(false));
        }
        assert_eq!(machine.state(), StopState::Running);
    }

    #[test]
    fn test_runs_two_more_iterations_after_request() {
        let mut machine = StopStateMachine::new();
        assert!(machine.poll(false));

        assert!(machine.poll(true));
        assert_eq!(machine.state(), StopState::StopRequested);

        assert!(machine.poll(true));
        assert_eq!(machine.state(), StopState::Draining);

        assert!(!machine.poll(true));
        assert_eq!(machine.state(), StopState::Stopped);
    }

    #[test]
    fn test_request_is_latched() {
        // The flag is not re-checked once the machine has left Running
        let mut machine = StopStateMachine::new();
        assert!(machine.poll(true));
        assert!(machine.poll(false));
        assert!(!machine.poll(false));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut machine = StopStateMachine::new();
        machine.poll(true);
        machine.poll(true);
        machine.poll(true);
        assert!(!machine.poll(false));
        assert_eq!(machine.state().to_string(), "Stopped");
    }
}
