//! Sweep orchestration.
//!
//! - [`orchestrator`]: `SweepOrchestrator`, which wires the workers to the
//!   fusion engine and fixes start and stop order
//! - [`procedure`]: `run_sweep`, the cooperative polling loop that takes a
//!   wired sweep from start to shutdown

pub mod orchestrator;
pub mod procedure;

pub use orchestrator::{OrchestratorState, SweepOrchestrator};
pub use procedure::{run_sweep, Completion, SweepReport};
