//! # Spin-Wave DAQ Core Library
//!
//! Multi-instrument data fusion and sweep orchestration for spin-wave
//! spectroscopy. Several instruments (field probe, network analyzer,
//! source-meter, magnet supply) are sampled concurrently at independent rates;
//! their readings are aligned on a common time base and emitted as fused rows
//! while one instrument may be driven through a trajectory.
//!
//! ## Crate Structure
//!
//! - **`clock`**: `SweepClock`, the monotonic time base shared by one sweep.
//! - **`config`**: figment-loaded `DaqConfig` with validation.
//! - **`error`**: the `DaqError` enum and `AppResult` alias.
//! - **`fusion`**: sample types, the interval-matching algorithm and the
//!   `FusionEngine` thread that merges all producer queues.
//! - **`hardware`**: synchronous instrument capability traits and simulated
//!   instruments.
//! - **`lifecycle`**: stop flags, exit guards and bounded joins shared by all
//!   background threads.
//! - **`sweep`**: `SweepOrchestrator` (start/stop ordering) and the
//!   `run_sweep` procedure loop.
//! - **`tracing_init`**: tracing-subscriber setup.
//! - **`workers`**: the `Worker` trait, producer workers, concrete pollers and
//!   the trajectory-driving `SweepWorker`.
//!
//! ## Data Flow
//!
//! ```text
//! FieldProbePoller ──queue 0 (reference)──┐
//! VnaPoller ─────────queue 1──────────────┼──> FusionEngine ──> ResultsSink
//! SweepWorker ───────queue 2──────────────┘         ▲
//!     │                                             │ latest value wins
//!     └── drives SetpointDriver          update_static_fields()
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fusion;
pub mod hardware;
pub mod lifecycle;
pub mod sweep;
pub mod tracing_init;
pub mod workers;

pub use clock::SweepClock;
pub use error::{AppResult, DaqError};
