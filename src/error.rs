//! Custom error types for the sweep engine.
//!
//! This module defines the primary error type, `DaqError`, used across the crate.
//! Using the `thiserror` crate, it provides one consistent way to report the
//! failure classes that can occur while running a multi-instrument sweep.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parsing errors from figment and semantic
//!   errors caught by `DaqConfig::validate`.
//! - **`Timeout`**: an instrument did not answer in time. This is the only
//!   recoverable instrument error; polling workers log it and retry on their
//!   next cycle.
//! - **`Instrument`**: any other instrument failure. Terminal for the worker
//!   that owns the instrument.
//! - **`SweepFailed`** / **`EngineFailed`**: terminal states observed by the
//!   owning procedure through polling.
//!
//! Invariant violations inside the fusion engine (out-of-order samples) are not
//! represented here; they panic the engine thread.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Instrument transport timeout: {0}")]
    Timeout(String),

    #[error("No sweep worker configured; cannot check whether the sweep finished")]
    NoSweepWorker,

    #[error("No data streams registered with the fusion engine")]
    NoStreams,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Failed to spawn worker thread '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sweep failed: {0}")]
    SweepFailed(String),

    #[error("Fusion engine terminated abnormally")]
    EngineFailed,
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether a polling worker may retry after this error.
    ///
    /// Only transport timeouts qualify; everything else ends the worker.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DaqError::Timeout(_))
    }
}
