//! Instrument Capabilities
//!
//! Fine-grained capability traits the sweep workers are written against.
//! Instead of one monolithic instrument trait, each worker asks for exactly
//! the capability it drives:
//!
//! - a field-probe poller needs a [`FieldProbe`]
//! - a VNA poller needs a [`TriggeredAnalyzer`]
//! - a source-meter poller needs a [`SourceMeter`]
//! - a sweep worker needs a [`SetpointDriver`]
//!
//! # Design
//!
//! Each capability trait:
//! - Is synchronous. Every worker owns a dedicated OS thread and its
//!   instrument handle exclusively, so calls may block for the instrument's
//!   settle time.
//! - Takes `&mut self`. Exclusive ownership is enforced by construction,
//!   no per-instrument locking is needed.
//! - Returns [`AppResult`]. A [`DaqError::Timeout`](crate::error::DaqError::Timeout)
//!   marks a transport timeout, which polling workers treat as recoverable.

use crate::error::AppResult;
use crate::fusion::Fields;
use std::fmt;
use std::time::Duration;

/// Column name of magnetic field readings.
pub const FIELD_COLUMN: &str = "Field (T)";
/// Column name of DC voltage readings.
pub const DC_VOLTAGE_COLUMN: &str = "DC voltage (V)";
/// Column name of DC current readings.
pub const DC_CURRENT_COLUMN: &str = "DC current (A)";
/// Column name of the derived DC resistance.
pub const DC_RESISTANCE_COLUMN: &str = "DC resistance (ohm)";

/// Capability: Magnetic Field Probe
///
/// Gauss meters and Hall probes that update their reading at a fixed
/// internal rate.
///
/// # Contract
/// - `measurement_delay` is the instrument's own update period; reading
///   faster returns stale values
/// - `measure_field` returns tesla and may be NaN when the probe is overloaded
pub trait FieldProbe: Send {
    /// Internal update period of the probe.
    fn measurement_delay(&self) -> Duration;

    /// Read the current field in tesla.
    fn measure_field(&mut self) -> AppResult<f64>;
}

/// Capability: Triggered Analyzer
///
/// Network analyzers in CW mode: a trigger starts an averaged measurement
/// which is fetched once all averages are complete.
///
/// # Contract
/// - `trigger_measurement` starts a new acquisition, discarding any running one
/// - `measurement_done` is cheap and may be polled at a short interval
/// - `fetch` returns the completed result as named columns
pub trait TriggeredAnalyzer: Send {
    /// Start a new acquisition.
    fn trigger_measurement(&mut self) -> AppResult<()>;

    /// Whether the current acquisition has completed all averages.
    fn measurement_done(&mut self) -> AppResult<bool>;

    /// Fetch the completed acquisition.
    fn fetch(&mut self) -> AppResult<Fields>;
}

/// One DC source-meter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMeterReading {
    /// Voltage in volt (sourced or measured)
    pub voltage: f64,
    /// Current in ampere (sourced or measured)
    pub current: f64,
}

impl SourceMeterReading {
    /// Resistance derived from the reading; infinite or NaN at zero current.
    pub fn resistance(&self) -> f64 {
        self.voltage / self.current
    }

    /// The reading as fused-row columns, including the derived resistance.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(DC_VOLTAGE_COLUMN.to_string(), self.voltage);
        fields.insert(DC_CURRENT_COLUMN.to_string(), self.current);
        fields.insert(DC_RESISTANCE_COLUMN.to_string(), self.resistance());
        fields
    }
}

/// Capability: DC Source-Meter Readout
pub trait SourceMeter: Send {
    /// Read the sourced and measured quantities.
    fn measure(&mut self) -> AppResult<SourceMeterReading>;
}

/// Which quantity a source-meter regulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasMode {
    /// Source voltage, measure current
    Voltage,
    /// Source current, measure voltage
    Current,
}

impl BiasMode {
    /// Column name of the regulated quantity.
    pub fn column(&self) -> &'static str {
        match self {
            BiasMode::Voltage => DC_VOLTAGE_COLUMN,
            BiasMode::Current => DC_CURRENT_COLUMN,
        }
    }
}

impl fmt::Display for BiasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiasMode::Voltage => write!(f, "Voltage"),
            BiasMode::Current => write!(f, "Current"),
        }
    }
}

/// Capability: Setpoint Driver
///
/// Instruments driven through a trajectory by a sweep worker: magnet power
/// supplies (field) and source-meters (bias voltage or current).
///
/// # Contract
/// - `apply_setpoint` commands the next setpoint without waiting for the
///   instrument to settle; the sweep worker paces the trajectory
/// - Errors are fatal for the sweep, including timeouts, since a power
///   supply left mid-ramp must not be silently skipped
pub trait SetpointDriver: Send {
    /// Column name of the driven quantity.
    fn quantity(&self) -> &str;

    /// Command the next setpoint.
    fn apply_setpoint(&mut self, value: f64) -> AppResult<()>;
}
