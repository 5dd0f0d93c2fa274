//! Instrument abstractions.
//!
//! Capability traits the workers drive, plus simulated instruments.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    BiasMode, FieldProbe, SetpointDriver, SourceMeter, SourceMeterReading, TriggeredAnalyzer,
};
