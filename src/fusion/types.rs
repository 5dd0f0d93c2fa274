//! Data types flowing from producers through the fusion engine to the sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Mapping of column name to numeric value.
///
/// Ordered so that fused rows serialize with a stable column order.
pub type Fields = BTreeMap<String, f64>;

/// Sending half of a producer queue. Owned by exactly one worker.
pub type SampleSender = mpsc::Sender<Sample>;

/// Receiving half of a producer queue. Owned by the fusion engine.
pub type SampleReceiver = mpsc::Receiver<Sample>;

/// Create a bounded producer queue.
///
/// # Panics
///
/// Panics if `capacity` is zero (as `tokio::sync::mpsc::channel` does);
/// `DaqConfig::validate` rejects that value up front.
pub fn sample_queue(capacity: usize) -> (SampleSender, SampleReceiver) {
    mpsc::channel(capacity)
}

/// One timestamped reading from one producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the sweep clock's epoch, stamped at enqueue time
    pub timestamp: f64,
    /// Measured values
    pub fields: Fields,
}

impl Sample {
    /// Create a sample from a timestamp and its fields.
    pub fn new(timestamp: f64, fields: Fields) -> Self {
        Self { timestamp, fields }
    }

    /// Convenience constructor for tests and simple producers.
    pub fn from_pairs<'a, I>(timestamp: f64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Self {
            timestamp,
            fields: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// One time-aligned output record.
///
/// Holds the time column, the per-stream averaged fields and the static-field
/// overlay in a single flat mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusedRow {
    values: Fields,
}

impl FusedRow {
    /// Wrap an already merged mapping.
    pub fn new(values: Fields) -> Self {
        Self { values }
    }

    /// Look up one column.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }

    /// Consume the row, returning its columns.
    pub fn into_values(self) -> Fields {
        self.values
    }
}
