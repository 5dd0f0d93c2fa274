//! Per-producer accumulator inside the fusion engine.

use super::types::{Fields, Sample};
use std::collections::{BTreeMap, VecDeque};

/// Time-sorted buffer of samples pulled from one producer queue but not yet
/// merged. Drained strictly from the front.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    samples: VecDeque<Sample>,
    last_timestamp: Option<f64>,
}

impl StreamBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample.
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is NaN or earlier than the previously pushed
    /// one. Producers stamp monotonically; reordering here would silently
    /// corrupt alignment.
    pub fn push(&mut self, sample: Sample) {
        assert!(
            !sample.timestamp.is_nan(),
            "sample timestamp must not be NaN"
        );
        if let Some(last) = self.last_timestamp {
            assert!(
                sample.timestamp >= last,
                "out-of-order sample: {} arrived after {}",
                sample.timestamp,
                last
            );
        }
        self.last_timestamp = Some(sample.timestamp);
        self.samples.push_back(sample);
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// At least two samples are buffered.
    pub fn could_be_merged(&self) -> bool {
        self.samples.len() >= 2
    }

    /// First timestamp and the midpoint between the first two timestamps.
    ///
    /// `None` unless two samples are buffered.
    pub fn matching_interval(&self) -> Option<(f64, f64)> {
        match (self.samples.front(), self.samples.get(1)) {
            (Some(first), Some(second)) => Some((
                first.timestamp,
                (first.timestamp + second.timestamp) / 2.0,
            )),
            _ => None,
        }
    }

    /// Count of leading samples whose timestamp is `<= limit`.
    pub fn count_until(&self, limit: f64) -> usize {
        self.samples
            .iter()
            .take_while(|sample| sample.timestamp <= limit)
            .count()
    }

    /// Remove the first `n` samples and return them in order.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` samples are buffered.
    pub fn pop_front_n(&mut self, n: usize) -> Vec<Sample> {
        assert!(
            n <= self.samples.len(),
            "cannot pop {} samples from a buffer holding {}",
            n,
            self.samples.len()
        );
        self.samples.drain(..n).collect()
    }

    /// Timestamps currently buffered, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|sample| sample.timestamp)
    }
}

/// Column-wise arithmetic mean over a group of samples.
///
/// Each column is averaged over the samples that carry it, skipping NaN
/// values. A column whose every value is NaN averages to NaN.
pub fn mean_fields(samples: &[Sample]) -> Fields {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        for (name, value) in &sample.fields {
            let entry = sums.entry(name.as_str()).or_insert((0.0, 0));
            if !value.is_nan() {
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }

    sums.into_iter()
        .map(|(name, (sum, count))| {
            let mean = if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            };
            (name.to_string(), mean)
        })
        .collect()
}
