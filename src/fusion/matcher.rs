//! Interval matching across stream buffers.
//!
//! This is the merge algorithm of the fusion engine, kept free of threads and
//! queues so it can be driven deterministically.
//!
//! # Algorithm
//!
//! Buffer 0 is the reference stream. While every buffer holds at least two
//! samples:
//!
//! 1. Take the first two reference timestamps `t0`, `t1` and compute
//!    `mid = (t0 + t1) / 2`.
//! 2. For every buffer count the leading samples with timestamp `<= mid`.
//!    If any count is zero the interval is deferred: nothing is consumed and
//!    matching stops until new data has been ingested.
//! 3. Otherwise pop those samples from every buffer, average each group
//!    column-wise, merge the averages (later streams win on duplicate
//!    columns), set the time column to `t0` and overlay the static fields.
//!
//! "Simultaneous" therefore means "reported within the half-interval bounded
//! by two consecutive reference samples". Faster producers collapse to their
//! mean over that window.

use super::buffer::{mean_fields, StreamBuffer};
use super::types::{Fields, FusedRow, Sample};

/// One successfully matched interval.
#[derive(Debug, Clone)]
pub struct MatchedInterval {
    /// First raw timestamp of the reference stream; becomes the row's time
    pub t0: f64,
    /// Upper bound (inclusive) of the interval
    pub mid: f64,
    /// Timestamps consumed from each stream, in registration order
    pub source_timestamps: Vec<Vec<f64>>,
    /// Merged row, without static fields
    pub row: FusedRow,
}

/// Result of one matching attempt.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// Some buffer holds fewer than two samples
    NotReady,
    /// Some buffer has no sample inside the interval yet; nothing consumed
    Deferred {
        /// Stream that blocked the match
        stream: usize,
        /// Start of the blocked interval
        t0: f64,
    },
    /// An interval was matched and consumed
    Matched(MatchedInterval),
}

/// Holds one stream buffer per registered producer and matches them into rows.
#[derive(Debug)]
pub struct RowMatcher {
    buffers: Vec<StreamBuffer>,
    time_column: String,
    deferred_at: Option<f64>,
}

impl RowMatcher {
    /// Create a matcher for `stream_count` streams.
    ///
    /// Stream 0 is the reference stream and should be the slowest producer.
    pub fn new(stream_count: usize, time_column: impl Into<String>) -> Self {
        Self {
            buffers: (0..stream_count).map(|_| StreamBuffer::new()).collect(),
            time_column: time_column.into(),
            deferred_at: None,
        }
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.buffers.len()
    }

    /// Name of the time column written into every row.
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Buffer of one stream.
    pub fn buffer(&self, stream: usize) -> Option<&StreamBuffer> {
        self.buffers.get(stream)
    }

    /// Samples buffered across all streams.
    pub fn buffered(&self) -> usize {
        self.buffers.iter().map(StreamBuffer::len).sum()
    }

    /// Ingest a sample into a stream buffer.
    ///
    /// # Panics
    ///
    /// Panics on an unknown stream index or an out-of-order timestamp.
    pub fn push(&mut self, stream: usize, sample: Sample) {
        let count = self.buffers.len();
        match self.buffers.get_mut(stream) {
            Some(buffer) => buffer.push(sample),
            None => panic!("sample for unknown stream {} (have {})", stream, count),
        }
    }

    /// Every stream holds at least two samples.
    pub fn merge_possible(&self) -> bool {
        !self.buffers.is_empty() && self.buffers.iter().all(StreamBuffer::could_be_merged)
    }

    /// Attempt to match the first interval of the reference stream.
    pub fn try_match(&mut self) -> MatchOutcome {
        if !self.merge_possible() {
            return MatchOutcome::NotReady;
        }

        let Some((t0, mid)) = self.buffers[0].matching_interval() else {
            return MatchOutcome::NotReady;
        };

        let counts: Vec<usize> = self
            .buffers
            .iter()
            .map(|buffer| buffer.count_until(mid))
            .collect();

        if let Some(stream) = counts.iter().position(|&n| n == 0) {
            return MatchOutcome::Deferred { stream, t0 };
        }

        let mut merged = Fields::new();
        let mut source_timestamps = Vec::with_capacity(self.buffers.len());
        for (buffer, n) in self.buffers.iter_mut().zip(counts) {
            let group = buffer.pop_front_n(n);
            source_timestamps.push(group.iter().map(|sample| sample.timestamp).collect());
            merged.extend(mean_fields(&group));
        }
        merged.insert(self.time_column.clone(), t0);

        MatchOutcome::Matched(MatchedInterval {
            t0,
            mid,
            source_timestamps,
            row: FusedRow::new(merged),
        })
    }

    /// Match intervals until no more are possible, overlaying `static_fields`
    /// on every row and passing it to `emit`.
    ///
    /// A deferred interval ends this pass; it is retried after the next
    /// ingest. Returns the number of rows emitted.
    pub fn drain_matches<F>(&mut self, static_fields: &Fields, mut emit: F) -> usize
    where
        F: FnMut(FusedRow),
    {
        let mut emitted = 0;
        loop {
            match self.try_match() {
                MatchOutcome::Matched(interval) => {
                    let mut values = interval.row.into_values();
                    values.extend(static_fields.iter().map(|(k, v)| (k.clone(), *v)));
                    emit(FusedRow::new(values));
                    emitted += 1;
                }
                MatchOutcome::Deferred { stream, t0 } => {
                    if self.deferred_at != Some(t0) {
                        tracing::warn!(
                            stream,
                            t0,
                            "Not all streams have sufficient data for matching; interval deferred"
                        );
                        self.deferred_at = Some(t0);
                    }
                    break;
                }
                MatchOutcome::NotReady => break,
            }
        }
        emitted
    }
}
