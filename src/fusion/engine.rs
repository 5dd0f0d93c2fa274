//! The fusion engine thread.
//!
//! Owns the receiving end of every producer queue, the [`RowMatcher`] and the
//! results sink. Each iteration drains every queue without blocking, matches
//! as many intervals as possible, emits the rows and sleeps for the yield
//! interval. Stopping follows the two-phase protocol in [`super::stop`].
//!
//! # Architecture
//!
//! ```text
//!  producer 0 (reference) ──queue──┐
//!  producer 1 ─────────────queue──┼──> FusionEngine ──> ResultsSink
//!  producer N ─────────────queue──┘        ▲
//!                                          │ watch
//!                             StaticFieldsHandle
//! ```

use super::matcher::RowMatcher;
use super::sink::ResultsSink;
use super::static_fields::{static_fields_slot, StaticFieldsHandle, StaticFieldsReader};
use super::stop::{StopState, StopStateMachine};
use super::types::{Fields, SampleReceiver};
use crate::error::{AppResult, DaqError};
use crate::lifecycle::{join_with_timeout, ExitGuard, JoinOutcome, ThreadStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, info_span, warn};

/// Thread name of the engine.
pub const ENGINE_THREAD_NAME: &str = "fusion-engine";

/// Settings for one engine instance.
#[derive(Debug, Clone)]
pub struct FusionSettings {
    /// Name of the time column written into every row
    pub time_column: String,
    /// Initial static fields overlaid on every row
    pub static_fields: Fields,
    /// Sleep at the end of every iteration
    pub yield_interval: Duration,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            time_column: "Timestamp (s)".to_string(),
            static_fields: Fields::new(),
            yield_interval: Duration::from_millis(1),
        }
    }
}

/// Counters published by the engine thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Samples pulled out of producer queues
    pub samples_ingested: u64,
    /// Fused rows handed to the sink
    pub rows_emitted: u64,
    /// Samples left unmatched when the engine stopped
    pub samples_discarded: u64,
}

#[derive(Debug, Default)]
struct EngineShared {
    all_data_processed: AtomicBool,
    samples_ingested: AtomicU64,
    rows_emitted: AtomicU64,
    samples_discarded: AtomicU64,
    started_at: OnceLock<Instant>,
    stop_requested_at: OnceLock<Instant>,
}

/// State moved onto the engine thread.
struct EngineLoop {
    inputs: Vec<SampleReceiver>,
    matcher: RowMatcher,
    sink: Box<dyn ResultsSink>,
    static_fields: StaticFieldsReader,
    yield_interval: Duration,
}

/// Background merger of all producer queues.
pub struct FusionEngine {
    pending: Option<EngineLoop>,
    static_handle: StaticFieldsHandle,
    status: Arc<ThreadStatus>,
    shared: Arc<EngineShared>,
    handle: Option<JoinHandle<()>>,
    stream_count: usize,
}

impl FusionEngine {
    /// Wire an engine to the given queues.
    ///
    /// Queue order is stream order; queue 0 is the reference stream and must
    /// belong to the slowest producer.
    pub fn new(
        inputs: Vec<SampleReceiver>,
        sink: Box<dyn ResultsSink>,
        settings: FusionSettings,
    ) -> AppResult<Self> {
        if inputs.is_empty() {
            return Err(DaqError::NoStreams);
        }

        let stream_count = inputs.len();
        let (static_handle, static_reader) = static_fields_slot(settings.static_fields);

        Ok(Self {
            pending: Some(EngineLoop {
                inputs,
                matcher: RowMatcher::new(stream_count, settings.time_column),
                sink,
                static_fields: static_reader,
                yield_interval: settings.yield_interval,
            }),
            static_handle,
            status: ThreadStatus::new(),
            shared: Arc::new(EngineShared::default()),
            handle: None,
            stream_count,
        })
    }

    /// Number of wired streams.
    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    /// Spawn the engine thread.
    pub fn start(&mut self) -> AppResult<()> {
        let Some(engine_loop) = self.pending.take() else {
            return Err(DaqError::InvalidState(
                "fusion engine already started".to_string(),
            ));
        };

        let status = Arc::clone(&self.status);
        let shared = Arc::clone(&self.shared);
        let _ = shared.started_at.set(Instant::now());

        let handle = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || engine_loop.run(status, shared))
            .map_err(|source| DaqError::WorkerSpawn {
                name: ENGINE_THREAD_NAME.to_string(),
                source,
            })?;

        self.handle = Some(handle);
        info!(streams = self.stream_count, "Started fusion engine");
        Ok(())
    }

    /// Ask the engine to stop after draining what is already queued.
    pub fn request_stop(&self) {
        let _ = self.shared.stop_requested_at.set(Instant::now());
        self.status.request_stop();
    }

    /// Set once the engine has finished its final drain pass.
    pub fn all_data_processed(&self) -> bool {
        self.shared.all_data_processed.load(Ordering::SeqCst)
    }

    /// Whether the engine thread has exited (normally or not).
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Whether the engine thread died on an invariant violation.
    pub fn has_failed(&self) -> bool {
        self.status.has_failed()
    }

    /// Handle for replacing the static fields while running.
    pub fn static_fields(&self) -> StaticFieldsHandle {
        self.static_handle.clone()
    }

    /// When `start` was called.
    pub fn started_at(&self) -> Option<Instant> {
        self.shared.started_at.get().copied()
    }

    /// When `request_stop` was first called.
    pub fn stop_requested_at(&self) -> Option<Instant> {
        self.shared.stop_requested_at.get().copied()
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            samples_ingested: self.shared.samples_ingested.load(Ordering::SeqCst),
            rows_emitted: self.shared.rows_emitted.load(Ordering::SeqCst),
            samples_discarded: self.shared.samples_discarded.load(Ordering::SeqCst),
        }
    }

    /// Join the engine thread, waiting at most `timeout`.
    pub fn join(&mut self, timeout: Duration) -> JoinOutcome {
        join_with_timeout(self.handle.take(), ENGINE_THREAD_NAME, timeout)
    }
}

impl EngineLoop {
    fn run(mut self, status: Arc<ThreadStatus>, shared: Arc<EngineShared>) {
        let _guard = ExitGuard::new(Arc::clone(&status), ENGINE_THREAD_NAME);
        let span = info_span!("fusion_engine", streams = self.inputs.len());
        let _enter = span.enter();

        let mut machine = StopStateMachine::new();
        while machine.poll(status.stop_requested()) {
            match machine.state() {
                StopState::StopRequested => debug!("Stop requested; finishing current pass"),
                StopState::Draining => debug!("Final drain pass"),
                _ => {}
            }

            let ingested = self.ingest();
            shared
                .samples_ingested
                .fetch_add(ingested as u64, Ordering::SeqCst);

            let static_fields = self.static_fields.refresh();
            let sink = &mut self.sink;
            let emitted = self
                .matcher
                .drain_matches(static_fields, |row| sink.accept(row));
            shared
                .rows_emitted
                .fetch_add(emitted as u64, Ordering::SeqCst);

            thread::sleep(self.yield_interval);
        }

        let leftover = self.matcher.buffered();
        shared
            .samples_discarded
            .store(leftover as u64, Ordering::SeqCst);
        if leftover > 0 {
            debug!(leftover, "Unmatched samples discarded at stop");
        }

        shared.all_data_processed.store(true, Ordering::SeqCst);
        info!(
            rows = shared.rows_emitted.load(Ordering::SeqCst),
            samples = shared.samples_ingested.load(Ordering::SeqCst),
            "Fusion engine stopped; all data processed"
        );
    }

    /// Move everything currently queued into the stream buffers.
    fn ingest(&mut self) -> usize {
        let mut ingested = 0;
        for (stream, rx) in self.inputs.iter_mut().enumerate() {
            loop {
                match rx.try_recv() {
                    Ok(sample) => {
                        self.matcher.push(stream, sample);
                        ingested += 1;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        // Producer gone; its samples were all delivered above
                        break;
                    }
                }
            }
        }
        ingested
    }
}

impl Drop for FusionEngine {
    fn drop(&mut self) {
        if self.handle.is_some() && !self.status.is_finished() {
            warn!("Fusion engine dropped while running; requesting stop");
            self.status.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::sink::ChannelSink;
    use crate::fusion::types::{sample_queue, Sample};

    fn settings() -> FusionSettings {
        FusionSettings {
            yield_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn wait_for(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_new_rejects_empty_inputs() {
        let (sink, _rx) = ChannelSink::new();
        assert!(matches!(
            FusionEngine::new(vec![], Box::new(sink), settings()),
            Err(DaqError::NoStreams)
        ));
    }

    #[test]
    fn test_start_twice_is_an_error() {
        let (_tx, rx) = sample_queue(4);
        let (sink, _rows) = ChannelSink::new();
        let mut engine = FusionEngine::new(vec![rx], Box::new(sink), settings()).unwrap();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(DaqError::InvalidState(_))));
        engine.request_stop();
        assert_eq!(engine.join(Duration::from_secs(2)), JoinOutcome::Joined);
    }

    #[test]
    fn test_data_queued_before_stop_is_still_matched() {
        let (ref_tx, ref_rx) = sample_queue(16);
        let (fast_tx, fast_rx) = sample_queue(16);
        let (sink, mut rows) = ChannelSink::new();
        let mut engine =
            FusionEngine::new(vec![ref_rx, fast_rx], Box::new(sink), settings()).unwrap();

        engine.start().unwrap();

        // Everything is enqueued and the stop requested in one go
        ref_tx.try_send(Sample::from_pairs(0.0, [("T", 1.0)])).unwrap();
        ref_tx.try_send(Sample::from_pairs(1.0, [("T", 2.0)])).unwrap();
        fast_tx.try_send(Sample::from_pairs(0.2, [("F", 4.0)])).unwrap();
        fast_tx.try_send(Sample::from_pairs(0.7, [("F", 8.0)])).unwrap();
        engine.request_stop();

        wait_for(|| engine.all_data_processed());
        let row = rows.try_recv().unwrap();
        assert_eq!(row.get("F"), Some(4.0));
        assert_eq!(row.get("Timestamp (s)"), Some(0.0));

        let stats = engine.stats();
        assert_eq!(stats.samples_ingested, 4);
        assert_eq!(stats.rows_emitted, 1);
        assert_eq!(stats.samples_discarded, 2);
        assert_eq!(engine.join(Duration::from_secs(2)), JoinOutcome::Joined);
    }

    #[test]
    fn test_static_fields_update_applies_to_later_rows() {
        let (tx, rx) = sample_queue(16);
        let (sink, mut rows) = ChannelSink::new();
        let mut static_fields = Fields::new();
        static_fields.insert("Frequency (Hz)".to_string(), 1e9);
        let mut engine = FusionEngine::new(
            vec![rx],
            Box::new(sink),
            FusionSettings {
                static_fields,
                ..settings()
            },
        )
        .unwrap();
        engine.start().unwrap();

        tx.try_send(Sample::from_pairs(0.0, [("T", 1.0)])).unwrap();
        tx.try_send(Sample::from_pairs(1.0, [("T", 1.0)])).unwrap();
        let first = loop {
            if let Ok(row) = rows.try_recv() {
                break row;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(first.get("Frequency (Hz)"), Some(1e9));

        let mut replacement = Fields::new();
        replacement.insert("Bias (V)".to_string(), 2.0);
        engine.static_fields().update(replacement);
        // Give the engine an iteration to pick up the new value
        thread::sleep(Duration::from_millis(20));

        tx.try_send(Sample::from_pairs(2.0, [("T", 1.0)])).unwrap();
        engine.request_stop();
        wait_for(|| engine.all_data_processed());

        let second = rows.try_recv().unwrap();
        assert_eq!(second.get("Bias (V)"), Some(2.0));
        assert_eq!(second.get("Frequency (Hz)"), None);
        engine.join(Duration::from_secs(2));
    }

    #[test]
    fn test_out_of_order_sample_fails_engine() {
        let (tx, rx) = sample_queue(16);
        let (sink, _rows) = ChannelSink::new();
        let mut engine = FusionEngine::new(vec![rx], Box::new(sink), settings()).unwrap();
        engine.start().unwrap();

        tx.try_send(Sample::from_pairs(1.0, [("T", 1.0)])).unwrap();
        tx.try_send(Sample::from_pairs(0.5, [("T", 1.0)])).unwrap();

        wait_for(|| engine.is_finished());
        assert!(engine.has_failed());
        assert!(!engine.all_data_processed());
        assert_eq!(engine.join(Duration::from_secs(2)), JoinOutcome::Panicked);
    }
}
