//! Asynchronous multi-stream data fusion.
//!
//! Producers sample their instruments at independent, unpredictable rates and
//! push `(timestamp, fields)` samples into private bounded queues. The
//! [`FusionEngine`] pulls from all queues, aligns samples on intervals of the
//! reference stream (queue 0, the slowest producer) and emits one
//! [`FusedRow`] per completed interval.
//!
//! - [`types`]: `Sample`, `Fields`, `FusedRow` and the queue aliases
//! - [`buffer`]: per-stream `StreamBuffer` and column-wise averaging
//! - [`matcher`]: the interval-matching algorithm (`RowMatcher`)
//! - [`stop`]: the two-phase stop state machine
//! - [`static_fields`]: latest-value-wins static field handoff
//! - [`sink`]: the `ResultsSink` trait and stock sinks
//! - [`engine`]: the engine thread

pub mod buffer;
pub mod engine;
pub mod matcher;
pub mod sink;
pub mod static_fields;
pub mod stop;
pub mod types;

pub use buffer::{mean_fields, StreamBuffer};
pub use engine::{EngineStats, FusionEngine, FusionSettings};
pub use matcher::{MatchOutcome, MatchedInterval, RowMatcher};
pub use sink::{ChannelSink, ResultsSink};
pub use static_fields::{static_fields_slot, StaticFieldsHandle, StaticFieldsReader};
pub use stop::{StopState, StopStateMachine};
pub use types::{sample_queue, Fields, FusedRow, Sample, SampleReceiver, SampleSender};
