//! Concrete samplers for the supported instrument kinds.
//!
//! | Poller | Capability | Columns |
//! |--------|-----------|---------|
//! | [`FieldProbePoller`] | [`FieldProbe`] | `Field (T)` |
//! | [`VnaPoller`] | [`TriggeredAnalyzer`] | whatever the analyzer returns |
//! | [`SourceMeterPoller`] | [`SourceMeter`] | DC voltage, current, resistance |

use crate::error::AppResult;
use crate::fusion::Fields;
use crate::hardware::capabilities::{FieldProbe, SourceMeter, TriggeredAnalyzer, FIELD_COLUMN};
use crate::workers::base::WorkerContext;
use crate::workers::producer::Sampler;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Round to 10 decimals, the resolution of the field readings stored.
pub(crate) fn round_to_decimals(value: f64) -> f64 {
    const SCALE: f64 = 1e10;
    (value * SCALE).round() / SCALE
}

// =============================================================================
// Field probe
// =============================================================================

/// Reads a field probe once per probe update period.
pub struct FieldProbePoller<P: FieldProbe> {
    probe: P,
    last_read: Option<Instant>,
}

impl<P: FieldProbe> FieldProbePoller<P> {
    /// Poll `probe` at its own update rate.
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            last_read: None,
        }
    }
}

impl<P: FieldProbe + 'static> Sampler for FieldProbePoller<P> {
    fn sample(&mut self, _ctx: &WorkerContext) -> AppResult<Option<Fields>> {
        let delay = self.probe.measurement_delay();
        if let Some(last) = self.last_read {
            let since = last.elapsed();
            if since < delay {
                thread::sleep(delay - since);
            }
        }
        self.last_read = Some(Instant::now());

        let field = round_to_decimals(self.probe.measure_field()?);
        trace!(field, "Field probe reading");

        let mut fields = Fields::new();
        fields.insert(FIELD_COLUMN.to_string(), field);
        Ok(Some(fields))
    }

    fn nominal_interval(&self) -> Option<Duration> {
        Some(self.probe.measurement_delay())
    }
}

// =============================================================================
// VNA
// =============================================================================

/// Polls a triggered analyzer for completed acquisitions.
///
/// The first acquisition after start is discarded since it may have begun
/// before the sweep conditions were applied. After each fetch a new
/// acquisition is triggered, unless the worker is stopping. A trigger that
/// times out is retried on the next poll; the data fetched before it is kept.
pub struct VnaPoller<A: TriggeredAnalyzer> {
    analyzer: A,
    poll_delay: Duration,
    discard_next: bool,
    needs_trigger: bool,
}

impl<A: TriggeredAnalyzer> VnaPoller<A> {
    /// Check for completion every `poll_delay`.
    pub fn new(analyzer: A, poll_delay: Duration) -> Self {
        Self {
            analyzer,
            poll_delay,
            discard_next: true,
            needs_trigger: true,
        }
    }

    /// Trigger an acquisition, leaving `needs_trigger` set on a timeout.
    fn trigger(&mut self) -> AppResult<()> {
        self.needs_trigger = true;
        match self.analyzer.trigger_measurement() {
            Ok(()) => {
                self.needs_trigger = false;
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Trigger failed; retrying on next poll");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<A: TriggeredAnalyzer + 'static> Sampler for VnaPoller<A> {
    fn on_start(&mut self, _ctx: &WorkerContext) -> AppResult<()> {
        self.trigger()
    }

    fn sample(&mut self, ctx: &WorkerContext) -> AppResult<Option<Fields>> {
        if self.needs_trigger && !ctx.should_stop() {
            self.trigger()?;
        }
        thread::sleep(self.poll_delay);
        if self.needs_trigger || !self.analyzer.measurement_done()? {
            return Ok(None);
        }

        let data = self.analyzer.fetch()?;
        if ctx.should_stop() {
            self.needs_trigger = false;
        } else {
            self.trigger()?;
        }

        if self.discard_next {
            self.discard_next = false;
            debug!("Discarding first acquisition");
            return Ok(None);
        }
        Ok(Some(data))
    }
}

// =============================================================================
// Source meter
// =============================================================================

/// Reads a DC source-meter at a fixed delay.
pub struct SourceMeterPoller<M: SourceMeter> {
    meter: M,
    delay: Duration,
}

impl<M: SourceMeter> SourceMeterPoller<M> {
    /// Read `meter` every `delay` (plus its own read time).
    pub fn new(meter: M, delay: Duration) -> Self {
        Self { meter, delay }
    }
}

impl<M: SourceMeter + 'static> Sampler for SourceMeterPoller<M> {
    fn sample(&mut self, _ctx: &WorkerContext) -> AppResult<Option<Fields>> {
        thread::sleep(self.delay);
        Ok(Some(self.meter.measure()?.to_fields()))
    }

    fn nominal_interval(&self) -> Option<Duration> {
        Some(self.delay)
    }
}
