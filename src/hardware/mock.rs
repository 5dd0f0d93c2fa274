//! Mock Hardware Implementations
//!
//! Simulated instruments for tests and the `simulate` CLI command.
//!
//! # Available Mocks
//!
//! - `MockMagnetSupply` - magnet power supply driving a shared simulated field
//! - `MockGaussProbe` - field probe reading the simulated field with noise
//! - `MockVna` - CW-mode network analyzer with a field-dependent resonance
//! - `MockSourceMeter` - DC source-meter with a fixed load resistance
//!
//! The magnet supply and the probe are distinct instrument handles; they only
//! share the simulated physics through [`SimulatedField`].
//!
//! Every mock carries a [`FaultPlan`] for injecting transport timeouts and
//! fatal failures.

use crate::error::{AppResult, DaqError};
use crate::fusion::Fields;
use crate::hardware::capabilities::{
    BiasMode, FieldProbe, SetpointDriver, SourceMeter, SourceMeterReading, TriggeredAnalyzer,
    FIELD_COLUMN,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Fault injection
// =============================================================================

/// Scripted failures for a mock instrument.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Every n-th call fails with a transport timeout
    pub timeout_every: Option<u64>,
    /// Calls after the n-th fail with a fatal instrument error
    pub fail_after: Option<u64>,
    calls: u64,
}

impl FaultPlan {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Time out on every n-th call.
    pub fn timeout_every(n: u64) -> Self {
        Self {
            timeout_every: Some(n),
            ..Self::default()
        }
    }

    /// Fail fatally once `n` calls have succeeded.
    pub fn fail_after(n: u64) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Account for one call, returning the scripted error if any.
    pub fn check(&mut self, instrument: &str) -> AppResult<()> {
        self.calls += 1;
        if let Some(limit) = self.fail_after {
            if self.calls > limit {
                return Err(DaqError::Instrument(format!(
                    "{instrument}: simulated failure after {limit} calls"
                )));
            }
        }
        if let Some(n) = self.timeout_every {
            if n > 0 && self.calls % n == 0 {
                return Err(DaqError::Timeout(format!(
                    "{instrument}: simulated transport timeout"
                )));
            }
        }
        Ok(())
    }

    /// Calls accounted so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

// =============================================================================
// SimulatedField - shared physics between supply and probe
// =============================================================================

/// Magnetic field of the simulated setup, in tesla.
#[derive(Debug, Clone, Default)]
pub struct SimulatedField {
    bits: Arc<AtomicU64>,
}

impl SimulatedField {
    /// Field starting at `initial` tesla.
    pub fn new(initial: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(initial.to_bits())),
        }
    }

    /// Current field.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    /// Set the field.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::SeqCst);
    }
}

// =============================================================================
// MockMagnetSupply
// =============================================================================

/// Magnet power supply that sets the simulated field instantly.
pub struct MockMagnetSupply {
    field: SimulatedField,
    faults: FaultPlan,
    setpoints: Vec<f64>,
}

impl MockMagnetSupply {
    /// Supply driving `field`.
    pub fn new(field: SimulatedField) -> Self {
        Self {
            field,
            faults: FaultPlan::none(),
            setpoints: Vec::new(),
        }
    }

    /// Attach a fault plan.
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Setpoints commanded so far.
    pub fn setpoints(&self) -> &[f64] {
        &self.setpoints
    }
}

impl SetpointDriver for MockMagnetSupply {
    fn quantity(&self) -> &str {
        FIELD_COLUMN
    }

    fn apply_setpoint(&mut self, value: f64) -> AppResult<()> {
        self.faults.check("MockMagnetSupply")?;
        self.field.set(value);
        self.setpoints.push(value);
        Ok(())
    }
}

// =============================================================================
// MockGaussProbe
// =============================================================================

/// Field probe reading the simulated field with uniform noise.
pub struct MockGaussProbe {
    field: SimulatedField,
    delay: Duration,
    noise: f64,
    rng: StdRng,
    faults: FaultPlan,
}

impl MockGaussProbe {
    /// Probe of `field` updating every `delay`.
    pub fn new(field: SimulatedField, delay: Duration) -> Self {
        Self {
            field,
            delay,
            noise: 0.0,
            rng: StdRng::seed_from_u64(0x6a55),
            faults: FaultPlan::none(),
        }
    }

    /// Add uniform noise of +/- `amplitude` tesla.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Attach a fault plan.
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

impl FieldProbe for MockGaussProbe {
    fn measurement_delay(&self) -> Duration {
        self.delay
    }

    fn measure_field(&mut self) -> AppResult<f64> {
        self.faults.check("MockGaussProbe")?;
        let noise = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..self.noise)
        } else {
            0.0
        };
        Ok(self.field.get() + noise)
    }
}

// =============================================================================
// MockVna
// =============================================================================

/// CW-mode network analyzer.
///
/// An acquisition completes `averaging_time` after the trigger. The returned
/// transmission has a Lorentzian dip around `resonance_field` when a
/// simulated field is attached.
pub struct MockVna {
    averaging_time: Duration,
    triggered_at: Option<Instant>,
    field: Option<SimulatedField>,
    resonance_field: f64,
    linewidth: f64,
    faults: FaultPlan,
    triggers: u64,
}

impl MockVna {
    /// Analyzer completing each acquisition after `averaging_time`.
    pub fn new(averaging_time: Duration) -> Self {
        Self {
            averaging_time,
            triggered_at: None,
            field: None,
            resonance_field: 0.1,
            linewidth: 0.005,
            faults: FaultPlan::none(),
            triggers: 0,
        }
    }

    /// Couple the transmission to a simulated field.
    pub fn with_field(mut self, field: SimulatedField) -> Self {
        self.field = Some(field);
        self
    }

    /// Attach a fault plan.
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Number of triggers issued.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    fn transmission(&self) -> f64 {
        match &self.field {
            Some(field) => {
                let detuning = (field.get() - self.resonance_field) / self.linewidth;
                1.0 - 0.5 / (1.0 + detuning * detuning)
            }
            None => 1.0,
        }
    }
}

impl TriggeredAnalyzer for MockVna {
    fn trigger_measurement(&mut self) -> AppResult<()> {
        self.faults.check("MockVna")?;
        self.triggered_at = Some(Instant::now());
        self.triggers += 1;
        Ok(())
    }

    fn measurement_done(&mut self) -> AppResult<bool> {
        Ok(self
            .triggered_at
            .map(|at| at.elapsed() >= self.averaging_time)
            .unwrap_or(false))
    }

    fn fetch(&mut self) -> AppResult<Fields> {
        if self.triggered_at.take().is_none() {
            return Err(DaqError::Instrument(
                "MockVna: fetch without a triggered acquisition".to_string(),
            ));
        }
        let s21 = self.transmission();
        let mut fields = Fields::new();
        fields.insert("S21 real".to_string(), s21);
        fields.insert("S21 imag".to_string(), 0.0);
        Ok(fields)
    }
}

// =============================================================================
// MockSourceMeter
// =============================================================================

/// DC source-meter driving a resistive load.
pub struct MockSourceMeter {
    mode: BiasMode,
    setpoint: f64,
    resistance: f64,
    read_time: Duration,
    faults: FaultPlan,
}

impl MockSourceMeter {
    /// Source-meter regulating `mode` into a load of `resistance` ohm.
    pub fn new(mode: BiasMode, resistance: f64) -> Self {
        Self {
            mode,
            setpoint: 0.0,
            resistance,
            read_time: Duration::ZERO,
            faults: FaultPlan::none(),
        }
    }

    /// Simulated time a readout takes.
    pub fn with_read_time(mut self, read_time: Duration) -> Self {
        self.read_time = read_time;
        self
    }

    /// Attach a fault plan.
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Regulated quantity.
    pub fn mode(&self) -> BiasMode {
        self.mode
    }
}

impl SourceMeter for MockSourceMeter {
    fn measure(&mut self) -> AppResult<SourceMeterReading> {
        self.faults.check("MockSourceMeter")?;
        if !self.read_time.is_zero() {
            thread::sleep(self.read_time);
        }
        Ok(match self.mode {
            BiasMode::Voltage => SourceMeterReading {
                voltage: self.setpoint,
                current: self.setpoint / self.resistance,
            },
            BiasMode::Current => SourceMeterReading {
                voltage: self.setpoint * self.resistance,
                current: self.setpoint,
            },
        })
    }
}

impl SetpointDriver for MockSourceMeter {
    fn quantity(&self) -> &str {
        self.mode.column()
    }

    fn apply_setpoint(&mut self, value: f64) -> AppResult<()> {
        self.faults.check("MockSourceMeter")?;
        self.setpoint = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_plan_timeouts_are_periodic() {
        let mut plan = FaultPlan::timeout_every(3);
        assert!(plan.check("x").is_ok());
        assert!(plan.check("x").is_ok());
        assert!(matches!(plan.check("x"), Err(DaqError::Timeout(_))));
        assert!(plan.check("x").is_ok());
        assert_eq!(plan.calls(), 4);
    }

    #[test]
    fn test_fault_plan_fails_after_limit() {
        let mut plan = FaultPlan::fail_after(1);
        assert!(plan.check("x").is_ok());
        assert!(matches!(plan.check("x"), Err(DaqError::Instrument(_))));
    }

    #[test]
    fn test_supply_drives_probe_through_shared_field() {
        let field = SimulatedField::new(0.0);
        let mut supply = MockMagnetSupply::new(field.clone());
        let mut probe = MockGaussProbe::new(field, Duration::from_millis(1));

        supply.apply_setpoint(0.25).unwrap();
        assert_eq!(probe.measure_field().unwrap(), 0.25);
        assert_eq!(supply.setpoints(), &[0.25]);
    }

    #[test]
    fn test_probe_noise_is_bounded() {
        let mut probe =
            MockGaussProbe::new(SimulatedField::new(1.0), Duration::from_millis(1)).with_noise(0.01);
        for _ in 0..100 {
            let value = probe.measure_field().unwrap();
            assert!((value - 1.0).abs() <= 0.01);
        }
    }

    #[test]
    fn test_vna_completes_after_averaging_time() {
        let mut vna = MockVna::new(Duration::from_millis(10));
        assert!(!vna.measurement_done().unwrap());
        vna.trigger_measurement().unwrap();
        assert!(!vna.measurement_done().unwrap());
        thread::sleep(Duration::from_millis(15));
        assert!(vna.measurement_done().unwrap());
        let data = vna.fetch().unwrap();
        assert!(data.contains_key("S21 real"));
        assert!(vna.fetch().is_err());
    }

    #[test]
    fn test_vna_dip_at_resonance() {
        let field = SimulatedField::new(0.1);
        let mut vna = MockVna::new(Duration::ZERO).with_field(field.clone());
        vna.trigger_measurement().unwrap();
        let on_resonance = vna.fetch().unwrap()["S21 real"];
        field.set(0.3);
        vna.trigger_measurement().unwrap();
        let off_resonance = vna.fetch().unwrap()["S21 real"];
        assert!(on_resonance < off_resonance);
    }

    #[test]
    fn test_source_meter_ohmic_load() {
        let mut meter = MockSourceMeter::new(BiasMode::Voltage, 100.0);
        meter.apply_setpoint(5.0).unwrap();
        let reading = meter.measure().unwrap();
        assert_eq!(reading.voltage, 5.0);
        assert!((reading.current - 0.05).abs() < 1e-12);
        assert!((reading.resistance() - 100.0).abs() < 1e-9);
    }
}
