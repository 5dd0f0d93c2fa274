//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/spinwave.toml` (base configuration)
//! 2. Environment variables (prefixed with `SPINWAVE_`, sections split on `__`)
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use spinwave_daq::config::DaqConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Queue capacity: {}", config.engine.queue_capacity);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/spinwave.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Fusion engine and orchestration settings
    pub engine: EngineConfig,
    /// Polling intervals for the passive producers
    pub pollers: PollerConfig,
    /// Driven trajectory settings
    pub sweep: SweepConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Spin-wave DAQ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Fusion engine and orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each producer's output queue
    pub queue_capacity: usize,
    /// Sleep at the end of every engine iteration
    #[serde(with = "humantime_serde")]
    pub yield_interval: Duration,
    /// Sleep between predicate polls in the owning procedure
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound for joining each worker thread at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Name of the time column in fused rows
    pub time_column: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            yield_interval: Duration::from_millis(1),
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            time_column: "Timestamp (s)".to_string(),
        }
    }
}

/// Polling configuration for the passive producers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Minimum spacing between two field-probe reads
    #[serde(with = "humantime_serde")]
    pub field_probe_delay: Duration,
    /// Interval at which the VNA's "measurement done" condition is polled
    #[serde(with = "humantime_serde")]
    pub vna_delay: Duration,
    /// Free-running interval of the source-meter poller
    #[serde(with = "humantime_serde")]
    pub source_meter_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            field_probe_delay: Duration::from_millis(400),
            vna_delay: Duration::from_millis(1),
            source_meter_delay: Duration::from_millis(1),
        }
    }
}

/// Driven trajectory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Time between two consecutive setpoints
    #[serde(with = "humantime_serde")]
    pub update_delay: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            update_delay: Duration::from_millis(100),
        }
    }
}

impl DaqConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// Environment variables can override configuration with prefix `SPINWAVE_`.
    /// Example: `SPINWAVE_ENGINE__QUEUE_CAPACITY=4096`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPINWAVE_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.engine.queue_capacity == 0 {
            return Err(DaqError::Configuration(
                "engine.queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.engine.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "engine.poll_interval must be positive".to_string(),
            ));
        }

        if self.engine.shutdown_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "engine.shutdown_timeout must be positive".to_string(),
            ));
        }

        if self.engine.time_column.trim().is_empty() {
            return Err(DaqError::Configuration(
                "engine.time_column must not be empty".to_string(),
            ));
        }

        if self.sweep.update_delay.is_zero() {
            return Err(DaqError::Configuration(
                "sweep.update_delay must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.time_column, "Timestamp (s)");
        assert_eq!(config.engine.yield_interval, Duration::from_millis(1));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [application]
            log_level = "debug"

            [engine]
            queue_capacity = 16
            shutdown_timeout = "2s"

            [pollers]
            field_probe_delay = "100ms"
            "#
        )
        .unwrap();

        let config = DaqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.engine.queue_capacity, 16);
        assert_eq!(config.engine.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.pollers.field_probe_delay, Duration::from_millis(100));
        // Untouched sections keep their defaults
        assert_eq!(config.pollers.vna_delay, Duration::from_millis(1));
        assert_eq!(config.sweep.update_delay, Duration::from_millis(100));
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        let config = DaqConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.engine.queue_capacity, 1024);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let mut config = DaqConfig::default();
        config.engine.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_time_column_rejected() {
        let mut config = DaqConfig::default();
        config.engine.time_column = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
