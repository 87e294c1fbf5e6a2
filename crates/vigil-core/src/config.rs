// ── Runtime engine configuration ──
//
// These types describe how the engine runs: task cadences, worker
// counts and oscillation tunables. They never touch disk; the daemon
// builds an `EngineConfig` from its config file and hands it in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Flapping thresholds for alarm oscillation detection.
///
/// Process-wide; may be swapped at runtime through
/// [`OscillationDetector::set_config`](crate::oscillation::OscillationDetector::set_config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscillationConfig {
    /// State changes needed inside `time_range` to count as oscillating.
    pub osc_numbers: u32,
    /// Window the `osc_numbers` changes must fit in.
    pub time_range: Duration,
    /// How long after its last change an oscillating alarm is still shown
    /// as oscillating.
    pub time_oscillation_alive: Duration,
}

impl Default for OscillationConfig {
    fn default() -> Self {
        Self {
            osc_numbers: 6,
            time_range: Duration::from_secs(60),
            time_oscillation_alive: Duration::from_secs(180),
        }
    }
}

impl OscillationConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.osc_numbers < 2 {
            return Err(config_error("osc_numbers must be at least 2"));
        }
        if self.time_range.is_zero() {
            return Err(config_error("time_range must be positive"));
        }
        Ok(())
    }
}

/// Defaults for buffered listeners registered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub capacity: usize,
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cadence of the alive-timer expiry sweep.
    pub sweep_interval: Duration,
    /// Cadence of the oscillation-expired check.
    pub oscillation_check_interval: Duration,
    /// Number of sharded ingest workers.
    pub ingest_workers: usize,
    /// Per-worker inbound queue depth.
    pub ingest_queue_capacity: usize,
    /// Capacity of the supervision event broadcast channel.
    pub event_channel_capacity: usize,
    pub oscillation: OscillationConfig,
    pub buffer: BufferConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            oscillation_check_interval: Duration::from_secs(10),
            ingest_workers: 4,
            ingest_queue_capacity: 1024,
            event_channel_capacity: 256,
            oscillation: OscillationConfig::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.sweep_interval.is_zero() {
            return Err(config_error("sweep_interval must be positive"));
        }
        if self.oscillation_check_interval.is_zero() {
            return Err(config_error("oscillation_check_interval must be positive"));
        }
        if self.ingest_workers == 0 {
            return Err(config_error("ingest_workers must be at least 1"));
        }
        if self.ingest_queue_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(config_error("channel capacities must be positive"));
        }
        if self.buffer.capacity == 0 || self.buffer.flush_interval.is_zero() {
            return Err(config_error("buffer capacity and flush interval must be positive"));
        }
        self.oscillation.validate()
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        let osc = OscillationConfig::default();
        assert_eq!(osc.osc_numbers, 6);
        assert_eq!(osc.time_range, Duration::from_secs(60));
        assert_eq!(osc.time_oscillation_alive, Duration::from_secs(180));
    }

    #[test]
    fn zero_workers_rejected() {
        let config = EngineConfig {
            ingest_workers: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn degenerate_oscillation_rejected() {
        let config = EngineConfig {
            oscillation: OscillationConfig {
                osc_numbers: 1,
                ..OscillationConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
