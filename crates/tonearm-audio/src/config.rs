//! Playback engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tonearm_core::{Error, Result, SampleFormat, StreamFormat};

/// Tunables for the pump and the output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Interval between pump cycles in milliseconds.
    pub pump_interval_ms: u64,
    /// Audio kept queued ahead of the device in milliseconds.
    pub target_latency_ms: u64,
    /// Ring buffer size in milliseconds of device audio.
    pub ring_capacity_ms: u64,
    /// Source format the stream is bound to before the first track opens.
    pub initial_format: StreamFormat,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pump_interval_ms: 20,
            target_latency_ms: 250,
            ring_capacity_ms: 1000,
            initial_format: StreamFormat::new(44100, 2, SampleFormat::S16),
        }
    }
}

impl PlayerConfig {
    pub const fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    pub const fn target_latency(&self) -> Duration {
        Duration::from_millis(self.target_latency_ms)
    }

    pub const fn ring_capacity(&self) -> Duration {
        Duration::from_millis(self.ring_capacity_ms)
    }

    /// Reject settings the pump cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.pump_interval_ms == 0 {
            return Err(Error::InvalidArgument(
                "pump_interval_ms must be positive".into(),
            ));
        }
        if self.pump_interval_ms >= self.target_latency_ms {
            return Err(Error::InvalidArgument(format!(
                "pump interval {}ms must be shorter than target latency {}ms",
                self.pump_interval_ms, self.target_latency_ms
            )));
        }
        // One write can add up to a full target on top of what is queued
        if self.ring_capacity_ms < self.target_latency_ms * 2 {
            return Err(Error::InvalidArgument(format!(
                "ring capacity {}ms must hold twice the target latency",
                self.ring_capacity_ms
            )));
        }
        if !self.initial_format.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "invalid initial format {}",
                self.initial_format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_latency(), Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_slow_pump() {
        let config = PlayerConfig {
            pump_interval_ms: 300,
            ..PlayerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_small_ring() {
        let config = PlayerConfig {
            ring_capacity_ms: 300,
            ..PlayerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
