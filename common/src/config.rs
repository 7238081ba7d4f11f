use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensor::RetryPolicy;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("hysteresis band is empty: low {low_c} °C must be below high {high_c} °C")]
    EmptyBand { low_c: f32, high_c: f32 },
    #[error("threshold {value} °C is outside the supported range ({min} to {max} °C)")]
    ThresholdOutOfRange { value: f32, min: f32, max: f32 },
}

const MIN_THRESHOLD_C: f32 = -30.0;
const MAX_THRESHOLD_C: f32 = 25.0;

/// Cabin thresholds. The band between `low_c` and `high_c` is the
/// hysteresis dead-zone; it must have positive width or the thermostat
/// chatters every tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThermostatSettings {
    pub low_c: f32,
    pub high_c: f32,
}

impl Default for ThermostatSettings {
    fn default() -> Self {
        Self {
            low_c: 2.0,
            high_c: 5.0,
        }
    }
}

impl ThermostatSettings {
    pub fn sanitize(&mut self) {
        self.low_c = self.low_c.clamp(MIN_THRESHOLD_C, MAX_THRESHOLD_C - 1.0);
        self.high_c = self.high_c.clamp(MIN_THRESHOLD_C, MAX_THRESHOLD_C);
        if self.high_c <= self.low_c {
            self.high_c = self.low_c + 1.0;
        }
    }

    /// Strict check for externally supplied updates; `sanitize` repairs,
    /// this rejects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in [self.low_c, self.high_c] {
            if !value.is_finite() || !(MIN_THRESHOLD_C..=MAX_THRESHOLD_C).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange {
                    value,
                    min: MIN_THRESHOLD_C,
                    max: MAX_THRESHOLD_C,
                });
            }
        }
        if self.high_c <= self.low_c {
            return Err(ConfigError::EmptyBand {
                low_c: self.low_c,
                high_c: self.high_c,
            });
        }
        Ok(())
    }
}

/// Compressor protection parameters. Short-cycling damages the motor, so
/// both dwell times are mandatory; the start-inhibit threshold must sit
/// below the emergency ceiling to leave a safety margin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressorConfig {
    pub min_on_ms: u64,
    pub min_off_ms: u64,
    pub cooldown_ms: u64,
    pub max_compressor_temp_c: f32,
    pub max_compressor_start_temp_c: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            min_on_ms: 120_000,
            min_off_ms: 300_000,
            cooldown_ms: 600_000,
            max_compressor_temp_c: 60.0,
            max_compressor_start_temp_c: 45.0,
        }
    }
}

impl CompressorConfig {
    pub fn sanitize(&mut self) {
        self.max_compressor_temp_c = self.max_compressor_temp_c.clamp(30.0, 90.0);
        if self.max_compressor_start_temp_c >= self.max_compressor_temp_c {
            self.max_compressor_start_temp_c = self.max_compressor_temp_c - 5.0;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelayConfig {
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval_ms: 1_000,
        }
    }
}

impl RelayConfig {
    pub fn sanitize(&mut self) {
        if self.confirm_attempts == 0 {
            self.confirm_attempts = 1;
        }
        self.confirm_interval_ms = self.confirm_interval_ms.clamp(100, 10_000);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlConfig {
    pub tick_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub state_publish_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
            sensor_stale_timeout_ms: 30_000,
            state_publish_interval_ms: 10_000,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(1_000, 60_000);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.clamp(5_000, 600_000);
        // Zero would panic tokio's interval timer.
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 600_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// I2C addresses of the discrete sensors, in publish order.
    pub addresses: Vec<u8>,
    /// Index of the sensor clamped to the compressor housing.
    pub compressor_sensor: usize,
    pub retry: RetryPolicy,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            addresses: vec![0x48, 0x49, 0x4a, 0x4b],
            compressor_sensor: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl SensorConfig {
    pub fn sanitize(&mut self) {
        if self.addresses.is_empty() {
            self.addresses = Self::default().addresses;
        }
        if self.compressor_sensor >= self.addresses.len() {
            self.compressor_sensor = self.addresses.len() - 1;
        }
        self.retry.sanitize();
    }

    /// Cabin sensors are every discrete sensor except the compressor one.
    pub fn cabin_sensor_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.addresses.len()).filter(move |i| *i != self.compressor_sensor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "home.local".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatSettings,
    #[serde(default)]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        self.compressor.sanitize();
        self.relay.sanitize();
        self.control.sanitize();
        self.sensors.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sanitize_repairs_empty_band() {
        let mut settings = ThermostatSettings {
            low_c: 4.0,
            high_c: 4.0,
        };
        settings.sanitize();
        assert!(settings.high_c > settings.low_c);
    }

    #[test]
    fn validate_rejects_inverted_band() {
        let settings = ThermostatSettings {
            low_c: 5.0,
            high_c: 2.0,
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::EmptyBand {
                low_c: 5.0,
                high_c: 2.0
            })
        );
    }

    #[test]
    fn validate_rejects_non_finite_threshold() {
        let settings = ThermostatSettings {
            low_c: f32::NAN,
            high_c: 2.0,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn sanitize_repairs_zero_control_intervals() {
        let mut control = ControlConfig {
            tick_interval_ms: 0,
            sensor_stale_timeout_ms: 0,
            state_publish_interval_ms: 0,
        };
        control.sanitize();
        assert!(control.tick_interval_ms > 0);
        assert!(control.sensor_stale_timeout_ms > 0);
        assert!(control.state_publish_interval_ms > 0);
    }

    #[test]
    fn sanitize_keeps_start_inhibit_below_emergency_ceiling() {
        let mut config = CompressorConfig {
            max_compressor_start_temp_c: 60.0,
            max_compressor_temp_c: 60.0,
            ..CompressorConfig::default()
        };
        config.sanitize();
        assert!(config.max_compressor_start_temp_c < config.max_compressor_temp_c);
    }

    #[test]
    fn sanitize_clamps_compressor_sensor_index() {
        let mut sensors = SensorConfig {
            addresses: vec![0x48, 0x49],
            compressor_sensor: 5,
            ..SensorConfig::default()
        };
        sensors.sanitize();
        assert_eq!(sensors.compressor_sensor, 1);
        assert_eq!(sensors.cabin_sensor_indices().collect::<Vec<_>>(), vec![0]);
    }
}
