use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("sensor {label} is not responding on the bus")]
    NotResponding { label: String },
    #[error("i2c transfer failed for sensor {label}: {detail}")]
    Bus { label: String, detail: String },
    #[error("sensor {label} returned an implausible reading: {celsius} °C")]
    OutOfRange { label: String, celsius: f32 },
}

/// A retryable Celsius source. Implementations do one raw read attempt;
/// the retry budget lives with the caller.
pub trait TemperatureSource {
    fn label(&self) -> &str;
    fn read(&mut self) -> Result<f32, SensorError>;
}

/// Bounded retry budget for sensor reads. Every retry loop in the system
/// has a fixed cap; nothing retries indefinitely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn sanitize(&mut self) {
        if self.attempts == 0 {
            self.attempts = 1;
        }
    }
}

/// Rounding for the publish/report boundary only; internal comparisons
/// keep full precision.
pub fn round2(celsius: f32) -> f32 {
    (celsius * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn round2_is_reporting_precision() {
        assert_eq!(round2(3.14159), 3.14);
        // -5.005 is not exactly representable; the nearest f32 sits just
        // past the half-way point and rounds away from zero.
        assert_eq!(round2(-5.005), -5.01);
        assert_eq!(round2(20.0), 20.0);
    }

    #[test]
    fn sanitize_forbids_zero_attempts() {
        let mut policy = RetryPolicy {
            attempts: 0,
            pause_ms: 500,
        };
        policy.sanitize();
        assert_eq!(policy.attempts, 1);
    }
}
