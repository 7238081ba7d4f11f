//! Latest-reading bookkeeping for the MQTT-fed temperature sensors.
//!
//! The control loop only ever acts on fresh data: a reading older than
//! the staleness cutoff is treated the same as a missing one, and that
//! part of the tick is abandoned while the previous relay state persists.

use std::collections::HashMap;

use fridge_common::TemperatureReading;

#[derive(Debug, Default)]
pub struct ReadingsBoard {
    latest: HashMap<usize, TemperatureReading>,
}

impl ReadingsBoard {
    pub fn record(&mut self, sensor: usize, celsius: f32, now_ms: u64) {
        self.latest.insert(
            sensor,
            TemperatureReading {
                sensor,
                celsius,
                at_ms: now_ms,
            },
        );
    }

    pub fn fresh(&self, sensor: usize, now_ms: u64, stale_after_ms: u64) -> Option<f32> {
        self.latest
            .get(&sensor)
            .filter(|reading| now_ms.saturating_sub(reading.at_ms) < stale_after_ms)
            .map(|reading| reading.celsius)
    }

    /// Mean of the fresh readings among `sensors`; `None` when all of
    /// them are stale or missing.
    pub fn fresh_mean(&self, sensors: &[usize], now_ms: u64, stale_after_ms: u64) -> Option<f32> {
        let fresh: Vec<f32> = sensors
            .iter()
            .filter_map(|&sensor| self.fresh(sensor, now_ms, stale_after_ms))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        Some(fresh.iter().sum::<f32>() / fresh.len() as f32)
    }

    pub fn snapshot(&self, sensors: &[usize], now_ms: u64, stale_after_ms: u64) -> Vec<Option<f32>> {
        sensors
            .iter()
            .map(|&sensor| self.fresh(sensor, now_ms, stale_after_ms))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn stale_reading_is_missing() {
        let mut board = ReadingsBoard::default();
        board.record(0, 4.5, 1_000);

        assert_eq!(board.fresh(0, 2_000, 30_000), Some(4.5));
        assert_eq!(board.fresh(0, 31_001, 30_000), None);
        assert_eq!(board.fresh(1, 2_000, 30_000), None);
    }

    #[test]
    fn mean_skips_stale_sensors() {
        let mut board = ReadingsBoard::default();
        board.record(0, 4.0, 10_000);
        board.record(1, 6.0, 10_000);
        board.record(2, 100.0, 0);

        // Sensor 2 went stale; the mean covers the fresh pair only.
        assert_eq!(board.fresh_mean(&[0, 1, 2], 12_000, 10_000), Some(5.0));
    }

    #[test]
    fn mean_of_nothing_is_none() {
        let board = ReadingsBoard::default();
        assert_eq!(board.fresh_mean(&[0, 1], 1_000, 30_000), None);
    }
}
