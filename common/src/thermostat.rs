//! Hysteresis decision logic, decoupled from relay mechanics.
//!
//! The thermostat evaluates an ordered list of guard bands. Demanding ON
//! requires every guard's on-condition to pass; OFF is demanded as soon
//! as any guard's off-condition holds. A single cabin guard gives the
//! classic two-threshold thermostat; extra guards veto cooling on
//! auxiliary inputs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::ThermostatSettings, types::RelayState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardBand {
    pub label: String,
    pub low_c: f32,
    pub high_c: f32,
}

impl GuardBand {
    pub fn new(label: impl Into<String>, low_c: f32, high_c: f32) -> Self {
        Self {
            label: label.into(),
            low_c,
            high_c,
        }
    }

    fn allows_on(&self, celsius: f32) -> bool {
        celsius > self.high_c
    }

    fn demands_off(&self, celsius: f32) -> bool {
        celsius < self.low_c
    }
}

#[derive(Debug, Clone)]
pub struct Thermostat {
    guards: Vec<GuardBand>,
    /// The thermostat's own belief of the last accepted actuation, not
    /// the relay-confirmed state. Vetoed demands leave it untouched so
    /// they are re-issued on later ticks.
    is_active: bool,
}

impl Thermostat {
    /// The initial reading establishes a definite starting state instead
    /// of "unknown": active when the primary guard already demands
    /// cooling.
    pub fn new(guards: Vec<GuardBand>, initial_reading_c: f32) -> Self {
        let is_active = guards
            .first()
            .map(|guard| guard.allows_on(initial_reading_c))
            .unwrap_or(false);
        Self { guards, is_active }
    }

    pub fn from_settings(settings: &ThermostatSettings, initial_reading_c: f32) -> Self {
        Self::new(
            vec![GuardBand::new("cabin", settings.low_c, settings.high_c)],
            initial_reading_c,
        )
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn guards(&self) -> &[GuardBand] {
        &self.guards
    }

    /// Applies an updated cabin band to the primary guard.
    pub fn update_primary_band(&mut self, settings: &ThermostatSettings) {
        if let Some(primary) = self.guards.first_mut() {
            primary.low_c = settings.low_c;
            primary.high_c = settings.high_c;
        }
    }

    /// Hysteresis transition rule. Returns the demanded actuation, or
    /// `None` inside the dead-band and for idempotent demands. Readings
    /// pair with guards by position; a guard without a reading neither
    /// passes its on-condition nor demands off.
    pub fn evaluate(&self, readings: &[f32]) -> Option<RelayState> {
        if self.guards.is_empty() {
            return None;
        }
        if readings.len() < self.guards.len() {
            debug!(
                have = readings.len(),
                want = self.guards.len(),
                "guard readings incomplete, holding state"
            );
        }

        if self.is_active {
            let off_demanded = self
                .guards
                .iter()
                .zip(readings)
                .any(|(guard, &t)| guard.demands_off(t));
            if off_demanded {
                return Some(RelayState::Off);
            }
        } else {
            let all_allow_on = readings.len() >= self.guards.len()
                && self
                    .guards
                    .iter()
                    .zip(readings)
                    .all(|(guard, &t)| guard.allows_on(t));
            if all_allow_on {
                return Some(RelayState::On);
            }
        }

        None
    }

    /// Called by the compressor controller when an actuation was accepted
    /// (interlocks passed and a relay command was issued).
    pub fn note_actuation(&mut self, state: RelayState) {
        match state {
            RelayState::On => self.is_active = true,
            RelayState::Off => self.is_active = false,
            RelayState::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cabin_stat(low: f32, high: f32, initial: f32) -> Thermostat {
        Thermostat::from_settings(&ThermostatSettings { low_c: low, high_c: high }, initial)
    }

    #[test]
    fn initial_state_is_definite() {
        assert!(cabin_stat(-5.0, 2.0, 3.0).is_active());
        assert!(!cabin_stat(-5.0, 2.0, 1.0).is_active());
    }

    #[test]
    fn spec_scenario_band_minus5_to_2() {
        // Sequence 3.0, 1.0, -6.0 starting inactive.
        let mut stat = cabin_stat(-5.0, 2.0, 0.0);
        assert!(!stat.is_active());

        assert_eq!(stat.evaluate(&[3.0]), Some(RelayState::On));
        stat.note_actuation(RelayState::On);

        // Inside the dead-band: no change.
        assert_eq!(stat.evaluate(&[1.0]), None);

        assert_eq!(stat.evaluate(&[-6.0]), Some(RelayState::Off));
        stat.note_actuation(RelayState::Off);
        assert!(!stat.is_active());
    }

    #[test]
    fn demands_are_idempotent() {
        let mut stat = cabin_stat(-5.0, 2.0, 0.0);
        stat.note_actuation(RelayState::On);

        // Already active: a hot reading demands nothing new.
        assert_eq!(stat.evaluate(&[10.0]), None);

        stat.note_actuation(RelayState::Off);
        assert_eq!(stat.evaluate(&[-10.0]), None);
    }

    #[test]
    fn vetoed_demand_is_reissued() {
        let stat = cabin_stat(-5.0, 2.0, 0.0);
        // The controller vetoed, so note_actuation was never called; the
        // same demand comes back on the next tick.
        assert_eq!(stat.evaluate(&[3.0]), Some(RelayState::On));
        assert_eq!(stat.evaluate(&[3.0]), Some(RelayState::On));
    }

    #[test]
    fn secondary_guard_vetoes_on() {
        let guards = vec![
            GuardBand::new("cabin", -5.0, 2.0),
            GuardBand::new("wet-bulb", 1.0, 4.0),
        ];
        let stat = Thermostat::new(guards, 0.0);

        // Cabin demands cooling but the wet sensor does not allow it.
        assert_eq!(stat.evaluate(&[3.0, 3.5]), None);
        // Both pass.
        assert_eq!(stat.evaluate(&[3.0, 4.5]), Some(RelayState::On));
    }

    #[test]
    fn any_guard_can_demand_off() {
        let guards = vec![
            GuardBand::new("cabin", -5.0, 2.0),
            GuardBand::new("wet-bulb", 1.0, 4.0),
        ];
        let mut stat = Thermostat::new(guards, 0.0);
        stat.note_actuation(RelayState::On);

        // Cabin is fine, wet sensor dropped below its floor.
        assert_eq!(stat.evaluate(&[0.0, 0.5]), Some(RelayState::Off));
    }

    #[test]
    fn missing_guard_reading_holds_state() {
        let guards = vec![
            GuardBand::new("cabin", -5.0, 2.0),
            GuardBand::new("wet-bulb", 1.0, 4.0),
        ];
        let stat = Thermostat::new(guards, 0.0);
        assert_eq!(stat.evaluate(&[3.0]), None);
    }

    #[test]
    fn updated_band_takes_effect() {
        let mut stat = cabin_stat(2.0, 5.0, 3.0);
        stat.update_primary_band(&ThermostatSettings { low_c: -5.0, high_c: 2.0 });
        assert_eq!(stat.guards()[0].high_c, 2.0);
    }
}
