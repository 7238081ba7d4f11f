//! Compressor safety interlocks.
//!
//! Short-cycling a compressor damages it, so every actuation the
//! thermostat demands passes through dwell-time and thermal interlocks
//! before a relay command is allowed out. Vetoes are expected throttling
//! events, logged with a reason; only the relay transport produces
//! errors.

use tracing::{info, warn};

use crate::{
    config::CompressorConfig,
    thermostat::Thermostat,
    types::{CompressorState, RelayState},
};

/// Why a start request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartVeto {
    InCooldown,
    CompressorTooHot,
    MinOffNotElapsed,
}

impl StartVeto {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InCooldown => "in cooldown after overheat",
            Self::CompressorTooHot => "compressor above start-inhibit temperature",
            Self::MinOffNotElapsed => "minimum off time not elapsed",
        }
    }
}

/// Why a non-emergency stop request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopVeto {
    MinOnNotElapsed,
}

impl StopVeto {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MinOnNotElapsed => "minimum on time not elapsed",
        }
    }
}

/// Actuation decided by one control tick, to be applied to the relay by
/// the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    TurnOn,
    TurnOff,
    /// Overheat shutdown; bypasses the minimum-on interlock.
    EmergencyOff,
}

impl TickAction {
    pub fn relay_state(self) -> RelayState {
        match self {
            Self::TurnOn => RelayState::On,
            Self::TurnOff | Self::EmergencyOff => RelayState::Off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressorController {
    config: CompressorConfig,
    state: CompressorState,
    cooldown_started_ms: Option<u64>,
    last_on_ms: Option<u64>,
    last_off_ms: Option<u64>,
}

impl CompressorController {
    /// Constructed once at startup; `None` transition timestamps mean "no
    /// transition ever", so dwell interlocks never block the first one.
    pub fn new(config: CompressorConfig) -> Self {
        Self {
            config,
            state: CompressorState::Off,
            cooldown_started_ms: None,
            last_on_ms: None,
            last_off_ms: None,
        }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    pub fn state(&self) -> CompressorState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == CompressorState::On
    }

    pub fn in_cooldown(&self) -> bool {
        self.state == CompressorState::Cooldown
    }

    pub fn cooldown_remaining_ms(&self, now_ms: u64) -> u64 {
        match self.cooldown_started_ms {
            Some(start) => self
                .config
                .cooldown_ms
                .saturating_sub(now_ms.saturating_sub(start)),
            None => 0,
        }
    }

    /// One control tick: overheat check first, then cooldown expiry, then
    /// the thermostat's demand through the start/stop interlocks. The
    /// returned action is what the owner must actuate; relay keepalive
    /// and reconciliation are the owner's business and run regardless.
    pub fn tick(
        &mut self,
        thermostat: &mut Thermostat,
        guard_readings: &[f32],
        compressor_temp_c: Option<f32>,
        now_ms: u64,
    ) -> Option<TickAction> {
        if self.state == CompressorState::On {
            match compressor_temp_c {
                Some(t) if t > self.config.max_compressor_temp_c => {
                    warn!(
                        compressor_temp_c = t,
                        max_c = self.config.max_compressor_temp_c,
                        "compressor overheated, forcing off and entering cooldown"
                    );
                    self.emergency_off(now_ms);
                    thermostat.note_actuation(RelayState::Off);
                    return Some(TickAction::EmergencyOff);
                }
                Some(_) => {}
                None => {
                    warn!("compressor temperature unavailable, overheat check skipped this tick");
                }
            }
        } else if self.state == CompressorState::Cooldown {
            self.complete_cooldown_if_elapsed(now_ms);
        }

        match thermostat.evaluate(guard_readings)? {
            RelayState::On => match self.try_turn_on(compressor_temp_c, now_ms) {
                Ok(()) => {
                    thermostat.note_actuation(RelayState::On);
                    Some(TickAction::TurnOn)
                }
                Err(veto) => {
                    info!(reason = veto.as_str(), "compressor start vetoed");
                    None
                }
            },
            RelayState::Off => match self.try_turn_off(now_ms) {
                Ok(()) => {
                    thermostat.note_actuation(RelayState::Off);
                    Some(TickAction::TurnOff)
                }
                Err(veto) => {
                    info!(reason = veto.as_str(), "compressor stop vetoed");
                    None
                }
            },
            RelayState::Unknown => None,
        }
    }

    /// Off → On, subject to the start interlocks.
    pub fn try_turn_on(
        &mut self,
        compressor_temp_c: Option<f32>,
        now_ms: u64,
    ) -> Result<(), StartVeto> {
        if self.state == CompressorState::Cooldown {
            return Err(StartVeto::InCooldown);
        }
        if let Some(t) = compressor_temp_c {
            if t >= self.config.max_compressor_start_temp_c {
                return Err(StartVeto::CompressorTooHot);
            }
        }
        if let Some(last_off) = self.last_off_ms {
            if now_ms.saturating_sub(last_off) < self.config.min_off_ms {
                return Err(StartVeto::MinOffNotElapsed);
            }
        }

        self.state = CompressorState::On;
        self.last_on_ms = Some(now_ms);
        Ok(())
    }

    /// On → Off, refused until the minimum on time has elapsed.
    pub fn try_turn_off(&mut self, now_ms: u64) -> Result<(), StopVeto> {
        if let Some(last_on) = self.last_on_ms {
            if self.state == CompressorState::On
                && now_ms.saturating_sub(last_on) < self.config.min_on_ms
            {
                return Err(StopVeto::MinOnNotElapsed);
            }
        }

        if self.state == CompressorState::On {
            self.state = CompressorState::Off;
            self.last_off_ms = Some(now_ms);
        }
        Ok(())
    }

    /// Overheat shutdown: forces Off regardless of minimum on time and
    /// enters Cooldown. Never propagated as a failure.
    pub fn emergency_off(&mut self, now_ms: u64) {
        self.state = CompressorState::Cooldown;
        self.cooldown_started_ms = Some(now_ms);
        self.last_off_ms = Some(now_ms);
    }

    fn complete_cooldown_if_elapsed(&mut self, now_ms: u64) {
        if self.cooldown_remaining_ms(now_ms) == 0 {
            info!("cooldown complete");
            self.cooldown_started_ms = None;
            self.state = CompressorState::Off;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ThermostatSettings;

    fn test_config() -> CompressorConfig {
        CompressorConfig {
            min_on_ms: 120_000,
            min_off_ms: 300_000,
            cooldown_ms: 600_000,
            max_compressor_temp_c: 60.0,
            max_compressor_start_temp_c: 45.0,
        }
    }

    fn cabin_stat(initial: f32) -> Thermostat {
        Thermostat::from_settings(
            &ThermostatSettings {
                low_c: -5.0,
                high_c: 2.0,
            },
            initial,
        )
    }

    #[test]
    fn first_start_is_never_dwell_blocked() {
        let mut ctrl = CompressorController::new(test_config());
        assert_eq!(ctrl.try_turn_on(Some(20.0), 0), Ok(()));
        assert!(ctrl.is_on());
    }

    #[test]
    fn early_stop_is_refused() {
        let mut ctrl = CompressorController::new(test_config());
        ctrl.try_turn_on(Some(20.0), 0).unwrap();

        assert_eq!(ctrl.try_turn_off(60_000), Err(StopVeto::MinOnNotElapsed));
        assert!(ctrl.is_on());

        assert_eq!(ctrl.try_turn_off(120_000), Ok(()));
        assert!(!ctrl.is_on());
    }

    #[test]
    fn early_restart_is_refused() {
        let mut ctrl = CompressorController::new(test_config());
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        ctrl.try_turn_off(120_000).unwrap();

        assert_eq!(
            ctrl.try_turn_on(Some(20.0), 300_000),
            Err(StartVeto::MinOffNotElapsed)
        );
        assert_eq!(ctrl.try_turn_on(Some(20.0), 420_000), Ok(()));
    }

    #[test]
    fn hot_compressor_inhibits_start() {
        let mut ctrl = CompressorController::new(test_config());
        assert_eq!(
            ctrl.try_turn_on(Some(45.0), 0),
            Err(StartVeto::CompressorTooHot)
        );
        assert_eq!(ctrl.try_turn_on(Some(44.9), 0), Ok(()));
    }

    #[test]
    fn emergency_off_bypasses_min_on_and_enters_cooldown() {
        let mut ctrl = CompressorController::new(test_config());
        let mut stat = cabin_stat(3.0);
        ctrl.try_turn_on(Some(20.0), 0).unwrap();

        // 61 °C one second after start, well inside the min-on window.
        let action = ctrl.tick(&mut stat, &[0.0], Some(61.0), 1_000);
        assert_eq!(action, Some(TickAction::EmergencyOff));
        assert_eq!(ctrl.state(), CompressorState::Cooldown);
        assert!(ctrl.in_cooldown());
        assert!(!stat.is_active());
    }

    #[test]
    fn cooldown_refuses_start_until_expiry() {
        let mut ctrl = CompressorController::new(test_config());
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        ctrl.emergency_off(1_000);

        // 1 s later: refused even though the thermostat would demand ON.
        assert_eq!(
            ctrl.try_turn_on(Some(20.0), 2_000),
            Err(StartVeto::InCooldown)
        );

        // A tick after the cooldown window clears it, then a qualifying
        // tick starts the compressor.
        let mut stat = cabin_stat(0.0);
        let after_cooldown = 1_000 + 600_000;
        let action = ctrl.tick(&mut stat, &[3.0], Some(20.0), after_cooldown);
        assert_eq!(ctrl.state(), CompressorState::On);
        assert_eq!(action, Some(TickAction::TurnOn));
    }

    #[test]
    fn cooldown_start_refusal_leaves_thermostat_demand_pending() {
        let mut ctrl = CompressorController::new(test_config());
        let mut stat = cabin_stat(0.0);
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        stat.note_actuation(RelayState::On);

        ctrl.tick(&mut stat, &[3.0], Some(61.0), 1_000);
        assert!(ctrl.in_cooldown());

        // Cabin still warm: demand vetoed, thermostat stays inactive and
        // keeps demanding on subsequent ticks.
        assert_eq!(ctrl.tick(&mut stat, &[3.0], Some(40.0), 2_000), None);
        assert!(!stat.is_active());
        assert_eq!(ctrl.tick(&mut stat, &[3.0], Some(40.0), 3_000), None);
    }

    #[test]
    fn tick_follows_spec_scenario() {
        // low=-5, high=2, sequence 3.0 / 1.0 / -6.0 starting off.
        let config = CompressorConfig {
            min_on_ms: 0,
            min_off_ms: 0,
            ..test_config()
        };
        let mut ctrl = CompressorController::new(config);
        let mut stat = cabin_stat(0.0);

        assert_eq!(
            ctrl.tick(&mut stat, &[3.0], Some(20.0), 1_000),
            Some(TickAction::TurnOn)
        );
        assert_eq!(ctrl.tick(&mut stat, &[1.0], Some(20.0), 2_000), None);
        assert_eq!(
            ctrl.tick(&mut stat, &[-6.0], Some(20.0), 3_000),
            Some(TickAction::TurnOff)
        );
    }

    #[test]
    fn missing_compressor_temp_skips_overheat_check_only() {
        let config = CompressorConfig {
            min_on_ms: 0,
            ..test_config()
        };
        let mut ctrl = CompressorController::new(config);
        let mut stat = cabin_stat(3.0);
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        stat.note_actuation(RelayState::On);

        // No compressor reading this tick: the thermostat path still runs.
        let action = ctrl.tick(&mut stat, &[-6.0], None, 1_000);
        assert_eq!(action, Some(TickAction::TurnOff));
    }

    #[test]
    fn overheat_exactly_at_max_is_not_emergency() {
        let mut ctrl = CompressorController::new(test_config());
        let mut stat = cabin_stat(3.0);
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        stat.note_actuation(RelayState::On);

        assert_eq!(ctrl.tick(&mut stat, &[0.0], Some(60.0), 1_000), None);
        assert!(ctrl.is_on());
    }

    #[test]
    fn cooldown_remaining_counts_down() {
        let mut ctrl = CompressorController::new(test_config());
        ctrl.try_turn_on(Some(20.0), 0).unwrap();
        ctrl.emergency_off(10_000);

        assert_eq!(ctrl.cooldown_remaining_ms(10_000), 600_000);
        assert_eq!(ctrl.cooldown_remaining_ms(310_000), 300_000);
        assert_eq!(ctrl.cooldown_remaining_ms(700_000), 0);
    }
}
