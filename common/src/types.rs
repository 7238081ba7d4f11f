use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    Unknown,
    On,
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    /// Parses a relay state payload as published by smart-plug firmware
    /// (`ON`/`OFF` case-insensitive, `1`/`0` accepted).
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Some(Self::On),
            "OFF" | "0" => Some(Self::Off),
            _ => None,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressorState {
    Off,
    On,
    Cooldown,
}

impl CompressorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Cooldown => "COOLDOWN",
        }
    }
}

/// One sensor sample, produced per control tick. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReading {
    pub sensor: usize,
    pub celsius: f32,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatePayload {
    #[serde(rename = "cabinTemps")]
    pub cabin_temps: Vec<f32>,
    #[serde(rename = "compressorTemp")]
    pub compressor_temp: Option<f32>,
    pub relay: &'static str,
    pub compressor: &'static str,
    #[serde(rename = "thermostatActive")]
    pub thermostat_active: bool,
    #[serde(rename = "inCooldown")]
    pub in_cooldown: bool,
    #[serde(rename = "cooldownRemainingMs")]
    pub cooldown_remaining_ms: u64,
    pub epoch: i64,
}
