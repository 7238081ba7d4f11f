pub mod compressor;
pub mod config;
pub mod relay;
pub mod sensor;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use compressor::{CompressorController, StartVeto, StopVeto, TickAction};
pub use config::{
    CompressorConfig, ConfigError, ControlConfig, NetworkConfig, RelayConfig, RuntimeConfig,
    SensorConfig, ThermostatSettings,
};
pub use relay::{RelayError, RelayLink, RequestOutcome, StateChange};
pub use sensor::{round2, RetryPolicy, SensorError, TemperatureSource};
pub use thermostat::{GuardBand, Thermostat};
pub use topics::*;
pub use types::{CompressorState, ControllerStatePayload, RelayState, TemperatureReading};
