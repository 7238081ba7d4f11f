use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use fridge_common::{
    round2, sensor_temp_topic, RetryPolicy, SensorConfig, SensorError, TemperatureSource,
    TOPIC_SENSOR_STATUS,
};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "home.local".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("fridge-sensor", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let config = sensor_config_from_env();
    let mut sources: Vec<SimulatedTmp117> = config
        .addresses
        .iter()
        .enumerate()
        .map(|(index, &address)| SimulatedTmp117::new(index, address))
        .collect();

    info!(sensors = sources.len(), "sensor publisher started");

    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
    loop {
        interval.tick().await;

        for (index, source) in sources.iter_mut().enumerate() {
            match read_with_retry(source, config.retry).await {
                Ok(celsius) => {
                    let (topic, payload, retain) = reading_publication(index, celsius);
                    if let Err(err) = mqtt
                        .publish(topic, QoS::AtLeastOnce, retain, payload)
                        .await
                    {
                        warn!(sensor = index, "temperature publish failed: {err}");
                    }
                }
                // Retry budget exhausted; this reading is skipped for the
                // cycle and the next interval tries again.
                Err(err) => warn!("sensor read abandoned: {err}"),
            }
        }
    }
}

/// Readings go out non-retained: a retained sample from a dead sensor
/// would be replayed on controller reconnect and recorded as fresh,
/// defeating the staleness cutoff. Only the status topic is retained.
fn reading_publication(index: usize, celsius: f32) -> (String, String, bool) {
    (
        sensor_temp_topic(index),
        format!("{:.2}", round2(celsius)),
        false,
    )
}

/// Bounded-retry read: up to `attempts` tries with a pause in between,
/// each failure logged with the sensor identity, the last error surfaced
/// to the caller.
async fn read_with_retry<S: TemperatureSource>(
    source: &mut S,
    policy: RetryPolicy,
) -> Result<f32, SensorError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match source.read() {
            Ok(celsius) => return Ok(celsius),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                warn!(
                    sensor = source.label(),
                    attempt, "sensor read failed, retrying: {err}"
                );
                tokio::time::sleep(Duration::from_millis(policy.pause_ms)).await;
            }
        }
    }
}

fn sensor_config_from_env() -> SensorConfig {
    let mut config = SensorConfig::default();
    if let Ok(raw) = std::env::var("SENSOR_ADDRESSES") {
        let addresses: Vec<u8> = raw
            .split(',')
            .filter_map(|part| {
                let part = part.trim().trim_start_matches("0x");
                u8::from_str_radix(part, 16).ok()
            })
            .collect();
        if !addresses.is_empty() {
            config.addresses = addresses;
        }
    }
    config.sanitize();
    config
}

/// Hardware integration point: replace with the TMP117 driver behind the
/// MCP2221 USB-I2C bridge on the appliance. The simulation keeps the
/// host build runnable against a broker.
struct SimulatedTmp117 {
    label: String,
    tick: u64,
}

impl SimulatedTmp117 {
    fn new(index: usize, address: u8) -> Self {
        Self {
            label: format!("tmp117-{index}@0x{address:02x}"),
            tick: 0,
        }
    }
}

impl TemperatureSource for SimulatedTmp117 {
    fn label(&self) -> &str {
        &self.label
    }

    fn read(&mut self) -> Result<f32, SensorError> {
        self.tick = self.tick.wrapping_add(1);
        Ok(4.0 + ((self.tick % 8) as f32 * 0.1))
    }
}
