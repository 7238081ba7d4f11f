use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fridge_common::{
    round2, CompressorController, ControllerStatePayload, RelayState, RuntimeConfig, Thermostat,
    ThermostatSettings, TickAction, TOPIC_CMD_THRESHOLDS, TOPIC_CONTROLLER_STATE,
    TOPIC_RELAY_STATE, TOPIC_SENSOR_TEMP_PREFIX,
};

use crate::{readings::ReadingsBoard, relay::RelayHandle, store::ConfigStore};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const MIN_PLAUSIBLE_TEMP_C: f32 = -40.0;
const MAX_PLAUSIBLE_TEMP_C: f32 = 85.0;

#[derive(Clone)]
struct AppState {
    relay: RelayHandle,
    readings: Arc<Mutex<ReadingsBoard>>,
    control: Arc<Mutex<ControlState>>,
    mqtt: AsyncClient,
    store: ConfigStore,
    config: Arc<RuntimeConfig>,
}

struct ControlState {
    settings: ThermostatSettings,
    /// Built lazily from the first fresh cabin reading so the initial
    /// state is definite rather than guessed before any data exists.
    thermostat: Option<Thermostat>,
    compressor: CompressorController,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("fridge-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let relay = RelayHandle::new(mqtt.clone(), runtime.relay);
    let state = AppState {
        relay,
        readings: Arc::new(Mutex::new(ReadingsBoard::default())),
        control: Arc::new(Mutex::new(ControlState {
            settings: runtime.thermostat,
            thermostat: None,
            compressor: CompressorController::new(runtime.compressor),
        })),
        mqtt: mqtt.clone(),
        store,
        config: Arc::new(runtime),
    };

    subscribe_topics(&state.mqtt).await?;
    spawn_mqtt_loop(state.clone(), eventloop);
    spawn_control_loop(state.clone());
    spawn_state_publish_loop(state.clone());

    info!("fridge controller running");
    wait_for_shutdown().await;
    teardown(&state).await;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_RELAY_STATE, TOPIC_CMD_THRESHOLDS] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    mqtt.subscribe(format!("{TOPIC_SENSOR_TEMP_PREFIX}/+"), QoS::AtMostOnce)
        .await?;
    Ok(())
}

fn spawn_mqtt_loop(state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&state, message.topic, message.payload.to_vec()).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(state.config.control.tick_interval_ms));
        loop {
            interval.tick().await;
            run_control_tick(&state).await;
        }
    });
}

async fn run_control_tick(state: &AppState) {
    let now_ms = monotonic_ms();
    let stale_after_ms = state.config.control.sensor_stale_timeout_ms;
    let cabin_indices: Vec<usize> = state.config.sensors.cabin_sensor_indices().collect();

    let (cabin_mean, compressor_temp) = {
        let board = state.readings.lock().await;
        (
            board.fresh_mean(&cabin_indices, now_ms, stale_after_ms),
            board.fresh(state.config.sensors.compressor_sensor, now_ms, stale_after_ms),
        )
    };

    let action = {
        let mut control = state.control.lock().await;
        let ControlState {
            settings,
            thermostat,
            compressor,
        } = &mut *control;

        match thermostat {
            Some(stat) => match cabin_mean {
                Some(mean_c) => compressor.tick(stat, &[mean_c], compressor_temp, now_ms),
                None => {
                    warn!("cabin readings stale, skipping thermostat evaluation");
                    // Overheat and cooldown handling stay live even
                    // without cabin data.
                    compressor.tick(stat, &[], compressor_temp, now_ms)
                }
            },
            slot @ None => match cabin_mean {
                Some(primary_c) => initialize_thermostat(
                    settings,
                    slot,
                    compressor,
                    primary_c,
                    compressor_temp,
                    now_ms,
                ),
                None => {
                    debug!("no fresh cabin reading yet, thermostat not initialized");
                    None
                }
            },
        }
    };

    if let Some(action) = action {
        if let Err(err) = state.relay.request(action.relay_state(), now_ms).await {
            error!("relay actuation failed: {err}");
        }
    }

    // Decoupled from the thermostat decision: these run every tick.
    state.relay.keepalive().await;
    if let Err(err) = state.relay.reconcile(now_ms).await {
        error!("relay reconcile failed: {err}");
    }
}

fn initialize_thermostat(
    settings: &ThermostatSettings,
    slot: &mut Option<Thermostat>,
    compressor: &mut CompressorController,
    primary_c: f32,
    compressor_temp_c: Option<f32>,
    now_ms: u64,
) -> Option<TickAction> {
    let mut stat = Thermostat::from_settings(settings, primary_c);

    let action = if stat.is_active() {
        match compressor.try_turn_on(compressor_temp_c, now_ms) {
            Ok(()) => Some(TickAction::TurnOn),
            Err(veto) => {
                info!(reason = veto.as_str(), "initial compressor start vetoed");
                // Stay inactive so the demand is re-issued once the veto
                // clears.
                stat.note_actuation(RelayState::Off);
                None
            }
        }
    } else {
        // Establish a definite relay state instead of leaving it unknown.
        Some(TickAction::TurnOff)
    };

    info!(
        cabin_c = primary_c,
        active = stat.is_active(),
        "thermostat initialized"
    );
    *slot = Some(stat);
    action
}

fn spawn_state_publish_loop(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(
            state.config.control.state_publish_interval_ms,
        ));
        loop {
            interval.tick().await;

            let payload = build_state_payload(&state).await;
            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    if let Err(err) = state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn build_state_payload(state: &AppState) -> ControllerStatePayload {
    let now_ms = monotonic_ms();
    let stale_after_ms = state.config.control.sensor_stale_timeout_ms;
    let cabin_indices: Vec<usize> = state.config.sensors.cabin_sensor_indices().collect();

    let (cabin_temps, compressor_temp) = {
        let board = state.readings.lock().await;
        let cabin = board
            .snapshot(&cabin_indices, now_ms, stale_after_ms)
            .into_iter()
            .flatten()
            .map(round2)
            .collect();
        let compressor = board
            .fresh(state.config.sensors.compressor_sensor, now_ms, stale_after_ms)
            .map(round2);
        (cabin, compressor)
    };

    let (thermostat_active, compressor_state, in_cooldown, cooldown_remaining_ms) = {
        let control = state.control.lock().await;
        (
            control
                .thermostat
                .as_ref()
                .map(Thermostat::is_active)
                .unwrap_or(false),
            control.compressor.state(),
            control.compressor.in_cooldown(),
            control.compressor.cooldown_remaining_ms(now_ms),
        )
    };

    ControllerStatePayload {
        cabin_temps,
        compressor_temp,
        relay: state.relay.confirmed_state().await.as_str(),
        compressor: compressor_state.as_str(),
        thermostat_active,
        in_cooldown,
        cooldown_remaining_ms,
        epoch: Utc::now().timestamp(),
    }
}

async fn handle_mqtt_message(
    state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let now_ms = monotonic_ms();

    if topic == TOPIC_RELAY_STATE {
        match RelayState::from_payload(&message) {
            Some(new_state) => {
                state.relay.on_state_change(new_state, now_ms).await;
            }
            None => warn!("unparseable relay state payload: {message:?}"),
        }
        return Ok(());
    }

    if let Some(index) = fridge_common::parse_sensor_temp_topic(&topic) {
        if let Ok(celsius) = message.parse::<f32>() {
            if celsius.is_finite()
                && (MIN_PLAUSIBLE_TEMP_C..=MAX_PLAUSIBLE_TEMP_C).contains(&celsius)
            {
                state.readings.lock().await.record(index, celsius, now_ms);
            } else {
                warn!(sensor = index, "discarding implausible reading: {celsius}");
            }
        }
        return Ok(());
    }

    if topic == TOPIC_CMD_THRESHOLDS {
        apply_threshold_update(state, &message).await?;
    }

    Ok(())
}

async fn apply_threshold_update(state: &AppState, message: &str) -> anyhow::Result<()> {
    let update: ThermostatSettings = match serde_json::from_str(message) {
        Ok(update) => update,
        Err(err) => {
            warn!("unparseable thresholds payload: {err}");
            return Ok(());
        }
    };
    if let Err(err) = update.validate() {
        warn!("rejected thresholds update: {err}");
        return Ok(());
    }

    {
        let mut control = state.control.lock().await;
        control.settings = update;
        if let Some(stat) = control.thermostat.as_mut() {
            stat.update_primary_band(&update);
        }
    }
    info!(
        low_c = update.low_c,
        high_c = update.high_c,
        "thermostat thresholds updated"
    );

    let mut runtime = state.store.load().await?;
    runtime.thermostat = update;
    state.store.save(&runtime).await
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        Err(err) => {
            warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn teardown(state: &AppState) {
    info!("shutting down, requesting compressor off");
    if let Err(err) = state.relay.request(RelayState::Off, monotonic_ms()).await {
        warn!("best-effort off on shutdown not confirmed: {err}");
    }
    if let Err(err) = state.mqtt.disconnect().await {
        warn!("mqtt disconnect failed: {err}");
    }
}

pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
