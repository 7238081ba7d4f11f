pub const TOPIC_SENSOR_STATUS: &str = "fridge/sensor/status";
pub const TOPIC_SENSOR_TEMP_PREFIX: &str = "fridge/sensor/temperature";

pub const TOPIC_RELAY_COMMAND: &str = "fridge/relay/cmnd/power";
pub const TOPIC_RELAY_STATE: &str = "fridge/relay/stat/power";
pub const TOPIC_RELAY_KEEPALIVE: &str = "fridge/relay/cmnd/keepalive";

pub const TOPIC_CONTROLLER_STATE: &str = "fridge/controller/state";

pub const TOPIC_CMD_THRESHOLDS: &str = "fridge/cmnd/thermostat/thresholds";

pub fn sensor_temp_topic(index: usize) -> String {
    format!("{TOPIC_SENSOR_TEMP_PREFIX}/{index}")
}

pub fn parse_sensor_temp_topic(topic: &str) -> Option<usize> {
    topic
        .strip_prefix(TOPIC_SENSOR_TEMP_PREFIX)?
        .strip_prefix('/')?
        .parse()
        .ok()
}
