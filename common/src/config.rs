use serde::{Deserialize, Serialize};

use crate::{
    topics::TopicNames,
    types::{Parameters, RelayState},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sample_interval_ms: u64,
    pub control_interval_ms: u64,
    pub subscribe_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1_000,
            control_interval_ms: 1_000,
            subscribe_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub command_qos: u8,
    pub telemetry_qos: u8,
    pub keep_alive_secs: u64,
    pub request_capacity: usize,
    pub inbound_queue_len: usize,
    pub max_payload_bytes: usize,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_qos: 1,
            telemetry_qos: 0,
            keep_alive_secs: 30,
            request_capacity: 32,
            inbound_queue_len: 16,
            max_payload_bytes: 512,
            reconnect_delay_ms: 2_000,
            connect_timeout_ms: 30_000,
        }
    }
}

/// Valid range of the fitted sensor. Defaults match a DHT11.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorLimits {
    pub min_temp_c: f32,
    pub max_temp_c: f32,
}

impl Default for SensorLimits {
    fn default() -> Self {
        Self {
            min_temp_c: 0.0,
            max_temp_c: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorAction {
    On,
    Off,
    Delay(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkPattern {
    pub pulses: u8,
    pub on_ms: u64,
    pub off_ms: u64,
}

impl Default for BlinkPattern {
    fn default() -> Self {
        Self {
            pulses: 2,
            on_ms: 200,
            off_ms: 200,
        }
    }
}

impl BlinkPattern {
    pub fn actions(&self) -> Vec<IndicatorAction> {
        let mut actions = Vec::with_capacity(usize::from(self.pulses) * 4);
        for _ in 0..self.pulses {
            actions.push(IndicatorAction::On);
            actions.push(IndicatorAction::Delay(self.on_ms));
            actions.push(IndicatorAction::Off);
            actions.push(IndicatorAction::Delay(self.off_ms));
        }
        actions
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id_prefix: "thermonode".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub timing: TimingConfig,
    pub link: LinkConfig,
    pub topics: TopicNames,
    pub sensor: SensorLimits,
    pub blink: BlinkPattern,
    pub network: NetworkConfig,
    /// Document written when the persisted parameters are missing or corrupt.
    pub defaults: Parameters,
    pub http_port: Option<u16>,
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        self.timing.sanitize();
        self.link.sanitize();
        self.topics.sanitize();
        self.sensor.sanitize();
        self.blink.sanitize();

        if self.defaults.validate().is_err() {
            self.defaults = Parameters::default();
        }
        self.defaults.relay = RelayState::Off;

        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
        if self.network.client_id_prefix.trim().is_empty() {
            self.network.client_id_prefix = NetworkConfig::default().client_id_prefix;
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.sample_interval_ms = self.sample_interval_ms.clamp(100, 3_600_000);
        // Relay decisions never run faster than the data they depend on.
        self.control_interval_ms = self
            .control_interval_ms
            .clamp(self.sample_interval_ms, 3_600_000);
        self.subscribe_delay_ms = self.subscribe_delay_ms.min(10_000);
    }
}

impl LinkConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.command_qos > 2 {
            self.command_qos = defaults.command_qos;
        }
        if self.telemetry_qos > 2 {
            self.telemetry_qos = defaults.telemetry_qos;
        }
        self.keep_alive_secs = self.keep_alive_secs.clamp(5, 3_600);
        self.request_capacity = self.request_capacity.clamp(8, 1_024);
        self.inbound_queue_len = self.inbound_queue_len.clamp(1, 1_024);
        self.max_payload_bytes = self.max_payload_bytes.clamp(16, 65_536);
        self.reconnect_delay_ms = self.reconnect_delay_ms.clamp(100, 60_000);
    }
}

impl SensorLimits {
    pub fn sanitize(&mut self) {
        if !self.min_temp_c.is_finite()
            || !self.max_temp_c.is_finite()
            || self.min_temp_c >= self.max_temp_c
        {
            *self = Self::default();
        }
    }
}

impl BlinkPattern {
    pub fn sanitize(&mut self) {
        self.pulses = self.pulses.clamp(1, 10);
        self.on_ms = self.on_ms.clamp(10, 5_000);
        self.off_ms = self.off_ms.clamp(10, 5_000);
    }
}
