use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::measurement::Measurement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ModeRepr")]
pub enum Mode {
    #[default]
    Automatic,
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "auto",
            Self::Manual => "manual",
        }
    }

    /// Accepts both the word and the numeric form used by older deployments.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" | "0" => Some(Self::Automatic),
            "manual" | "1" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Index(u8),
    Token(String),
}

impl TryFrom<ModeRepr> for Mode {
    type Error = String;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        match repr {
            ModeRepr::Index(0) => Ok(Self::Automatic),
            ModeRepr::Index(1) => Ok(Self::Manual),
            ModeRepr::Index(other) => Err(format!("unknown mode index {other}")),
            ModeRepr::Token(token) => {
                Self::from_token(&token).ok_or_else(|| format!("unknown mode `{token}`"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RelayState {
    #[default]
    Off,
    On,
}

impl RelayState {
    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }
}

impl From<RelayState> for u8 {
    fn from(state: RelayState) -> Self {
        match state {
            RelayState::Off => 0,
            RelayState::On => 1,
        }
    }
}

impl TryFrom<u8> for RelayState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(format!("relay state must be 0 or 1, got {other}")),
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating configuration persisted across reboots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub setpoint: f64,
    /// Telemetry period in seconds.
    pub period: u32,
    pub mode: Mode,
    /// Last state actually written to the actuator.
    pub relay: RelayState,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            setpoint: 25.0,
            period: 10,
            mode: Mode::Automatic,
            relay: RelayState::Off,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.setpoint.is_finite() {
            return Err("setpoint must be finite");
        }
        if self.period < 1 {
            return Err("period must be >= 1");
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("device id is empty")]
    Empty,
    #[error("device id `{0}` must be printable ascii without `/`, `+` or `#`")]
    InvalidCharacters(String),
}

/// Root namespace for every topic the node uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(value: impl Into<String>) -> Result<Self, DeviceIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DeviceIdError::Empty);
        }
        if !is_topic_segment(&value) {
            return Err(DeviceIdError::InvalidCharacters(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn is_topic_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '/' | '+' | '#'))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub setpoint: f64,
    pub period: u32,
    pub mode: Mode,
    pub relay: RelayState,
}

impl TelemetryPayload {
    pub fn from_snapshot(params: &Parameters, measurement: Measurement) -> Self {
        let reading = measurement.reading();
        Self {
            temperature: reading.map(|r| r.temperature_c),
            humidity: reading.map(|r| r.humidity),
            setpoint: params.setpoint,
            period: params.period,
            mode: params.mode,
            relay: params.relay,
        }
    }
}
