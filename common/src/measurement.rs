use std::sync::{PoisonError, RwLock};

use crate::config::SensorLimits;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity: f32,
}

impl Reading {
    pub fn is_plausible(&self, limits: &SensorLimits) -> bool {
        self.temperature_c.is_finite()
            && self.humidity.is_finite()
            && (limits.min_temp_c..=limits.max_temp_c).contains(&self.temperature_c)
            && (0.0..=100.0).contains(&self.humidity)
    }
}

/// Latest sensor result. `Pending` until the first sample completes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Measurement {
    #[default]
    Pending,
    Failed,
    Valid(Reading),
}

impl Measurement {
    pub fn reading(self) -> Option<Reading> {
        match self {
            Self::Valid(reading) => Some(reading),
            Self::Pending | Self::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Valid(_) => "valid",
        }
    }
}

/// Single-writer, multi-reader slot. Values are replaced whole, so a reader
/// never sees temperature and humidity from different samples.
#[derive(Debug, Default)]
pub struct MeasurementSlot {
    current: RwLock<Measurement>,
}

impl MeasurementSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Measurement {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace(&self, measurement: Measurement) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = measurement;
    }
}
