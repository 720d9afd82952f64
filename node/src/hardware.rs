use std::sync::{Arc, Mutex, PoisonError};

use thermonode_common::{ParameterStore, Parameters, Reading, RelayState, StoreError, Update};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("sensor read failed: {0}")]
    Sensor(String),
    #[error("relay write failed: {0}")]
    Relay(String),
    #[error("indicator write failed: {0}")]
    Indicator(String),
}

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Temperature/humidity source. Reads may block briefly.
pub trait SensorDriver: Send {
    fn read(&mut self) -> Result<Reading, HardwareError>;
}

pub trait RelayDriver: Send {
    fn set(&mut self, state: RelayState) -> Result<(), HardwareError>;
}

/// Visual feedback output, usually an LED.
pub trait Indicator: Send {
    fn set(&mut self, on: bool) -> Result<(), HardwareError>;
}

/// Shared access to the relay. Every write goes through
/// [`RelayHandle::apply_with`], which holds the driver lock across the
/// decision, the physical write and the parameter update, so the stored
/// `relay` value always matches the last state actually applied.
#[derive(Clone)]
pub struct RelayHandle {
    driver: Arc<Mutex<Box<dyn RelayDriver>>>,
}

impl RelayHandle {
    pub fn new(driver: Box<dyn RelayDriver>) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
        }
    }

    /// `decide` sees the parameters as of the moment the lock is taken and
    /// returns the state to apply, or `None` to leave the relay alone.
    pub fn apply_with<F>(
        &self,
        store: &ParameterStore,
        decide: F,
    ) -> Result<Option<Update>, ActuationError>
    where
        F: FnOnce(&Parameters) -> Option<RelayState>,
    {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(target) = decide(&store.snapshot()) else {
            return Ok(None);
        };
        driver.set(target)?;
        let update = store.update(|params| params.relay = target)?;
        Ok(Some(update))
    }

    /// Drives the relay off regardless of mode, retrying the write a few times.
    pub fn force_off(&self, store: &ParameterStore) -> Result<(), ActuationError> {
        const ATTEMPTS: usize = 3;

        let mut attempt = 1;
        loop {
            match self.apply_with(store, |_| Some(RelayState::Off)) {
                Ok(_) => return Ok(()),
                Err(ActuationError::Hardware(err)) if attempt < ATTEMPTS => {
                    debug!("relay off attempt {attempt}/{ATTEMPTS} failed: {err}");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Deterministic sweep around the default setpoint, for hosts without a sensor.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    tick: u64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorDriver for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, HardwareError> {
        self.tick = self.tick.wrapping_add(1);
        Ok(Reading {
            temperature_c: 22.0 + (self.tick % 12) as f32 * 0.5,
            humidity: 45.0 + (self.tick % 6) as f32 * 0.5,
        })
    }
}

#[derive(Debug, Default)]
pub struct LoggingRelay {
    state: Option<RelayState>,
}

impl RelayDriver for LoggingRelay {
    fn set(&mut self, state: RelayState) -> Result<(), HardwareError> {
        if self.state != Some(state) {
            info!("relay output -> {state}");
            self.state = Some(state);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingIndicator;

impl Indicator for LoggingIndicator {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        debug!("indicator {}", if on { "on" } else { "off" });
        Ok(())
    }
}
