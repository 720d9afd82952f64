use std::{sync::Arc, time::Duration};

use thermonode_common::{Measurement, MeasurementSlot, SensorLimits};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::hardware::{HardwareError, SensorDriver};

pub struct SensorSampler {
    sensor: Box<dyn SensorDriver>,
    slot: Arc<MeasurementSlot>,
    limits: SensorLimits,
    interval: Duration,
    consecutive_failures: u32,
}

impl SensorSampler {
    pub fn new(
        sensor: Box<dyn SensorDriver>,
        slot: Arc<MeasurementSlot>,
        limits: SensorLimits,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            slot,
            limits,
            interval,
            consecutive_failures: 0,
        }
    }

    /// Takes one reading and publishes it. Failures and implausible readings
    /// mark the measurement failed rather than leaving a stale value behind.
    pub fn sample_once(&mut self) -> Measurement {
        let result = self.sensor.read().and_then(|reading| {
            if reading.is_plausible(&self.limits) {
                Ok(reading)
            } else {
                Err(HardwareError::Sensor(format!(
                    "implausible reading {:.1}C / {:.1}%",
                    reading.temperature_c, reading.humidity
                )))
            }
        });

        let measurement = match result {
            Ok(reading) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "sensor recovered after {} failed samples",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                Measurement::Valid(reading)
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures == 1 {
                    warn!("sensor sample failed: {err}");
                } else {
                    debug!(
                        "sensor sample failed ({} in a row): {err}",
                        self.consecutive_failures
                    );
                }
                Measurement::Failed
            }
        };

        self.slot.replace(measurement);
        measurement
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.sample_once();
        }
    }
}
