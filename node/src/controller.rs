use std::{sync::Arc, time::Duration};

use thermonode_common::{MeasurementSlot, ParameterStore, RelayController, RelayState};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::hardware::RelayHandle;

/// Periodic automatic relay control.
pub struct RelayLoop {
    controller: RelayController,
    store: Arc<ParameterStore>,
    slot: Arc<MeasurementSlot>,
    relay: RelayHandle,
    interval: Duration,
}

impl RelayLoop {
    pub fn new(
        store: Arc<ParameterStore>,
        slot: Arc<MeasurementSlot>,
        relay: RelayHandle,
        interval: Duration,
    ) -> Self {
        Self {
            controller: RelayController::new(),
            store,
            slot,
            relay,
            interval,
        }
    }

    /// One control step. Returns the state written to the relay, if any.
    pub fn tick(&mut self) -> Option<RelayState> {
        let measurement = self.slot.get();
        let controller = &mut self.controller;
        let result = self
            .relay
            .apply_with(&self.store, |params| controller.tick(params, measurement));

        if self.controller.held_ticks() == 1 {
            warn!(
                "no valid measurement, holding relay at {}",
                self.store.snapshot().relay
            );
        }

        match result {
            Ok(Some(update)) => {
                info!(
                    "automatic control: relay -> {} (setpoint {:.1})",
                    update.params.relay, update.params.setpoint
                );
                Some(update.params.relay)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("automatic relay update failed: {err}");
                None
            }
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use thermonode_common::{Measurement, MemoryBackend, Mode, Parameters, Reading};

    use super::*;
    use crate::testing::RecordingRelay;

    struct Fixture {
        relay: RecordingRelay,
        slot: Arc<MeasurementSlot>,
        store: Arc<ParameterStore>,
        control: RelayLoop,
    }

    fn fixture(params: Parameters) -> Fixture {
        let relay = RecordingRelay::new();
        let slot = Arc::new(MeasurementSlot::new());
        let store = Arc::new(ParameterStore::load(
            Box::new(MemoryBackend::new()),
            params,
        ));
        let control = RelayLoop::new(
            store.clone(),
            slot.clone(),
            RelayHandle::new(Box::new(relay.clone())),
            Duration::from_secs(1),
        );
        Fixture {
            relay,
            slot,
            store,
            control,
        }
    }

    fn reading(temperature_c: f32) -> Measurement {
        Measurement::Valid(Reading {
            temperature_c,
            humidity: 50.0,
        })
    }

    #[test]
    fn drives_relay_and_records_state() {
        let mut f = fixture(Parameters::default());

        f.slot.replace(reading(26.0));
        assert_eq!(f.control.tick(), Some(RelayState::On));
        assert_eq!(f.store.snapshot().relay, RelayState::On);

        f.slot.replace(reading(24.0));
        assert_eq!(f.control.tick(), Some(RelayState::Off));

        f.slot.replace(reading(25.0));
        assert_eq!(f.control.tick(), None);

        assert_eq!(f.relay.writes(), vec![RelayState::On, RelayState::Off]);
        assert_eq!(f.store.snapshot().relay, RelayState::Off);
    }

    #[test]
    fn holds_relay_through_sensor_outage() {
        let mut f = fixture(Parameters::default());
        f.slot.replace(reading(30.0));
        f.control.tick();

        f.slot.replace(Measurement::Failed);
        for _ in 0..10 {
            assert_eq!(f.control.tick(), None);
            assert_eq!(f.store.snapshot().relay, RelayState::On);
        }
        assert_eq!(f.relay.writes(), vec![RelayState::On]);
    }

    #[test]
    fn pending_measurement_never_drives_relay() {
        let mut f = fixture(Parameters::default());

        assert_eq!(f.control.tick(), None);
        assert!(f.relay.writes().is_empty());
    }

    #[test]
    fn manual_mode_is_left_alone() {
        let mut f = fixture(Parameters {
            mode: Mode::Manual,
            ..Parameters::default()
        });
        f.slot.replace(reading(40.0));

        assert_eq!(f.control.tick(), None);
        assert!(f.relay.writes().is_empty());
    }

    #[test]
    fn switching_to_automatic_applies_on_next_tick() {
        let mut f = fixture(Parameters {
            mode: Mode::Manual,
            ..Parameters::default()
        });
        f.slot.replace(reading(40.0));
        f.control.tick();

        f.store.update(|p| p.mode = Mode::Automatic).unwrap();
        assert!(f.relay.writes().is_empty());

        assert_eq!(f.control.tick(), Some(RelayState::On));
    }

    #[test]
    fn relay_fault_keeps_previous_state_and_retries() {
        let mut f = fixture(Parameters::default());
        f.slot.replace(reading(30.0));
        f.relay.set_failing(true);

        assert_eq!(f.control.tick(), None);
        assert_eq!(f.store.snapshot().relay, RelayState::Off);

        f.relay.set_failing(false);
        assert_eq!(f.control.tick(), Some(RelayState::On));
    }
}
