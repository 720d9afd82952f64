use crate::{
    measurement::Measurement,
    types::{Mode, Parameters, RelayState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Manual mode: the last commanded output stands.
    Manual,
    /// No usable measurement; keep whatever is applied.
    Hold,
    Drive(RelayState),
}

/// Automatic relay control. On above the setpoint, off at or below it, with
/// no hysteresis band.
#[derive(Debug, Clone, Default)]
pub struct RelayController {
    held_ticks: u32,
}

impl RelayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(params: &Parameters, measurement: Measurement) -> RelayDecision {
        if params.mode == Mode::Manual {
            return RelayDecision::Manual;
        }
        match measurement.reading() {
            Some(reading) => {
                let above = f64::from(reading.temperature_c) > params.setpoint;
                RelayDecision::Drive(RelayState::from_bool(above))
            }
            None => RelayDecision::Hold,
        }
    }

    /// Returns the output to write when it differs from the applied one.
    pub fn tick(&mut self, params: &Parameters, measurement: Measurement) -> Option<RelayState> {
        match Self::decide(params, measurement) {
            RelayDecision::Drive(target) => {
                self.held_ticks = 0;
                (target != params.relay).then_some(target)
            }
            RelayDecision::Hold => {
                self.held_ticks = self.held_ticks.saturating_add(1);
                None
            }
            RelayDecision::Manual => {
                self.held_ticks = 0;
                None
            }
        }
    }

    /// Consecutive automatic ticks without a usable measurement.
    pub fn held_ticks(&self) -> u32 {
        self.held_ticks
    }
}
