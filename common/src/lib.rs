pub mod command;
pub mod config;
pub mod control;
pub mod measurement;
pub mod store;
pub mod topics;
pub mod types;

pub use command::{Command, CommandError};
pub use config::{BlinkPattern, IndicatorAction, NodeConfig, SensorLimits};
pub use control::{RelayController, RelayDecision};
pub use measurement::{Measurement, MeasurementSlot, Reading};
pub use store::{MemoryBackend, ParameterBackend, ParameterStore, StoreError, Update};
pub use topics::{CommandKind, TopicNames, TopicSet};
pub use types::{DeviceId, DeviceIdError, Mode, Parameters, RelayState, TelemetryPayload};
