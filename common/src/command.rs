use thiserror::Error;

use crate::{
    topics::CommandKind,
    types::{Mode, Parameters, RelayState},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetSetpoint(f64),
    SetPeriod(u32),
    SetMode(Mode),
    SetRelay(RelayState),
    Blink,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("setpoint must be finite, got `{0}`")]
    NotFinite(String),
    #[error("period must be between 1 and {max} seconds, got {0}", max = u32::MAX)]
    PeriodOutOfRange(i64),
    #[error("unknown mode `{0}`, expected auto/manual or 0/1")]
    UnknownMode(String),
    #[error("relay value must be 0 or 1, got `{0}`")]
    InvalidRelay(String),
}

impl Command {
    /// Checks the raw payload before parsing it against the grammar of `kind`.
    pub fn decode(kind: CommandKind, payload: &[u8], limit: usize) -> Result<Self, CommandError> {
        if payload.len() > limit {
            return Err(CommandError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }
        let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        Self::parse(kind, text)
    }

    pub fn parse(kind: CommandKind, payload: &str) -> Result<Self, CommandError> {
        let value = payload.trim();
        match kind {
            CommandKind::Setpoint => {
                let setpoint = value
                    .parse::<f64>()
                    .map_err(|_| CommandError::NotANumber(value.to_string()))?;
                if !setpoint.is_finite() {
                    return Err(CommandError::NotFinite(value.to_string()));
                }
                Ok(Self::SetSetpoint(setpoint))
            }
            CommandKind::Period => {
                let period = value
                    .parse::<i64>()
                    .map_err(|_| CommandError::NotANumber(value.to_string()))?;
                if period < 1 {
                    return Err(CommandError::PeriodOutOfRange(period));
                }
                let period =
                    u32::try_from(period).map_err(|_| CommandError::PeriodOutOfRange(period))?;
                Ok(Self::SetPeriod(period))
            }
            CommandKind::Mode => Mode::from_token(value)
                .map(Self::SetMode)
                .ok_or_else(|| CommandError::UnknownMode(value.to_string())),
            CommandKind::Relay => match value.parse::<u8>() {
                Ok(0) => Ok(Self::SetRelay(RelayState::Off)),
                Ok(1) => Ok(Self::SetRelay(RelayState::On)),
                _ => Err(CommandError::InvalidRelay(value.to_string())),
            },
            CommandKind::Blink => Ok(Self::Blink),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetSetpoint(_) => CommandKind::Setpoint,
            Self::SetPeriod(_) => CommandKind::Period,
            Self::SetMode(_) => CommandKind::Mode,
            Self::SetRelay(_) => CommandKind::Relay,
            Self::Blink => CommandKind::Blink,
        }
    }

    /// Relay commands only take effect while the node is in manual mode.
    pub fn permitted_in(&self, mode: Mode) -> bool {
        match self {
            Self::SetRelay(_) => mode == Mode::Manual,
            _ => true,
        }
    }

    /// Writes the command's field into `params`. Blink carries no state.
    pub fn apply(&self, params: &mut Parameters) {
        match *self {
            Self::SetSetpoint(setpoint) => params.setpoint = setpoint,
            Self::SetPeriod(period) => params.period = period,
            Self::SetMode(mode) => params.mode = mode,
            Self::SetRelay(relay) => params.relay = relay,
            Self::Blink => {}
        }
    }
}
