use serde::{Deserialize, Serialize};

use crate::types::{is_topic_segment, DeviceId};

pub const SUFFIX_SETPOINT: &str = "setpoint";
pub const SUFFIX_PERIOD: &str = "period";
pub const SUFFIX_MODE: &str = "mode";
pub const SUFFIX_RELAY: &str = "relay";
pub const SUFFIX_BLINK: &str = "blink";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Setpoint,
    Period,
    Mode,
    Relay,
    Blink,
}

impl CommandKind {
    /// Subscription order.
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Setpoint,
        CommandKind::Period,
        CommandKind::Mode,
        CommandKind::Relay,
        CommandKind::Blink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setpoint => SUFFIX_SETPOINT,
            Self::Period => SUFFIX_PERIOD,
            Self::Mode => SUFFIX_MODE,
            Self::Relay => SUFFIX_RELAY,
            Self::Blink => SUFFIX_BLINK,
        }
    }
}

/// Topic suffix per command. ASCII only: some brokers and client stacks drop
/// the connection on non-ASCII topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub setpoint: String,
    pub period: String,
    pub mode: String,
    pub relay: String,
    pub blink: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            setpoint: SUFFIX_SETPOINT.to_string(),
            period: SUFFIX_PERIOD.to_string(),
            mode: SUFFIX_MODE.to_string(),
            relay: SUFFIX_RELAY.to_string(),
            blink: SUFFIX_BLINK.to_string(),
        }
    }
}

impl TopicNames {
    pub fn suffix(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Setpoint => &self.setpoint,
            CommandKind::Period => &self.period,
            CommandKind::Mode => &self.mode,
            CommandKind::Relay => &self.relay,
            CommandKind::Blink => &self.blink,
        }
    }

    fn suffix_mut(&mut self, kind: CommandKind) -> &mut String {
        match kind {
            CommandKind::Setpoint => &mut self.setpoint,
            CommandKind::Period => &mut self.period,
            CommandKind::Mode => &mut self.mode,
            CommandKind::Relay => &mut self.relay,
            CommandKind::Blink => &mut self.blink,
        }
    }

    pub fn sanitize(&mut self) {
        for kind in CommandKind::ALL {
            let suffix = self.suffix_mut(kind);
            if !is_topic_segment(suffix) {
                *suffix = kind.as_str().to_string();
            }
        }

        let mut seen: Vec<&str> = Vec::with_capacity(CommandKind::ALL.len());
        let mut duplicated = false;
        for kind in CommandKind::ALL {
            let suffix = self.suffix(kind);
            duplicated |= seen.contains(&suffix);
            seen.push(suffix);
        }
        if duplicated {
            *self = Self::default();
        }
    }
}

/// Every topic of one device, rooted at its id.
#[derive(Debug, Clone)]
pub struct TopicSet {
    telemetry: String,
    commands: Vec<(CommandKind, String)>,
}

impl TopicSet {
    pub fn new(device_id: &DeviceId, names: &TopicNames) -> Self {
        let commands = CommandKind::ALL
            .iter()
            .map(|&kind| (kind, format!("{}/{}", device_id, names.suffix(kind))))
            .collect();
        Self {
            telemetry: device_id.as_str().to_string(),
            commands,
        }
    }

    pub fn telemetry(&self) -> &str {
        &self.telemetry
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|(_, topic)| topic.as_str())
    }

    pub fn resolve(&self, topic: &str) -> Option<CommandKind> {
        self.commands
            .iter()
            .find(|(_, candidate)| candidate == topic)
            .map(|(kind, _)| *kind)
    }
}
