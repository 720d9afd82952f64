use std::{sync::Arc, time::Duration};

use anyhow::bail;
use thermonode_common::{
    BlinkPattern, Command, CommandError, CommandKind, IndicatorAction, ParameterStore, RelayState,
    TopicSet,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    hardware::{Indicator, RelayHandle},
    link::InboundMessage,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Applied { command: Command, changed: bool },
    /// Relay command received outside manual mode.
    Suppressed(Command),
    Rejected { kind: CommandKind, error: CommandError },
    /// Valid command whose side effect could not be carried out.
    Failed(Command),
    Blinked,
    UnknownTopic,
}

/// Applies inbound commands one at a time, in arrival order.
pub struct CommandProcessor {
    store: Arc<ParameterStore>,
    relay: RelayHandle,
    indicator: Box<dyn Indicator>,
    topics: TopicSet,
    blink: BlinkPattern,
    max_payload_bytes: usize,
}

impl CommandProcessor {
    pub fn new(
        store: Arc<ParameterStore>,
        relay: RelayHandle,
        indicator: Box<dyn Indicator>,
        topics: TopicSet,
        blink: BlinkPattern,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            store,
            relay,
            indicator,
            topics,
            blink,
            max_payload_bytes,
        }
    }

    pub async fn handle(&mut self, message: &InboundMessage) -> CommandOutcome {
        let Some(kind) = self.topics.resolve(&message.topic) else {
            warn!("unknown topic {}, ignoring", message.topic);
            return CommandOutcome::UnknownTopic;
        };
        if message.retained {
            debug!("{} carries a retained payload", message.topic);
        }

        let command = match Command::decode(kind, &message.payload, self.max_payload_bytes) {
            Ok(command) => command,
            Err(error) => {
                warn!("rejected {} command on {}: {error}", kind.as_str(), message.topic);
                return CommandOutcome::Rejected { kind, error };
            }
        };

        match command {
            Command::Blink => {
                self.blink().await;
                CommandOutcome::Blinked
            }
            Command::SetRelay(target) => self.set_relay(command, target),
            _ => self.update_parameters(command),
        }
    }

    fn set_relay(&self, command: Command, target: RelayState) -> CommandOutcome {
        let mut suppressed = false;
        let result = self.relay.apply_with(&self.store, |params| {
            if !command.permitted_in(params.mode) {
                suppressed = true;
                return None;
            }
            (params.relay != target).then_some(target)
        });

        match result {
            Ok(_) if suppressed => {
                info!("relay command {target} ignored in automatic mode");
                CommandOutcome::Suppressed(command)
            }
            Ok(update) => {
                if update.is_some() {
                    info!("manual relay -> {target}");
                }
                CommandOutcome::Applied {
                    command,
                    changed: update.is_some(),
                }
            }
            Err(err) => {
                warn!("relay command {target} failed: {err}");
                CommandOutcome::Failed(command)
            }
        }
    }

    fn update_parameters(&self, command: Command) -> CommandOutcome {
        match self.store.update(|params| command.apply(params)) {
            Ok(update) => {
                if update.changed {
                    info!("{} updated: {command:?}", command.kind().as_str());
                }
                CommandOutcome::Applied {
                    command,
                    changed: update.changed,
                }
            }
            Err(err) => {
                warn!("{} command rejected by store: {err}", command.kind().as_str());
                CommandOutcome::Failed(command)
            }
        }
    }

    async fn blink(&mut self) {
        for action in self.blink.actions() {
            let result = match action {
                IndicatorAction::On => self.indicator.set(true),
                IndicatorAction::Off => self.indicator.set(false),
                IndicatorAction::Delay(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    continue;
                }
            };
            if let Err(err) = result {
                warn!("blink aborted: {err}");
                return;
            }
        }
    }

    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) -> anyhow::Result<()> {
        while let Some(message) = inbound.recv().await {
            self.handle(&message).await;
        }
        bail!("inbound message queue closed")
    }
}
