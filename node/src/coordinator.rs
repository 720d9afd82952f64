use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use thermonode_common::{DeviceId, MeasurementSlot, NodeConfig, ParameterStore, TopicSet};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinSet},
};
use tracing::{error, info, warn};

use crate::{
    commands::CommandProcessor,
    controller::RelayLoop,
    hardware::{ActuationError, Indicator, RelayDriver, RelayHandle, SensorDriver},
    http::{self, StatusState},
    link::{qos_from_level, Connectivity, InboundMessage, Link},
    sampler::SensorSampler,
    supervisor::LinkSupervisor,
    telemetry::TelemetryPublisher,
};

pub struct Peripherals {
    pub sensor: Box<dyn SensorDriver>,
    pub relay: Box<dyn RelayDriver>,
    pub indicator: Box<dyn Indicator>,
}

type TaskResult = (&'static str, anyhow::Result<()>);

/// Owns the node's tasks for one run. Any task ending, for whatever reason,
/// stops the whole node; the relay is then forced off before the link is
/// closed.
pub struct Node<L> {
    device_id: DeviceId,
    config: NodeConfig,
    store: Arc<ParameterStore>,
    measurement: Arc<MeasurementSlot>,
    link: L,
}

impl<L: Link> Node<L> {
    pub fn new(
        device_id: DeviceId,
        config: NodeConfig,
        store: Arc<ParameterStore>,
        link: L,
    ) -> Self {
        Self {
            device_id,
            config,
            store,
            measurement: Arc::new(MeasurementSlot::new()),
            link,
        }
    }

    /// Puts the actuator back in the persisted state.
    pub fn restore_relay(&self, relay: &RelayHandle) -> Result<(), ActuationError> {
        let restored = self.store.snapshot().relay;
        relay.apply_with(&self.store, |params| Some(params.relay))?;
        info!("relay restored to {restored}");
        Ok(())
    }

    pub async fn run<S>(
        self,
        peripherals: Peripherals,
        inbound: mpsc::Receiver<InboundMessage>,
        connectivity: watch::Receiver<Connectivity>,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        S: Future<Output = ()>,
    {
        let relay = RelayHandle::new(peripherals.relay);
        self.restore_relay(&relay)
            .context("failed to restore relay state")?;

        let mut tasks = self.spawn_tasks(
            peripherals.sensor,
            peripherals.indicator,
            relay.clone(),
            inbound,
            connectivity,
        );
        info!("node {} running", self.device_id);

        let failure = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested");
                None
            }
            Some(joined) = tasks.join_next() => Some(describe_exit(joined)),
        };
        if let Some(reason) = &failure {
            error!("{reason}, shutting down");
        }

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        let safety = force_relay_off(&relay, &self.store);

        if let Err(err) = self.link.disconnect().await {
            warn!("link disconnect failed: {err}");
        }

        safety.context("relay could not be forced off")?;
        match failure {
            Some(reason) => Err(anyhow!(reason)),
            None => Ok(()),
        }
    }

    fn spawn_tasks(
        &self,
        sensor: Box<dyn SensorDriver>,
        indicator: Box<dyn Indicator>,
        relay: RelayHandle,
        inbound: mpsc::Receiver<InboundMessage>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> JoinSet<TaskResult> {
        let timing = &self.config.timing;
        let link_config = &self.config.link;
        let topics = TopicSet::new(&self.device_id, &self.config.topics);
        let mut tasks = JoinSet::new();

        let sampler = SensorSampler::new(
            sensor,
            self.measurement.clone(),
            self.config.sensor.clone(),
            Duration::from_millis(timing.sample_interval_ms),
        );
        tasks.spawn(async move { ("sampler", sampler.run().await) });

        let control = RelayLoop::new(
            self.store.clone(),
            self.measurement.clone(),
            relay.clone(),
            Duration::from_millis(timing.control_interval_ms),
        );
        tasks.spawn(async move { ("relay control", control.run().await) });

        let commands = CommandProcessor::new(
            self.store.clone(),
            relay,
            indicator,
            topics.clone(),
            self.config.blink.clone(),
            link_config.max_payload_bytes,
        );
        tasks.spawn(async move { ("commands", commands.run(inbound).await) });

        let telemetry = TelemetryPublisher::new(
            self.link.clone(),
            self.store.clone(),
            self.measurement.clone(),
            topics.telemetry(),
            qos_from_level(link_config.telemetry_qos),
        );
        tasks.spawn(async move { ("telemetry", telemetry.run().await) });

        if let Some(port) = self.config.http_port {
            let state = StatusState {
                device_id: self.device_id.clone(),
                store: self.store.clone(),
                measurement: self.measurement.clone(),
                connectivity: connectivity.clone(),
            };
            tasks.spawn(async move { ("status http", http::serve(port, state).await) });
        }

        let supervisor = LinkSupervisor::new(
            self.link.clone(),
            topics,
            qos_from_level(link_config.command_qos),
            Duration::from_millis(timing.subscribe_delay_ms),
        );
        tasks.spawn(async move { ("link supervisor", supervisor.run(connectivity).await) });

        tasks
    }
}

fn describe_exit(joined: Result<TaskResult, JoinError>) -> String {
    match joined {
        Ok((name, Ok(()))) => format!("{name} task exited"),
        Ok((name, Err(err))) => format!("{name} task failed: {err:#}"),
        Err(err) => format!("task aborted: {err}"),
    }
}

/// Safe state, applied regardless of mode.
pub fn force_relay_off(relay: &RelayHandle, store: &ParameterStore) -> Result<(), ActuationError> {
    match relay.force_off(store) {
        Ok(()) => {
            info!("relay forced off");
            Ok(())
        }
        Err(err) => {
            error!("failed to force relay off: {err}");
            Err(err)
        }
    }
}
