use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use thermonode_common::config::{LinkConfig, NetworkConfig};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is down")]
    Disconnected,
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Link state as seen by the supervisor. `session` increases on every
/// successful (re)connection, so a reconnect is never missed even if the
/// down/up pair is observed as a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connectivity {
    pub up: bool,
    pub session: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

/// Outbound half of the publish/subscribe transport.
pub trait Link: Clone + Send + Sync + 'static {
    /// Fails with [`LinkError::Disconnected`] while the link is down; nothing
    /// is buffered for later delivery.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn subscribe(&self, topic: &str, qos: QoS)
        -> impl Future<Output = Result<(), LinkError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), LinkError>> + Send;
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

pub struct LinkChannels {
    pub inbound: mpsc::Receiver<InboundMessage>,
    pub connectivity: watch::Receiver<Connectivity>,
    pub driver: JoinHandle<()>,
}

#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
}

impl MqttLink {
    /// Builds the client and spawns the event loop that keeps the session
    /// alive. Must be called from within a tokio runtime.
    pub fn start(
        network: &NetworkConfig,
        config: &LinkConfig,
        client_id: &str,
    ) -> (Self, LinkChannels) {
        let mut options =
            MqttOptions::new(client_id, network.mqtt_host.clone(), network.mqtt_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);
        if !network.mqtt_user.is_empty() {
            options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        let (inbound_tx, inbound) = mpsc::channel(config.inbound_queue_len);
        let (connectivity_tx, connectivity) = watch::channel(Connectivity::default());

        let link = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        let driver = spawn_event_loop(
            eventloop,
            link.clone(),
            inbound_tx,
            connectivity_tx,
            Duration::from_millis(config.reconnect_delay_ms),
        );

        (
            link,
            LinkChannels {
                inbound,
                connectivity,
                driver,
            },
        )
    }

    fn mark_down(&self, connectivity: &watch::Sender<Connectivity>) {
        if self.connected.swap(false, Ordering::Relaxed) {
            connectivity.send_modify(|state| state.up = false);
            warn!("mqtt link down");
        }
    }
}

impl Link for MqttLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::Disconnected);
        }
        self.client.try_publish(topic, qos, false, payload)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), LinkError> {
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.stopping.store(true, Ordering::Relaxed);
        self.client.disconnect().await?;
        Ok(())
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    link: MqttLink,
    inbound: mpsc::Sender<InboundMessage>,
    connectivity: watch::Sender<Connectivity>,
    reconnect_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    link.connected.store(true, Ordering::Relaxed);
                    connectivity.send_modify(|state| {
                        state.up = true;
                        state.session += 1;
                    });
                    info!("mqtt link up");
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let message = InboundMessage {
                        topic: message.topic,
                        payload: message.payload.to_vec(),
                        retained: message.retain,
                    };
                    if let Err(err) = inbound.try_send(message) {
                        warn!("inbound queue full or closed, dropping message: {err}");
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => link.mark_down(&connectivity),
                Ok(Event::Outgoing(Outgoing::Disconnect))
                    if link.stopping.load(Ordering::Relaxed) =>
                {
                    link.mark_down(&connectivity);
                    debug!("mqtt disconnect sent, stopping event loop");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    link.mark_down(&connectivity);
                    if link.stopping.load(Ordering::Relaxed) {
                        break;
                    }
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    })
}

/// Waits for the first connection. Returns `false` on timeout.
pub async fn wait_until_up(
    connectivity: &mut watch::Receiver<Connectivity>,
    timeout: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(timeout, connectivity.wait_for(|state| state.up)).await,
        Ok(Ok(_))
    )
}
