use std::{sync::Arc, time::Duration};

use rumqttc::QoS;
use thermonode_common::{MeasurementSlot, ParameterStore, TelemetryPayload};
use thiserror::Error;
use tracing::{debug, warn};

use crate::link::{Link, LinkError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Link(#[from] LinkError),
}

pub struct TelemetryPublisher<L> {
    link: L,
    store: Arc<ParameterStore>,
    slot: Arc<MeasurementSlot>,
    topic: String,
    qos: QoS,
}

impl<L: Link> TelemetryPublisher<L> {
    pub fn new(
        link: L,
        store: Arc<ParameterStore>,
        slot: Arc<MeasurementSlot>,
        topic: impl Into<String>,
        qos: QoS,
    ) -> Self {
        Self {
            link,
            store,
            slot,
            topic: topic.into(),
            qos,
        }
    }

    pub fn payload(&self) -> TelemetryPayload {
        TelemetryPayload::from_snapshot(&self.store.snapshot(), self.slot.get())
    }

    pub async fn publish_once(&self) -> Result<TelemetryPayload, PublishError> {
        let payload = self.payload();
        let body = serde_json::to_vec(&payload)?;
        self.link.publish(&self.topic, body, self.qos).await?;
        debug!("telemetry published to {}", self.topic);
        Ok(payload)
    }

    /// Publishes, then waits for the period as it stands after the publish.
    /// A period change lands on the following wait.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.publish_once().await {
                warn!("telemetry publish skipped: {err}");
            }
            let period = self.store.snapshot().period.max(1);
            tokio::time::sleep(Duration::from_secs(u64::from(period))).await;
        }
    }
}
