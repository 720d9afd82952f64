use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use thermonode_common::{DeviceId, MeasurementSlot, ParameterStore, TelemetryPayload};
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

use crate::link::Connectivity;

#[derive(Clone)]
pub struct StatusState {
    pub device_id: DeviceId,
    pub store: Arc<ParameterStore>,
    pub measurement: Arc<MeasurementSlot>,
    pub connectivity: watch::Receiver<Connectivity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub device_id: String,
    pub link_up: bool,
    pub session: u64,
    pub measurement: &'static str,
    #[serde(flatten)]
    pub telemetry: TelemetryPayload,
}

impl StatusState {
    pub fn view(&self) -> StatusView {
        let link = *self.connectivity.borrow();
        let measurement = self.measurement.get();
        StatusView {
            device_id: self.device_id.to_string(),
            link_up: link.up,
            session: link.session,
            measurement: measurement.as_str(),
            telemetry: TelemetryPayload::from_snapshot(&self.store.snapshot(), measurement),
        }
    }
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(state)
}

async fn handle_get_status(State(state): State<StatusState>) -> Json<StatusView> {
    Json(state.view())
}

/// Read-only local status endpoint.
pub async fn serve(port: u16, state: StatusState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status endpoint listening on http://{addr}/api/status");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thermonode_common::{Measurement, MemoryBackend, Parameters, Reading};

    use super::*;

    #[tokio::test]
    async fn status_reports_link_measurement_and_parameters() {
        let (tx, connectivity) = watch::channel(Connectivity::default());
        let state = StatusState {
            device_id: DeviceId::new("A1B2C3").unwrap(),
            store: Arc::new(ParameterStore::load(
                Box::new(MemoryBackend::new()),
                Parameters::default(),
            )),
            measurement: Arc::new(MeasurementSlot::new()),
            connectivity,
        };

        let Json(pending) = handle_get_status(State(state.clone())).await;
        assert!(!pending.link_up);
        assert_eq!(pending.measurement, "pending");

        tx.send_replace(Connectivity {
            up: true,
            session: 3,
        });
        state.measurement.replace(Measurement::Valid(Reading {
            temperature_c: 21.0,
            humidity: 55.0,
        }));

        let Json(view) = handle_get_status(State(state)).await;
        assert_eq!(
            serde_json::to_value(view).unwrap(),
            json!({
                "deviceId": "A1B2C3",
                "linkUp": true,
                "session": 3,
                "measurement": "valid",
                "temperature": 21.0,
                "humidity": 55.0,
                "setpoint": 25.0,
                "period": 10,
                "mode": "auto",
                "relay": 0
            })
        );
    }
}
