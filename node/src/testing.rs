//! Doubles for the hardware and link seams.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use rumqttc::QoS;
use thermonode_common::{Reading, RelayState};
use tokio::time::Instant;

use crate::{
    hardware::{HardwareError, Indicator, RelayDriver, SensorDriver},
    link::{Link, LinkError},
};

#[derive(Clone, Default)]
pub struct RecordingRelay {
    writes: Arc<Mutex<Vec<RelayState>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn writes(&self) -> Vec<RelayState> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<RelayState> {
        self.writes.lock().unwrap().last().copied()
    }
}

impl RelayDriver for RecordingRelay {
    fn set(&mut self, state: RelayState) -> Result<(), HardwareError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(HardwareError::Relay("simulated fault".into()));
        }
        self.writes.lock().unwrap().push(state);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingIndicator {
    states: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<bool> {
        self.states.lock().unwrap().clone()
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        self.states.lock().unwrap().push(on);
        Ok(())
    }
}

/// Replays queued results, then fails once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedSensor {
    script: Arc<Mutex<VecDeque<Result<Reading, String>>>>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reading(&self, temperature_c: f32, humidity: f32) {
        self.script.lock().unwrap().push_back(Ok(Reading {
            temperature_c,
            humidity,
        }));
    }

    pub fn push_failure(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err("checksum mismatch".to_string()));
    }
}

impl SensorDriver for ScriptedSensor {
    fn read(&mut self) -> Result<Reading, HardwareError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(reading)) => Ok(reading),
            Some(Err(reason)) => Err(HardwareError::Sensor(reason)),
            None => Err(HardwareError::Sensor("no reading scripted".into())),
        }
    }
}

#[derive(Clone)]
pub struct RecordingLink {
    online: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    subscribed: Arc<Mutex<Vec<(String, Instant)>>>,
    disconnects: Arc<AtomicUsize>,
}

impl RecordingLink {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            published: Arc::default(),
            subscribed: Arc::default(),
            disconnects: Arc::default(),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .map(|(_, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }

    pub fn subscribed(&self) -> Vec<(String, Instant)> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }
}

impl Link for RecordingLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), LinkError> {
        if !self.online.load(Ordering::Relaxed) {
            return Err(LinkError::Disconnected);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), LinkError> {
        self.subscribed
            .lock()
            .unwrap()
            .push((topic.to_string(), Instant::now()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.online.store(false, Ordering::Relaxed);
        Ok(())
    }
}
