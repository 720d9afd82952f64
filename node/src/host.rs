use std::{
    env, fs,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use thermonode_common::{NodeConfig, ParameterStore};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    coordinator::{Node, Peripherals},
    hardware::{LoggingIndicator, LoggingRelay, SimulatedSensor},
    identity::{resolve_device_id, MACHINE_ID_PATHS},
    link::{wait_until_up, Connectivity, Link, MqttLink},
    storage::FileBackend,
};

const DATA_DIR_ENV: &str = "THERMONODE_DATA_DIR";
const DEFAULT_DATA_DIR: &str = ".thermonode";
const CONFIG_FILE: &str = "node.json";
const PARAMS_FILE: &str = "params.json";
const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let mut config = load_config(&data_dir.join(CONFIG_FILE))?;
    apply_env_overrides(&mut config, |key| env::var(key).ok());
    config.sanitize();

    let machine_ids: Vec<PathBuf> = MACHINE_ID_PATHS.iter().map(PathBuf::from).collect();
    let device_id = resolve_device_id(env::var("NODE_DEVICE_ID").ok(), &machine_ids)
        .context("failed to determine device id")?;
    info!("device id {device_id}");

    let params_path = data_dir.join(PARAMS_FILE);
    let store = Arc::new(ParameterStore::load(
        Box::new(FileBackend::new(&params_path)),
        config.defaults,
    ));
    info!(
        "parameters loaded from {}: {:?}",
        params_path.display(),
        store.snapshot()
    );

    let client_id = format!("{}-{}", config.network.client_id_prefix, device_id);
    let (link, mut channels) = MqttLink::start(&config.network, &config.link, &client_id);
    info!(
        "connecting to mqtt://{}:{} as {client_id}",
        config.network.mqtt_host, config.network.mqtt_port
    );
    let connect_timeout = Duration::from_millis(config.link.connect_timeout_ms);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let startup =
        await_broker(&mut channels.connectivity, connect_timeout, shutdown.as_mut()).await;

    let result = match startup {
        Startup::ShutdownRequested => {
            info!("shutdown requested while connecting");
            if let Err(err) = link.disconnect().await {
                warn!("link disconnect failed: {err}");
            }
            Ok(())
        }
        Startup::Connected | Startup::Offline => {
            if startup == Startup::Offline {
                warn!(
                    "broker not reachable within {}s, running offline until it is",
                    connect_timeout.as_secs()
                );
            }
            let peripherals = Peripherals {
                sensor: Box::new(SimulatedSensor::new()),
                relay: Box::new(LoggingRelay::default()),
                indicator: Box::new(LoggingIndicator),
            };
            Node::new(device_id, config, store, link)
                .run(peripherals, channels.inbound, channels.connectivity, shutdown)
                .await
        }
    };

    let mut driver = channels.driver;
    if tokio::time::timeout(DRIVER_STOP_TIMEOUT, &mut driver)
        .await
        .is_err()
    {
        warn!("mqtt event loop still running, aborting it");
        driver.abort();
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Startup {
    Connected,
    Offline,
    ShutdownRequested,
}

/// Waits for the first session, giving up after `timeout`. A shutdown
/// request during the wait wins over both.
async fn await_broker<S>(
    connectivity: &mut watch::Receiver<Connectivity>,
    timeout: Duration,
    shutdown: S,
) -> Startup
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => Startup::ShutdownRequested,
        up = wait_until_up(connectivity, timeout) => {
            if up { Startup::Connected } else { Startup::Offline }
        }
    }
}

/// A missing file means defaults. An unreadable or malformed file is fatal.
pub fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no {} found, using default configuration", path.display());
            return Ok(NodeConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Overrides consumed once at startup. Invalid numbers are ignored with a
/// warning rather than aborting.
pub fn apply_env_overrides<F>(config: &mut NodeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("MQTT_HOST").filter(|host| !host.trim().is_empty()) {
        config.network.mqtt_host = host.trim().to_string();
    }
    if let Some(port) = lookup("MQTT_PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.network.mqtt_port = port,
            Err(_) => warn!("ignoring invalid MQTT_PORT `{port}`"),
        }
    }
    if let Some(user) = lookup("MQTT_USER") {
        config.network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        config.network.mqtt_pass = pass;
    }
    if let Some(port) = lookup("NODE_HTTP_PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.http_port = Some(port),
            Err(_) => warn!("ignoring invalid NODE_HTTP_PORT `{port}`"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
