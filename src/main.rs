use color_eyre::{eyre::eyre, Result};
use htbridge::bus::mqtt;
use htbridge::devices::{ChannelObserver, UpdateKind};
use htbridge::router::TopicRouter;
use htbridge::{BridgeConfig, DeviceManager};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = BridgeConfig::load(config_path.as_deref()).await?;

    let shutdown = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(1000);
    let subscription = TopicRouter::new(config.namespace.clone()).subscription();
    let (bus, event_loop) = mqtt::connect(&config.mqtt, subscription, inbound_tx);

    let manager = Arc::new(DeviceManager::new(bus, &config));

    let mqtt_handle = tokio::spawn(event_loop.run(shutdown.clone()));
    let ingest_manager = manager.clone();
    let ingest_handle = tokio::spawn(async move { ingest_manager.run_ingest(inbound_rx).await });

    // Lifecycle log of the device population
    let (observer, mut updates) = ChannelObserver::new(100);
    manager.register_observer(observer);
    let _log_handle = tokio::spawn(async move {
        while let Some(event) = updates.recv().await {
            match &event.kind {
                UpdateKind::Identity(info) => info!(
                    "Device {} is '{}' running {}",
                    event.device_id, info.identity.description, info.identity.version
                ),
                UpdateKind::Removed => info!("Device {} removed", event.device_id),
                kind => debug!("Device {} updated: {}", event.device_id, kind.name()),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;

    info!("Shutting down");
    manager.shutdown();
    shutdown.cancel();
    if let Err(e) = mqtt_handle.await {
        warn!("MQTT task ended abnormally: {}", e);
    }
    if let Err(e) = ingest_handle.await {
        warn!("Ingest task ended abnormally: {}", e);
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("HTBRIDGE_LOG")
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
