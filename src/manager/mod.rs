//! # Device Manager
//!
//! Front door of the bridge. Wires the topic router, the device store, the
//! bus and the discovery sweeps together:
//!
//! ```text
//! bus event loop ──[InboundMessage]──► DeviceManager::handle_inbound
//!                                          │
//!                     discovery sweep ◄────┤ (matching discovery topics)
//!                                          ▼
//!                                     TopicRouter ──► DeviceStore ──► observers
//!
//! HTTP / UI layer ──► queries (DeviceStore)
//!                 ──► commands (commands.rs) ──► Bus::publish, bounded by timeout
//! ```
//!
//! Queries go straight to [`DeviceStore`]; the manager adds what needs the
//! bus: control commands and device removal.

mod cleanup;
mod commands;

pub use cleanup::{start_sweep, SweepHandle, SweepRegistry};

use crate::bus::{Bus, InboundMessage};
use crate::codec::ProfileWireFormat;
use crate::config::BridgeConfig;
use crate::devices::{DeviceStore, UpdateObserver};
use crate::error::IngestError;
use crate::router::{Route, TopicRouter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct DeviceManager<B: Bus> {
    store: DeviceStore,
    bus: Arc<B>,
    router: TopicRouter,
    sweeps: Arc<SweepRegistry>,
    command_timeout: Duration,
    discovery_prefix: String,
    discovery_grace: Duration,
    profile_format: ProfileWireFormat,
    shutdown: CancellationToken,
}

impl<B: Bus> DeviceManager<B> {
    pub fn new(bus: B, config: &BridgeConfig) -> Self {
        info!(
            "Device manager for namespace '{}' (command timeout {:?})",
            config.namespace,
            config.command_timeout()
        );
        Self {
            store: DeviceStore::new(),
            bus: Arc::new(bus),
            router: TopicRouter::new(config.namespace.clone()),
            sweeps: Arc::default(),
            command_timeout: config.command_timeout(),
            discovery_prefix: config.discovery_prefix.clone(),
            discovery_grace: config.discovery_grace(),
            profile_format: config.profile_format,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    pub fn register_observer(&self, observer: Arc<dyn UpdateObserver>) -> bool {
        self.store.register_observer(observer)
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn UpdateObserver>) -> bool {
        self.store.unregister_observer(observer)
    }

    /// Number of discovery sweeps still listening.
    pub fn active_sweeps(&self) -> usize {
        self.sweeps.active()
    }

    /// Processes one inbound bus message. Never fails: every outcome is
    /// logged at the level it deserves and the message is dropped.
    pub fn handle_inbound(&self, message: &InboundMessage) {
        if self.sweeps.offer(message) {
            return;
        }

        let outcome = match self.router.classify(&message.topic) {
            Some(Route::Device {
                device_id,
                subtopic,
            }) => self
                .store
                .apply_device_message(device_id, subtopic, &message.payload),
            Some(Route::Data { device_id, path }) => {
                self.store
                    .apply_data_message(device_id, path, &message.payload)
            }
            None => {
                debug!("Unmatched topic {}", message.topic);
                return;
            }
        };

        match outcome {
            Ok(()) => trace!("Applied {}", message.topic),
            Err(IngestError::Decode(e)) => warn!("Dropping message on {}: {}", message.topic, e),
            Err(e @ IngestError::SchemaMismatch { .. }) => trace!("{}", e),
            Err(e) => debug!("Ignoring message on {}: {}", message.topic, e),
        }
    }

    /// Drains the inbound channel until it closes or shutdown is requested.
    pub async fn run_ingest(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => self.handle_inbound(&message),
                    None => break,
                },
            }
        }
        info!("Ingest loop stopped");
    }

    /// Stops the ingest loop and every running discovery sweep.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
