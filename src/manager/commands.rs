//! Control commands and device removal.
//!
//! Every publish is bounded by the command timeout and none is retried.
//! The store lock is never held while waiting on the bus.

use super::cleanup::{start_sweep, SweepHandle};
use super::DeviceManager;
use crate::bus::Bus;
use crate::codec::{decode_profile, encode_profile};
use crate::error::CommandError;
use crate::router::DeviceChannel;
use std::collections::BTreeSet;
use tracing::{info, warn};

const SET_PROFILE_PREFIX: &[u8] = b"setprofile\0";

impl<B: Bus> DeviceManager<B> {
    pub async fn reboot_device(&self, device_id: &str) -> Result<(), CommandError> {
        self.ensure_known(device_id)?;
        self.send_command(device_id, b"restart".to_vec()).await
    }

    pub async fn update_device(&self, device_id: &str, version: &str) -> Result<(), CommandError> {
        self.ensure_known(device_id)?;
        self.send_command(device_id, format!("update {}", version).into_bytes())
            .await
    }

    /// Encodes the editable profile text and pushes it to the device.
    ///
    /// The encoded payload is decoded again before anything is published, so
    /// a profile the device could not read never leaves the bridge.
    pub async fn set_device_profile(&self, device_id: &str, profile: &str) -> Result<(), CommandError> {
        self.ensure_known(device_id)?;
        let wire = encode_profile(profile, self.profile_format)?;
        decode_profile(&wire)?;

        let mut payload = SET_PROFILE_PREFIX.to_vec();
        payload.extend_from_slice(&wire);
        self.send_command(device_id, payload).await
    }

    /// Removes a device from the bus and from the store.
    ///
    /// 1. clears every recorded data topic (retained, empty payload), including
    ///    paths recorded while the clearing is in progress
    /// 2. clears the five retained device channels
    /// 3. starts a discovery sweep (best effort)
    /// 4. drops all in-memory state and emits the removal event
    ///
    /// A failing publish in steps 1-2 stops the removal with
    /// [`CommandError::PartialRemoval`] and leaves the store untouched.
    /// Clearing is idempotent so the removal can simply be retried.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), CommandError> {
        let mut pending = self
            .store
            .recorded_value_paths(device_id)
            .ok_or_else(|| CommandError::UnknownDevice(device_id.to_string()))?;

        info!("Removing device {} ({} value topics)", device_id, pending.len());
        let mut cleared = BTreeSet::new();
        // values may arrive on new paths while the clears are in flight
        while !pending.is_empty() {
            for path in pending {
                self.clear_retained(self.router.data_topic(device_id, &path))
                    .await?;
                cleared.insert(path);
            }
            pending = self
                .store
                .recorded_value_paths(device_id)
                .unwrap_or_default()
                .into_iter()
                .filter(|path| !cleared.contains(path))
                .collect();
        }
        for channel in DeviceChannel::CLEAR_ORDER {
            self.clear_retained(self.router.device_topic(device_id, channel))
                .await?;
        }

        self.start_discovery_sweep(device_id).await;

        if !self.store.remove(device_id) {
            warn!("Device {} disappeared during removal", device_id);
        }
        Ok(())
    }

    /// Starts the discovery cleanup for a device. Cancelled with the
    /// manager's shutdown.
    pub async fn start_discovery_sweep(&self, device_id: &str) -> Option<SweepHandle> {
        let filter = format!("{}/+/{}/#", self.discovery_prefix, device_id);
        start_sweep(
            self.bus.clone(),
            self.sweeps.clone(),
            filter,
            self.discovery_grace,
            self.shutdown.child_token(),
        )
        .await
    }

    fn ensure_known(&self, device_id: &str) -> Result<(), CommandError> {
        if self.store.is_known(device_id) {
            Ok(())
        } else {
            Err(CommandError::UnknownDevice(device_id.to_string()))
        }
    }

    async fn send_command(&self, device_id: &str, payload: Vec<u8>) -> Result<(), CommandError> {
        let topic = self.router.control_topic(device_id);
        info!("Sending command to {} ({} bytes)", device_id, payload.len());
        self.publish_confirmed(&topic, payload, false).await
    }

    async fn clear_retained(&self, topic: String) -> Result<(), CommandError> {
        self.publish_confirmed(&topic, Vec::new(), true)
            .await
            .map_err(|source| CommandError::PartialRemoval {
                topic,
                source: Box::new(source),
            })
    }

    async fn publish_confirmed(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), CommandError> {
        match tokio::time::timeout(self.command_timeout, self.bus.publish(topic, payload, retain)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CommandError::Transport(e)),
            Err(_) => Err(CommandError::Timeout {
                topic: topic.to_string(),
                after: self.command_timeout,
            }),
        }
    }
}
