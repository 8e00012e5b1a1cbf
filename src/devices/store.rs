//! # Device State Store
//!
//! Authoritative in-memory model of every device seen on the bus, rebuilt
//! from retained and streamed messages after every restart.
//!
//! ## State Slices
//!
//! Per device id the store keeps six independent slices: identity,
//! diagnostics, status, profile (as editable text), topic schema and topic
//! values. Each slice is replaced wholesale by the message that carries it,
//! nothing is merged.
//!
//! A device is *known* once its identity arrived. Every query for an unknown
//! id reports `None`, even if stray slices were recorded before the identity.
//!
//! ## Locking
//!
//! All slices and the observer registry live behind one `std::sync::Mutex`.
//! A mutation and the broadcast of its [`UpdateEvent`] happen under the same
//! guard, so every observer sees events in the order the store applied them
//! and registration changes never interleave with a running broadcast.
//! Decoding runs before the lock is taken. Observers are called with the
//! lock held and must not call back into the store.
//!
//! Queries return owned copies; the maps never leave the store.

use super::events::{ObserverRegistry, UpdateEvent, UpdateKind, UpdateObserver};
use super::model::{DeviceDiagnostics, DeviceIdentity, DeviceInfo, TopicSchema, TopicValues};
use super::values::{record_value, recorded_paths, resolve_path};
use crate::codec;
use crate::error::IngestError;
use crate::router::DeviceChannel;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Default)]
struct StoreState {
    identities: HashMap<String, DeviceIdentity>,
    diagnostics: HashMap<String, DeviceDiagnostics>,
    status: HashMap<String, String>,
    profiles: HashMap<String, String>,
    schemas: HashMap<String, TopicSchema>,
    values: HashMap<String, TopicValues>,
    observers: ObserverRegistry,
}

impl StoreState {
    fn is_known(&self, device_id: &str) -> bool {
        self.identities.contains_key(device_id)
    }

    fn last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.diagnostics
            .get(device_id)
            .and_then(|diagnostics| diagnostics.last_seen)
    }

    fn info(&self, device_id: &str) -> Option<DeviceInfo> {
        self.identities
            .get(device_id)
            .map(|identity| DeviceInfo::new(device_id, identity, self.last_seen(device_id)))
    }

    /// Clone of a slice, gated on the device being known.
    fn known<T: Clone>(&self, slice: &HashMap<String, T>, device_id: &str) -> Option<T> {
        if !self.is_known(device_id) {
            return None;
        }
        slice.get(device_id).cloned()
    }

    fn notify(&self, device_id: &str, kind: UpdateKind) {
        debug!(
            "Notifying {} observers: {} for {}",
            self.observers.len(),
            kind.name(),
            device_id
        );
        self.observers.broadcast(&UpdateEvent::new(device_id, kind));
    }
}

#[derive(Default)]
pub struct DeviceStore {
    state: Mutex<StoreState>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a device channel message.
    ///
    /// The payload is decoded first; on failure nothing is mutated and no
    /// event is emitted. Empty payloads are tombstones of a cleared retained
    /// topic and are ignored.
    pub fn apply_device_message(
        &self,
        device_id: &str,
        subtopic: &str,
        payload: &[u8],
    ) -> Result<(), IngestError> {
        let channel = DeviceChannel::parse(subtopic)
            .ok_or_else(|| IngestError::UnknownSubtopic(subtopic.to_string()))?;
        if payload.is_empty() {
            return Err(IngestError::Tombstone);
        }

        match channel {
            DeviceChannel::Info => self.set_identity(device_id, codec::decode_identity(payload)?),
            DeviceChannel::Diag => {
                let mut diagnostics = codec::decode_diagnostics(payload)?;
                diagnostics.last_seen = Some(Utc::now());
                self.set_diagnostics(device_id, diagnostics);
            }
            DeviceChannel::Status => self.set_status(device_id, codec::decode_status(payload)),
            DeviceChannel::Topics => self.set_schema(device_id, codec::decode_schema(payload)?),
            DeviceChannel::Profile => self.set_profile(device_id, codec::decode_profile(payload)?),
        }
        Ok(())
    }

    /// Records a data topic value if the current schema declares it
    /// publishable, then emits a value update.
    pub fn apply_data_message(
        &self,
        device_id: &str,
        path: &str,
        payload: &[u8],
    ) -> Result<(), IngestError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let (primary, secondary) = resolve_path(device_id, state.schemas.get(device_id), path)?;
        let update = record_value(
            state.values.entry(device_id.to_string()).or_default(),
            primary,
            secondary,
            payload,
        );
        state.notify(device_id, UpdateKind::Value(update));
        Ok(())
    }

    pub fn set_identity(&self, device_id: &str, identity: DeviceIdentity) {
        let mut state = self.lock();
        if !state.is_known(device_id) {
            info!("New device {} ({})", device_id, identity.description);
        }
        state.identities.insert(device_id.to_string(), identity);
        if let Some(info) = state.info(device_id) {
            state.notify(device_id, UpdateKind::Identity(info));
        }
    }

    pub fn set_diagnostics(&self, device_id: &str, diagnostics: DeviceDiagnostics) {
        let mut state = self.lock();
        state
            .diagnostics
            .insert(device_id.to_string(), diagnostics.clone());
        state.notify(device_id, UpdateKind::Diagnostics(diagnostics));
    }

    pub fn set_status(&self, device_id: &str, status: String) {
        let mut state = self.lock();
        state.status.insert(device_id.to_string(), status.clone());
        state.notify(device_id, UpdateKind::Status(status));
    }

    /// Replaces the schema; sub-paths of the previous generation stop
    /// being accepted immediately.
    pub fn set_schema(&self, device_id: &str, schema: TopicSchema) {
        let mut state = self.lock();
        state.schemas.insert(device_id.to_string(), schema.clone());
        state.notify(device_id, UpdateKind::Schema(schema));
    }

    pub fn set_profile(&self, device_id: &str, profile: String) {
        let mut state = self.lock();
        state.profiles.insert(device_id.to_string(), profile.clone());
        state.notify(device_id, UpdateKind::Profile(profile));
    }

    pub fn is_known(&self, device_id: &str) -> bool {
        self.lock().is_known(device_id)
    }

    /// All known devices ordered by id.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let state = self.lock();
        let mut devices: Vec<DeviceInfo> = state
            .identities
            .keys()
            .filter_map(|device_id| state.info(device_id))
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn identity(&self, device_id: &str) -> Option<DeviceInfo> {
        self.lock().info(device_id)
    }

    pub fn diagnostics(&self, device_id: &str) -> Option<DeviceDiagnostics> {
        let state = self.lock();
        state.known(&state.diagnostics, device_id)
    }

    pub fn status(&self, device_id: &str) -> Option<String> {
        let state = self.lock();
        state.known(&state.status, device_id)
    }

    pub fn profile(&self, device_id: &str) -> Option<String> {
        let state = self.lock();
        state.known(&state.profiles, device_id)
    }

    pub fn schema(&self, device_id: &str) -> Option<TopicSchema> {
        let state = self.lock();
        state.known(&state.schemas, device_id)
    }

    pub fn values(&self, device_id: &str) -> Option<TopicValues> {
        let state = self.lock();
        state.known(&state.values, device_id)
    }

    /// Topic suffixes of every value recorded for a known device.
    ///
    /// A snapshot: values arriving on new paths after the call are not in it.
    pub fn recorded_value_paths(&self, device_id: &str) -> Option<Vec<String>> {
        let state = self.lock();
        if !state.is_known(device_id) {
            return None;
        }
        Some(
            state
                .values
                .get(device_id)
                .map(recorded_paths)
                .unwrap_or_default(),
        )
    }

    /// Drops every slice of a known device and emits one removal event.
    pub fn remove(&self, device_id: &str) -> bool {
        let mut state = self.lock();
        if !state.is_known(device_id) {
            return false;
        }
        state.identities.remove(device_id);
        state.diagnostics.remove(device_id);
        state.status.remove(device_id);
        state.profiles.remove(device_id);
        state.schemas.remove(device_id);
        state.values.remove(device_id);
        info!("Removed device {}", device_id);
        state.notify(device_id, UpdateKind::Removed);
        true
    }

    pub fn register_observer(&self, observer: Arc<dyn UpdateObserver>) -> bool {
        self.lock().observers.register(observer)
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn UpdateObserver>) -> bool {
        self.lock().observers.unregister(observer)
    }
}
