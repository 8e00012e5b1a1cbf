//! Update events and the observer registry they are fanned out through.
//!
//! Events serialise as `{"id": ..., "type": ..., "data": ...}` which is the
//! contract the live-update transport forwards to its clients.

use super::model::{DeviceDiagnostics, DeviceInfo, TopicSchema};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    #[serde(rename = "id")]
    pub device_id: String,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl UpdateEvent {
    pub fn new(device_id: &str, kind: UpdateKind) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind,
        }
    }
}

/// Resolved path and raw value of a data topic update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueUpdate {
    pub topic: String,
    pub subtopic: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum UpdateKind {
    #[serde(rename = "info")]
    Identity(DeviceInfo),
    #[serde(rename = "diag")]
    Diagnostics(DeviceDiagnostics),
    Status(String),
    #[serde(rename = "topics")]
    Schema(TopicSchema),
    Profile(String),
    Value(ValueUpdate),
    Removed,
}

impl UpdateKind {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateKind::Identity(_) => "info",
            UpdateKind::Diagnostics(_) => "diag",
            UpdateKind::Status(_) => "status",
            UpdateKind::Schema(_) => "topics",
            UpdateKind::Profile(_) => "profile",
            UpdateKind::Value(_) => "value",
            UpdateKind::Removed => "removed",
        }
    }
}

/// Receiver of store updates.
///
/// Called synchronously while the store lock is held: implementations must
/// return promptly and must not call back into the store.
pub trait UpdateObserver: Send + Sync {
    fn device_updated(&self, event: &UpdateEvent);
}

impl<F> UpdateObserver for F
where
    F: Fn(&UpdateEvent) + Send + Sync,
{
    fn device_updated(&self, event: &UpdateEvent) {
        self(event)
    }
}

/// Observers in registration order. Identity is the `Arc` allocation.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn UpdateObserver>>,
}

impl ObserverRegistry {
    /// Returns false if the observer was already registered.
    pub fn register(&mut self, observer: Arc<dyn UpdateObserver>) -> bool {
        if self.position(&observer).is_some() {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Returns false if the observer was not registered.
    pub fn unregister(&mut self, observer: &Arc<dyn UpdateObserver>) -> bool {
        match self.position(observer) {
            Some(index) => {
                // keeps registration order for the remaining observers
                self.observers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn broadcast(&self, event: &UpdateEvent) {
        for observer in &self.observers {
            observer.device_updated(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn position(&self, observer: &Arc<dyn UpdateObserver>) -> Option<usize> {
        let target = Arc::as_ptr(observer) as *const ();
        self.observers
            .iter()
            .position(|registered| Arc::as_ptr(registered) as *const () == target)
    }
}

/// Forwards events into a bounded channel without ever blocking the store.
///
/// This is what a live-update connection registers: the connection task
/// drains the receiver at its own pace. Events are dropped with a warning
/// when the channel is full.
pub struct ChannelObserver {
    sender: mpsc::Sender<UpdateEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<UpdateEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Arc::new(Self { sender }), receiver)
    }
}

impl UpdateObserver for ChannelObserver {
    fn device_updated(&self, event: &UpdateEvent) {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Update channel full, dropping {} event for {}",
                    event.kind.name(),
                    event.device_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Update channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn UpdateObserver> {
        Arc::new(move |event: &UpdateEvent| {
            log.lock().unwrap().push(format!("{}:{}", name, event.kind.name()));
        })
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::default();
        registry.register(recorder(log.clone(), "a"));
        registry.register(recorder(log.clone(), "b"));
        registry.register(recorder(log.clone(), "c"));

        registry.broadcast(&UpdateEvent::new("abc", UpdateKind::Removed));
        assert_eq!(*log.lock().unwrap(), vec!["a:removed", "b:removed", "c:removed"]);
    }

    #[test]
    fn test_register_and_unregister_are_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = recorder(log.clone(), "a");
        let mut registry = ObserverRegistry::default();

        assert!(registry.register(observer.clone()));
        assert!(!registry.register(observer.clone()));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&observer));
        assert!(!registry.unregister(&observer));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_keeps_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(log.clone(), "a");
        let b = recorder(log.clone(), "b");
        let c = recorder(log.clone(), "c");
        let mut registry = ObserverRegistry::default();
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(c);

        registry.unregister(&a);
        registry.broadcast(&UpdateEvent::new("abc", UpdateKind::Status("ok".into())));
        assert_eq!(*log.lock().unwrap(), vec!["b:status", "c:status"]);
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (observer, mut receiver) = ChannelObserver::new(1);
        observer.device_updated(&UpdateEvent::new("abc", UpdateKind::Status("one".into())));
        observer.device_updated(&UpdateEvent::new("abc", UpdateKind::Status("two".into())));

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.kind, UpdateKind::Status("one".into()));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let event = UpdateEvent::new(
            "abc",
            UpdateKind::Value(ValueUpdate {
                topic: "light".into(),
                subtopic: "level".into(),
                value: "50".into(),
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["type"], "value");
        assert_eq!(json["data"]["subtopic"], "level");

        let removed = serde_json::to_value(UpdateEvent::new("abc", UpdateKind::Removed)).unwrap();
        assert_eq!(removed["type"], "removed");
    }
}
