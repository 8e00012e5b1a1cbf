//! # Message Bus Adapter
//!
//! The seam between the device core and the publish/subscribe broker.
//! [`Bus`] is what the command dispatcher and the discovery sweep talk to;
//! [`mqtt::MqttBus`] implements it on top of `rumqttc`, tests use an
//! in-memory double.
//!
//! ```text
//! bus/
//! ├── mqtt.rs    - rumqttc client, confirmation tracking, event loop task
//! └── topics.rs  - `+` / `#` filter matching
//! ```

pub mod mqtt;
pub mod topics;

pub use topics::topic_matches;

use crate::error::BusError;
use std::future::Future;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }
}

pub trait Bus: Send + Sync + 'static {
    /// Publishes and resolves once the bus layer confirms the message went
    /// out. Callers bound the wait themselves.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), BusError>> + Send;

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<(), BusError>> + Send;
}
