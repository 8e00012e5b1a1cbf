//! # htbridge
//!
//! Bridges the publish/subscribe bus of small networked devices to a
//! queryable in-memory model and a stream of update events.
//!
//! ```text
//! codec/    - wire decoders: identity, diagnostics, status, schema, profile
//! router    - topic classification
//! devices/  - state store, value tracker, update fan-out
//! bus/      - bus trait and the MQTT implementation
//! manager/  - ingestion, commands, device removal
//! config    - TOML configuration
//! error     - error taxonomy
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod devices;
pub mod error;
pub mod manager;
pub mod router;

pub use config::BridgeConfig;
pub use devices::{DeviceStore, UpdateEvent, UpdateKind, UpdateObserver};
pub use error::{BusError, CommandError, DecodeError, IngestError};
pub use manager::DeviceManager;
