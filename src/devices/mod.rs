//! Device state: typed slices, the store that owns them, the topic value
//! tracker and the update fan-out.
//!
//! ```text
//! devices/
//! ├── model.rs   - identity, diagnostics, schema and value types
//! ├── events.rs  - UpdateEvent, observers, registry
//! ├── values.rs  - data topic resolution against the schema
//! └── store.rs   - DeviceStore, the single lock around all of it
//! ```

pub mod events;
pub mod model;
pub mod store;
pub mod values;

pub use events::{ChannelObserver, UpdateEvent, UpdateKind, UpdateObserver, ValueUpdate};
pub use model::{
    DeviceDiagnostics, DeviceIdentity, DeviceInfo, TopicDescription, TopicSchema, TopicValues,
};
pub use store::DeviceStore;
