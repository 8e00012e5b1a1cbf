//! Error types shared by the codec, store, bus and command layers.
//!
//! Decode failures are local to one message: they are logged by the ingest
//! path and the message is dropped. Command failures are surfaced to the
//! caller exactly once, no layer retries on its own.

use std::time::Duration;
use thiserror::Error;

/// Failure to decode (or re-encode) a wire payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON for the expected message
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid CBOR for the expected message
    #[error("CBOR decode failed: {0}")]
    Cbor(String),

    /// CBOR serialisation of an outgoing payload failed
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// Editable profile text could not be parsed
    #[error("profile text is not a valid document: {0}")]
    ProfileText(#[from] toml::de::Error),

    /// Profile document could not be rendered as editable text
    #[error("profile document cannot be rendered as text: {0}")]
    ProfileRender(#[from] toml::ser::Error),

    /// None of the known wire shapes matched the payload
    #[error("unrecognised {0} payload shape")]
    UnknownShape(&'static str),
}

/// Reasons an inbound bus message did not change any state.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Data topic is not declared publishable in the current schema.
    /// Expected while a device re-advertises its topics.
    #[error("topic {primary}/{secondary} is not publishable for device {device_id}")]
    SchemaMismatch {
        device_id: String,
        primary: String,
        secondary: String,
    },

    #[error("unknown device channel subtopic '{0}'")]
    UnknownSubtopic(String),

    /// Empty payload clearing a retained device-channel topic
    #[error("retained topic cleared")]
    Tombstone,
}

/// Transport-level failure reported by the bus client.
#[derive(Debug, Error)]
pub enum BusError {
    /// The client refused the request (request queue closed or full)
    #[error("bus client rejected request: {0}")]
    Client(String),

    /// The event loop went away before confirming the request
    #[error("bus event loop stopped before confirming delivery")]
    Disconnected,
}

/// Errors returned by device commands and removal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("device {0} not found")]
    UnknownDevice(String),

    #[error("timeout after {after:?} waiting for the broker to accept publish on {topic}")]
    Timeout { topic: String, after: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    #[error("failed to encode profile: {0}")]
    Encode(#[from] DecodeError),

    /// A clearing publish failed during removal; in-memory state is untouched
    #[error("device removal stopped at {topic}: {source}")]
    PartialRemoval {
        topic: String,
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    /// True for a publish that was never confirmed within the timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            CommandError::Timeout { .. } => true,
            CommandError::PartialRemoval { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
