use crate::devices::model::DeviceIdentity;
use crate::error::DecodeError;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Identity message as published by the firmware.
#[derive(Debug, Deserialize)]
struct RawIdentity {
    #[serde(rename = "ip", default)]
    ip_addr: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: String,
    #[serde(rename = "type", alias = "deviceType", default)]
    device_type: String,
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    capabilities: String,
}

pub fn decode_identity(payload: &[u8]) -> Result<DeviceIdentity, DecodeError> {
    let raw: RawIdentity = serde_json::from_slice(payload)?;
    Ok(DeviceIdentity {
        description: raw.description,
        ip_addr: raw.ip_addr,
        version: raw.version,
        device_type: raw.device_type,
        memory: raw.memory,
        capabilities: split_capabilities(&raw.capabilities),
    })
}

/// Splits the comma separated capability list. Empty items are dropped so
/// that an empty string yields an empty set.
pub fn split_capabilities(capabilities: &str) -> BTreeSet<String> {
    capabilities
        .split(',')
        .map(str::trim)
        .filter(|capability| !capability.is_empty())
        .map(str::to_string)
        .collect()
}
