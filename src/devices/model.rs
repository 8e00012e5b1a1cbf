//! Typed state slices kept per device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identity advertised on `<ns>/<id>/device/info`.
///
/// Replaced wholesale on every identity message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub description: String,
    pub ip_addr: String,
    pub version: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    pub memory: u64,
    pub capabilities: BTreeSet<String>,
}

/// Identity joined with the liveness of the latest diagnostics, as
/// returned by the device listing and identity queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub identity: DeviceIdentity,
}

impl DeviceInfo {
    pub fn new(id: &str, identity: &DeviceIdentity, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.to_string(),
            last_seen,
            identity: identity.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default)]
    pub free: u64,
    #[serde(default)]
    pub low: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStackInfo {
    pub name: String,
    #[serde(rename = "stackMinLeft", default)]
    pub stack_min_left: u64,
}

/// Diagnostics published periodically by a device.
///
/// `last_seen` is never read from the payload, the store stamps it with
/// the local receipt time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiagnostics {
    #[serde(rename = "lastSeen", skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uptime: u64,
    #[serde(rename = "mem", default)]
    pub memory: MemoryInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskStackInfo>,
}

/// Sub-path name to type code. The empty sub-path stands for the primary
/// topic itself.
pub type TopicInfo = BTreeMap<String, i32>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicDescription {
    #[serde(rename = "pub")]
    pub publish: TopicInfo,
    #[serde(rename = "sub")]
    pub subscribe: TopicInfo,
}

/// Topics a device publishes and accepts, valid for one schema generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicSchema {
    pub topics: BTreeMap<String, TopicDescription>,
}

impl TopicSchema {
    /// Type code of a publishable `primary[/secondary]` pair.
    pub fn publish_type(&self, primary: &str, secondary: &str) -> Option<i32> {
        self.topics
            .get(primary)
            .and_then(|description| description.publish.get(secondary))
            .copied()
    }

    pub fn is_publishable(&self, primary: &str, secondary: &str) -> bool {
        self.publish_type(primary, secondary).is_some()
    }
}

/// Primary topic -> (sub-path -> last raw value).
pub type TopicValues = BTreeMap<String, BTreeMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp_schema() -> TopicSchema {
        let mut publish = TopicInfo::new();
        publish.insert(String::new(), 0);
        publish.insert("level".to_string(), 1);
        let mut topics = BTreeMap::new();
        topics.insert(
            "light".to_string(),
            TopicDescription {
                publish,
                subscribe: TopicInfo::new(),
            },
        );
        TopicSchema { topics }
    }

    #[test]
    fn test_publish_type_lookup() {
        let schema = lamp_schema();
        assert_eq!(schema.publish_type("light", ""), Some(0));
        assert_eq!(schema.publish_type("light", "level"), Some(1));
        assert_eq!(schema.publish_type("light", "colour"), None);
        assert!(!schema.is_publishable("switch", ""));
    }

    #[test]
    fn test_device_info_serialises_flat() {
        let identity = DeviceIdentity {
            description: "lamp".to_string(),
            ..DeviceIdentity::default()
        };
        let info = DeviceInfo::new("abc123", &identity, None);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "abc123");
        assert_eq!(json["description"], "lamp");
        assert!(json.get("lastSeen").is_none());
    }
}
