//! Topic router
//!
//! Classifies inbound topics under the bridge namespace:
//!
//! ```text
//! <ns>/<deviceId>/device/<subtopic>   -> Route::Device
//! <ns>/<deviceId>/<topic>[/<sub>]     -> Route::Data
//! ```
//!
//! Device ids are lowercase hex tokens. Nothing else is validated here.

use std::fmt;

/// Reserved subtopics of a device channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChannel {
    Info,
    Diag,
    Status,
    Topics,
    Profile,
}

impl DeviceChannel {
    /// Retained channels in the order they are cleared on removal.
    pub const CLEAR_ORDER: [DeviceChannel; 5] = [
        DeviceChannel::Diag,
        DeviceChannel::Status,
        DeviceChannel::Profile,
        DeviceChannel::Topics,
        DeviceChannel::Info,
    ];

    pub fn parse(subtopic: &str) -> Option<Self> {
        match subtopic {
            "info" => Some(DeviceChannel::Info),
            "diag" => Some(DeviceChannel::Diag),
            "status" => Some(DeviceChannel::Status),
            "topics" => Some(DeviceChannel::Topics),
            "profile" => Some(DeviceChannel::Profile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceChannel::Info => "info",
            DeviceChannel::Diag => "diag",
            DeviceChannel::Status => "status",
            DeviceChannel::Topics => "topics",
            DeviceChannel::Profile => "profile",
        }
    }
}

impl fmt::Display for DeviceChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Device channel message; `subtopic` may be one the store ignores.
    Device {
        device_id: &'a str,
        subtopic: &'a str,
    },
    /// Live value on a device data topic.
    Data { device_id: &'a str, path: &'a str },
}

#[derive(Debug, Clone)]
pub struct TopicRouter {
    namespace: String,
}

impl TopicRouter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Wildcard filter covering everything the bridge ingests.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.namespace)
    }

    pub fn classify<'a>(&self, topic: &'a str) -> Option<Route<'a>> {
        let rest = topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('/')?;
        let (device_id, remainder) = rest.split_once('/')?;
        if !is_device_id(device_id) || remainder.is_empty() {
            return None;
        }

        match remainder.strip_prefix("device/") {
            Some(subtopic) => Some(Route::Device {
                device_id,
                subtopic,
            }),
            None => Some(Route::Data {
                device_id,
                path: remainder,
            }),
        }
    }

    pub fn device_topic(&self, device_id: &str, channel: DeviceChannel) -> String {
        format!("{}/{}/device/{}", self.namespace, device_id, channel)
    }

    pub fn control_topic(&self, device_id: &str) -> String {
        format!("{}/{}/device/ctrl", self.namespace, device_id)
    }

    pub fn data_topic(&self, device_id: &str, path: &str) -> String {
        format!("{}/{}/{}", self.namespace, device_id, path)
    }
}

fn is_device_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
