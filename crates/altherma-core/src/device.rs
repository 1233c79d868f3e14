//! Device identity and status types

use serde::{Deserialize, Serialize};

/// Status reported to the host for the device as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Channels discovered and the device is answering
    Online,
    /// Connection failed; no values are being refreshed
    Offline,
    /// Not yet known (initial state while discovery runs)
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Identity fields reported by the adapter's device-info resource
///
/// Built all-or-nothing: a descriptor only exists if every field was present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Serial number (the device label)
    pub serial: String,
    pub model: String,
    pub device_type: String,
    pub firmware_version: String,
    pub software_version: String,
    pub hardware_version: String,
}
