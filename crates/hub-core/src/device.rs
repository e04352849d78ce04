//! Leaves and the devices they own

use crate::value::Value;
use chrono::{DateTime, Utc};
use leaf_protocol::{DeviceMode, Format};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Identity a leaf announces when its session starts
#[derive(Debug, Clone, PartialEq)]
pub struct LeafRegistration {
    pub uuid: String,
    pub name: String,
    pub model: String,
    pub api_version: String,
}

/// One device status report as received from a leaf
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub device: String,
    pub mode: Option<DeviceMode>,
    pub format: Option<Format>,
    pub value: JsonValue,
    pub units: Option<String>,
}

/// A named value slot owned by a leaf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub mode: DeviceMode,
    pub value: Value,
    pub last_updated: DateTime<Utc>,
}

impl Device {
    /// Whether the hub may request changes to this device
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.mode == DeviceMode::Output
    }
}

/// An external agent connected to a hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub uuid: String,
    pub name: String,
    pub model: String,
    pub api_version: String,
    /// Whether a session for this leaf is currently open
    #[serde(default)]
    pub connected: bool,
    pub last_connected: Option<DateTime<Utc>>,
    /// Time of the last inbound message
    pub last_seen: Option<DateTime<Utc>>,
    /// Devices keyed by name
    #[serde(default)]
    pub devices: BTreeMap<String, Device>,
}

impl Leaf {
    /// Create a leaf from its session handshake
    #[must_use]
    pub fn new(registration: LeafRegistration) -> Self {
        let now = Utc::now();
        Self {
            uuid: registration.uuid,
            name: registration.name,
            model: registration.model,
            api_version: registration.api_version,
            connected: true,
            last_connected: Some(now),
            last_seen: Some(now),
            devices: BTreeMap::new(),
        }
    }

    /// Refresh identity fields after a reconnect
    pub fn reconnect(&mut self, registration: LeafRegistration) {
        let now = Utc::now();
        self.name = registration.name;
        self.model = registration.model;
        self.api_version = registration.api_version;
        self.connected = true;
        self.last_connected = Some(now);
        self.last_seen = Some(now);
    }

    /// Record that a message arrived from this leaf
    pub fn touch(&mut self) {
        self.last_seen = Some(Utc::now());
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }
}
