//! Common types used throughout the protocol

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pseudo-leaf identifier addressing hub-global datastores
pub const DATASTORE_TARGET: &str = "datastore";

/// Device name that subscribes to every device of a leaf
pub const WHOLE_LEAF: &str = "leaf";

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing message type")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Identifier of a hub; every leaf, datastore and condition is scoped to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubId(pub u64);

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HubId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(HubId)
            .map_err(|_| ProtocolError::InvalidField {
                field: "hub id",
                value: s.to_string(),
            })
    }
}

/// Value format tag as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    String,
    Number,
    NumberWithUnits,
    Bool,
}

impl Format {
    /// Wire tag for this format
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Format::String => "string",
            Format::Number => "number",
            Format::NumberWithUnits => "number+units",
            Format::Bool => "bool",
        }
    }

    /// Parse a wire tag. Unrecognised tags are treated as plain strings,
    /// which is how leaves that omit or misspell the format have always
    /// been handled.
    #[must_use]
    pub fn from_wire(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "number" => Format::Number,
            "number+units" => Format::NumberWithUnits,
            "bool" => Format::Bool,
            _ => Format::String,
        }
    }

    /// Whether values of this format support arithmetic
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Format::Number | Format::NumberWithUnits)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Format {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Format {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Format::from_wire(&tag))
    }
}

/// Direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Sensor style device; only the leaf changes it
    Input,
    /// Actuator; the hub may request output changes
    Output,
}

impl DeviceMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceMode::Input => "IN",
            DeviceMode::Output => "OUT",
        }
    }
}

impl FromStr for DeviceMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(DeviceMode::Input),
            "OUT" => Ok(DeviceMode::Output),
            _ => Err(ProtocolError::InvalidField {
                field: "device mode",
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for DeviceMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Datastore access level, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Deny,
    Read,
    Write,
    Admin,
}

/// Datastore request named in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    DatastoreCreate,
    DatastoreGet,
    DatastoreSet,
    DatastoreDelete,
    DatastorePermissions,
}
