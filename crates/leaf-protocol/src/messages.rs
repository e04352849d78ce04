//! Messages exchanged between the hub and its leaves
//!
//! Every message is a JSON object discriminated by its `type` field.
//! Values travel as raw JSON next to their [`Format`] tag; interpreting
//! them against a format is the hub's job.

use crate::types::{DeviceMode, Format, HubId, Permission, RequestKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

fn default_api_version() -> String {
    "0.1.0".to_string()
}

/// Messages a leaf sends to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Session handshake; must be the first message on a connection
    Config {
        uuid: String,
        name: String,
        #[serde(default)]
        model: String,
        #[serde(default = "default_api_version")]
        api_version: String,
        #[serde(default)]
        token: Option<String>,
    },
    /// Current value of one of the leaf's devices
    DeviceStatus {
        uuid: String,
        device: String,
        #[serde(default)]
        mode: Option<DeviceMode>,
        #[serde(default)]
        format: Option<Format>,
        value: JsonValue,
        #[serde(default)]
        units: Option<String>,
    },
    DatastoreCreate {
        name: String,
        value: JsonValue,
        format: Format,
        /// Access table; the `default` key sets the fallback level
        #[serde(default)]
        permissions: BTreeMap<String, Permission>,
    },
    DatastoreSet {
        name: String,
        value: JsonValue,
    },
    DatastoreGet {
        name: String,
    },
    DatastoreDelete {
        name: String,
    },
    /// Replace the access table of a datastore
    DatastorePermissions {
        name: String,
        permissions: BTreeMap<String, Permission>,
    },
    Subscribe {
        sub_uuid: String,
        sub_device: String,
    },
    Unsubscribe {
        sub_uuid: String,
        sub_device: String,
    },
    ConditionCreate {
        name: String,
        /// Nested-array predicate, e.g. `["=", ["<leaf>", "rfid"], 33790]`
        predicate: JsonValue,
        #[serde(default)]
        actions: Vec<ActionSpec>,
    },
    ConditionDelete {
        name: String,
    },
}

/// Kind of action attached to a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Set,
    Change,
}

/// Wire form of a condition action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: ActionType,
    /// Leaf uuid, or `"datastore"`
    pub target: String,
    /// Device or datastore name
    pub device: String,
    pub value: JsonValue,
}

/// Messages the hub sends to a leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    ConfigComplete {
        hub_id: HubId,
    },
    /// Ask a leaf to report every device it owns
    ListDevices {
        uuid: String,
    },
    DeviceStatus {
        uuid: String,
        device: String,
        value: JsonValue,
        format: Format,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        units: Option<String>,
    },
    /// Fan-out of a change to a subscriber; `uuid` and `hub_id` identify
    /// the recipient
    SubscriptionUpdate {
        uuid: String,
        hub_id: HubId,
        sub_uuid: String,
        sub_device: String,
        message: Box<OutboundMessage>,
    },
    SetOutput {
        uuid: String,
        device: String,
        value: JsonValue,
        format: Format,
    },
    ChangeOutput {
        uuid: String,
        device: String,
        value: JsonValue,
        format: Format,
    },
    DatastoreValue {
        name: String,
        value: JsonValue,
        format: Format,
    },
    DatastoreCreated {
        name: String,
        value: JsonValue,
        format: Format,
    },
    DatastoreDeleted {
        name: String,
    },
    DatastorePermissionsUpdated {
        name: String,
    },
    PermissionDenied {
        request: RequestKind,
        name: String,
    },
    UnknownDatastore {
        request: RequestKind,
        name: String,
    },
    InvalidDevice {
        uuid: String,
        device: String,
        reason: String,
    },
    InvalidCondition {
        name: String,
        reason: String,
    },
    UnknownCondition {
        name: String,
    },
    UnknownLeaf {
        uuid: String,
    },
    InvalidMessage {
        reason: String,
    },
}
