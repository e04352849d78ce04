//! Hub-global datastores and their access tables

use crate::value::Value;
use chrono::{DateTime, Utc};
use leaf_protocol::{OutboundMessage, Permission, RequestKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the fallback level in a wire permission map
pub const DEFAULT_KEY: &str = "default";

/// Operation a requester attempts on a datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatastoreOperation {
    Read,
    Set,
    Delete,
    EditPermissions,
}

impl DatastoreOperation {
    /// Lowest access level that allows this operation
    #[must_use]
    pub fn required(self) -> Permission {
        match self {
            DatastoreOperation::Read => Permission::Read,
            DatastoreOperation::Set => Permission::Write,
            DatastoreOperation::Delete | DatastoreOperation::EditPermissions => Permission::Admin,
        }
    }

    /// Request name used in error responses
    #[must_use]
    pub fn request_kind(self) -> RequestKind {
        match self {
            DatastoreOperation::Read => RequestKind::DatastoreGet,
            DatastoreOperation::Set => RequestKind::DatastoreSet,
            DatastoreOperation::Delete => RequestKind::DatastoreDelete,
            DatastoreOperation::EditPermissions => RequestKind::DatastorePermissions,
        }
    }
}

/// Per-datastore access control
///
/// A requester's level is their own entry if present, else the table
/// default, else [`Permission::Deny`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessTable {
    pub default: Option<Permission>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Permission>,
}

impl AccessTable {
    /// Build a table from the wire map, where the `default` key holds the
    /// fallback level and every other key is a requester uuid
    #[must_use]
    pub fn from_wire(permissions: &BTreeMap<String, Permission>) -> Self {
        let mut table = Self::default();
        for (key, level) in permissions {
            if key == DEFAULT_KEY {
                table.default = Some(*level);
            } else {
                table.overrides.insert(key.clone(), *level);
            }
        }
        table
    }

    /// Give `uuid` admin rights unless the table already names it
    #[must_use]
    pub fn with_admin(mut self, uuid: &str) -> Self {
        self.overrides
            .entry(uuid.to_string())
            .or_insert(Permission::Admin);
        self
    }

    #[must_use]
    pub fn level_for(&self, requester: &str) -> Permission {
        self.overrides
            .get(requester)
            .copied()
            .or(self.default)
            .unwrap_or(Permission::Deny)
    }

    #[must_use]
    pub fn allows(&self, requester: &str, operation: DatastoreOperation) -> bool {
        self.level_for(requester) >= operation.required()
    }
}

/// A named value slot shared across the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub value: Value,
    pub access: AccessTable,
    pub created_by: String,
    pub last_updated: DateTime<Utc>,
}

impl Datastore {
    #[must_use]
    pub fn new(name: &str, value: Value, access: AccessTable, created_by: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            access,
            created_by: created_by.to_string(),
            last_updated: Utc::now(),
        }
    }

    #[must_use]
    pub fn value_message(&self) -> OutboundMessage {
        OutboundMessage::DatastoreValue {
            name: self.name.clone(),
            value: self.value.to_json(),
            format: self.value.format(),
        }
    }

    #[must_use]
    pub fn created_message(&self) -> OutboundMessage {
        OutboundMessage::DatastoreCreated {
            name: self.name.clone(),
            value: self.value.to_json(),
            format: self.value.format(),
        }
    }
}
